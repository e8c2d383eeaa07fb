//! Build tokens and cooperative checkpoints.
//!
//! A build captures a [`BuildToken`] when it starts. Every long loop calls
//! [`Checkpoint::tick`] once per iteration; after the configured wall-clock
//! interval has elapsed the checkpoint hands control to the host's yield hook
//! and then compares the captured token with the live one. A mismatch ends the
//! stage with [`Cancelled`], which callers propagate with `?` and report as an
//! ordinary outcome rather than a failure.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default wall-clock budget between yields.
pub const DEFAULT_YIELD_INTERVAL: Duration = Duration::from_millis(12);

/// Source of time for debouncing and yield cadence.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// The process monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Hosts with their own frame clock
/// and tests use it to drive the scheduler deterministically.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    /// Move time forward. All clones observe the change.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

/// Marker returned by a stage whose build was superseded.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("build superseded")]
pub struct Cancelled;

/// Identifies one requested build. Larger ids are newer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildToken(u64);

impl BuildToken {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// The live token counter. Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct TokenSource {
    live: Rc<Cell<u64>>,
}

impl TokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new build; every previously issued token becomes stale.
    pub fn issue(&self) -> BuildToken {
        let next = self.live.get() + 1;
        self.live.set(next);
        BuildToken(next)
    }

    /// Invalidate every outstanding token without starting a build.
    pub fn supersede(&self) {
        self.live.set(self.live.get() + 1);
    }

    pub fn live(&self) -> BuildToken {
        BuildToken(self.live.get())
    }

    pub fn is_live(&self, token: BuildToken) -> bool {
        self.live.get() == token.0
    }
}

static SYSTEM_CLOCK: SystemClock = SystemClock;

/// Per-build yield and cancellation gate.
pub struct Checkpoint<'a> {
    token: BuildToken,
    source: TokenSource,
    clock: &'a dyn Clock,
    interval: Duration,
    last_yield: Instant,
    on_yield: Option<&'a mut dyn FnMut()>,
    yields: u32,
}

impl<'a> Checkpoint<'a> {
    pub fn new(
        token: BuildToken,
        source: &TokenSource,
        clock: &'a dyn Clock,
        interval: Duration,
    ) -> Self {
        Self {
            token,
            source: source.clone(),
            clock,
            interval,
            last_yield: clock.now(),
            on_yield: None,
            yields: 0,
        }
    }

    /// Run the hook each time the checkpoint yields.
    pub fn with_yield(mut self, hook: &'a mut dyn FnMut()) -> Self {
        self.on_yield = Some(hook);
        self
    }

    pub fn token(&self) -> BuildToken {
        self.token
    }

    /// Number of times this checkpoint has yielded.
    pub fn yields(&self) -> u32 {
        self.yields
    }

    /// Call once per loop iteration. Yields and re-checks the token when the
    /// interval has elapsed.
    #[inline]
    pub fn tick(&mut self) -> Result<(), Cancelled> {
        if self.clock.now().duration_since(self.last_yield) < self.interval {
            return Ok(());
        }
        if let Some(hook) = self.on_yield.as_deref_mut() {
            hook();
        }
        self.yields += 1;
        self.last_yield = self.clock.now();
        self.verify()
    }

    /// Check the token immediately, without yielding.
    pub fn verify(&self) -> Result<(), Cancelled> {
        if self.source.is_live(self.token) {
            Ok(())
        } else {
            Err(Cancelled)
        }
    }
}

impl Checkpoint<'static> {
    /// A checkpoint for one-shot builds that can never be superseded.
    pub fn unbounded() -> Self {
        let source = TokenSource::new();
        let token = source.issue();
        Checkpoint::new(token, &source, &SYSTEM_CLOCK, DEFAULT_YIELD_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_supersedes_previous() {
        let source = TokenSource::new();
        let first = source.issue();
        assert!(source.is_live(first));

        let second = source.issue();
        assert!(!source.is_live(first));
        assert!(source.is_live(second));
        assert!(second > first);
    }

    #[test]
    fn test_supersede_invalidates_without_new_token() {
        let source = TokenSource::new();
        let token = source.issue();
        source.supersede();
        assert!(!source.is_live(token));
    }

    #[test]
    fn test_tick_waits_for_interval() {
        let clock = ManualClock::new();
        let source = TokenSource::new();
        let token = source.issue();
        let mut checkpoint = Checkpoint::new(token, &source, &clock, Duration::from_millis(12));

        source.supersede();
        // Before the interval elapses the stale token goes unnoticed.
        assert_eq!(checkpoint.tick(), Ok(()));
        assert_eq!(checkpoint.yields(), 0);

        clock.advance(Duration::from_millis(12));
        assert_eq!(checkpoint.tick(), Err(Cancelled));
        assert_eq!(checkpoint.yields(), 1);
    }

    #[test]
    fn test_yield_hook_can_cancel() {
        let clock = ManualClock::new();
        let source = TokenSource::new();
        let token = source.issue();
        let hook_source = source.clone();
        let mut hook = move || hook_source.supersede();
        let mut checkpoint =
            Checkpoint::new(token, &source, &clock, Duration::ZERO).with_yield(&mut hook);

        assert_eq!(checkpoint.tick(), Err(Cancelled));
    }

    #[test]
    fn test_unbounded_never_cancels() {
        let mut checkpoint = Checkpoint::unbounded();
        for _ in 0..1000 {
            assert!(checkpoint.tick().is_ok());
        }
        assert!(checkpoint.verify().is_ok());
    }
}
