//! Debounced, two-phase build scheduling.
//!
//! The host pushes parameter changes through a [`SchedulerHandle`] and drives
//! the [`BuildScheduler`] from its event loop: [`poll`](BuildScheduler::poll)
//! on every frame or timer tick, [`run_idle`](BuildScheduler::run_idle) when
//! it has nothing better to do.
//!
//! ```text
//! Idle --submit--> Debouncing --deadline--> Previewing --> FinalPending
//!                      ^                                        |
//!                      |                                    run_idle
//!                   submit (any state)                          v
//!                                                  Idle <-- FinalBuilding
//! ```
//!
//! Every submit invalidates the live [`BuildToken`], so whichever build is
//! running notices at its next checkpoint and is discarded. Results reach
//! [`CurrentModel`] only while their token is still live.

use crate::cancel::{BuildToken, Checkpoint, Clock, SystemClock, TokenSource, DEFAULT_YIELD_INTERVAL};
use crate::crop::opaque_bounds;
use crate::error::MesherError;
use crate::mesher::{fingerprint, BuildOutcome, Detail, StackMesher, StackModel};
use crate::progress::Progress;
use crate::types::BuildParams;
use image::RgbaImage;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Timing and resolution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Quiet time after the last change before a build starts.
    pub debounce: Duration,
    /// Work budget between yields inside a build.
    pub yield_interval: Duration,
    /// Approximate cell count of the preview grid.
    pub preview_pixels: u64,
    /// Crops larger than this are coarsened even for the final build.
    pub full_pixel_limit: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(120),
            yield_interval: DEFAULT_YIELD_INTERVAL,
            preview_pixels: 250_000,
            full_pixel_limit: 4_000_000,
        }
    }
}

/// One desired model: an image and the parameters to build it with.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub image: Rc<RgbaImage>,
    pub params: BuildParams,
}

impl BuildRequest {
    pub fn new(image: Rc<RgbaImage>, params: BuildParams) -> Self {
        Self { image, params }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// Waiting for changes to settle.
    Debouncing { deadline: Instant },
    Previewing,
    /// Preview published; the full-resolution build waits for idle time.
    FinalPending,
    FinalBuilding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Preview,
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A model was swapped into [`CurrentModel`].
    Published { phase: BuildPhase, generation: u64 },
    /// Inputs match the current final model; nothing was rebuilt.
    Unchanged,
    /// A newer request overtook the build and its work was discarded.
    Superseded,
    /// The build failed. The previous model stays current.
    Failed(String),
}

#[derive(Debug, Default)]
struct Published {
    model: Option<Rc<StackModel>>,
    generation: u64,
    is_final: bool,
}

/// Shared view of the most recently published model.
///
/// Clones observe the same slot. Renderers and exporters hold one of these
/// instead of reaching into the scheduler.
#[derive(Debug, Clone, Default)]
pub struct CurrentModel {
    inner: Rc<RefCell<Published>>,
}

impl CurrentModel {
    pub fn get(&self) -> Option<Rc<StackModel>> {
        self.inner.borrow().model.clone()
    }

    /// Number of models published so far.
    pub fn generation(&self) -> u64 {
        self.inner.borrow().generation
    }

    /// Whether the current model came from a full-resolution build.
    pub fn is_final(&self) -> bool {
        self.inner.borrow().is_final
    }

    fn publish(&self, model: StackModel, is_final: bool) -> u64 {
        let mut inner = self.inner.borrow_mut();
        inner.model = Some(Rc::new(model));
        inner.generation += 1;
        inner.is_final = is_final;
        inner.generation
    }
}

#[derive(Default)]
struct Inbox {
    pending: Option<BuildRequest>,
    deadline: Option<Instant>,
}

/// Cloneable submit side of a scheduler, safe to call from inside a yield
/// hook while a build is running.
#[derive(Clone)]
pub struct SchedulerHandle {
    inbox: Rc<RefCell<Inbox>>,
    tokens: TokenSource,
    clock: Rc<dyn Clock>,
    debounce: Duration,
}

impl SchedulerHandle {
    /// Replace any pending request, restart the debounce timer and abandon
    /// whatever build is in flight.
    pub fn submit(&self, request: BuildRequest) {
        let mut inbox = self.inbox.borrow_mut();
        inbox.pending = Some(request);
        inbox.deadline = Some(self.clock.now() + self.debounce);
        self.tokens.supersede();
    }
}

/// Request accepted for building, with its resolved pipeline.
struct ActiveBuild {
    request: BuildRequest,
    mesher: StackMesher,
    fingerprint: u64,
    token: BuildToken,
}

pub struct BuildScheduler {
    config: SchedulerConfig,
    clock: Rc<dyn Clock>,
    tokens: TokenSource,
    inbox: Rc<RefCell<Inbox>>,
    state: SchedulerState,
    queued: Option<BuildRequest>,
    active: Option<ActiveBuild>,
    current: CurrentModel,
    last_final: Option<u64>,
    yield_hook: Option<Box<dyn FnMut()>>,
    progress_hook: Option<Box<dyn FnMut(f32)>>,
}

impl BuildScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Rc::new(SystemClock))
    }

    pub fn with_clock(config: SchedulerConfig, clock: Rc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            tokens: TokenSource::new(),
            inbox: Rc::default(),
            state: SchedulerState::Idle,
            queued: None,
            active: None,
            current: CurrentModel::default(),
            last_final: None,
            yield_hook: None,
            progress_hook: None,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            inbox: Rc::clone(&self.inbox),
            tokens: self.tokens.clone(),
            clock: Rc::clone(&self.clock),
            debounce: self.config.debounce,
        }
    }

    pub fn submit(&self, request: BuildRequest) {
        self.handle().submit(request);
    }

    pub fn current_model(&self) -> CurrentModel {
        self.current.clone()
    }

    pub fn state(&self) -> SchedulerState {
        self.absorbed_state()
    }

    /// When the host should next call [`poll`](Self::poll), if a build is
    /// waiting on the debounce timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.absorbed_state() {
            SchedulerState::Debouncing { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Called whenever a build yields, so the host can service input and
    /// redraw. Submitting from inside the hook cancels the running build.
    pub fn set_yield_hook(&mut self, hook: impl FnMut() + 'static) {
        self.yield_hook = Some(Box::new(hook));
    }

    /// Receives monotonic progress in `[0, 1]` for each build.
    pub fn set_progress_hook(&mut self, hook: impl FnMut(f32) + 'static) {
        self.progress_hook = Some(Box::new(hook));
    }

    /// Start the debounced build once its deadline has passed.
    pub fn poll(&mut self) -> Option<SchedulerEvent> {
        self.absorb_inbox();
        match self.state {
            SchedulerState::Debouncing { deadline } if self.clock.now() >= deadline => {
                Some(self.start())
            }
            _ => None,
        }
    }

    /// Run the pending full-resolution build, if any.
    pub fn run_idle(&mut self) -> Option<SchedulerEvent> {
        self.absorb_inbox();
        if self.state != SchedulerState::FinalPending {
            return None;
        }
        self.state = SchedulerState::FinalBuilding;
        Some(self.run_phase(BuildPhase::Final))
    }

    fn absorbed_state(&self) -> SchedulerState {
        match self.inbox.borrow().deadline {
            Some(deadline) => SchedulerState::Debouncing { deadline },
            None => self.state,
        }
    }

    fn absorb_inbox(&mut self) {
        let mut inbox = self.inbox.borrow_mut();
        let Some(request) = inbox.pending.take() else {
            return;
        };
        let deadline = inbox.deadline.take().unwrap_or_else(|| self.clock.now());
        if self.active.take().is_some() {
            debug!("Dropping pending build for newer request");
        }
        self.queued = Some(request);
        self.state = SchedulerState::Debouncing { deadline };
    }

    fn start(&mut self) -> SchedulerEvent {
        let Some(request) = self.queued.take() else {
            self.state = SchedulerState::Idle;
            return SchedulerEvent::Superseded;
        };

        let prepared = fingerprint(&request.image, &request.params).and_then(|fingerprint| {
            if self.last_final == Some(fingerprint) {
                return Ok(None);
            }
            let mesher = StackMesher::new(request.params.clone())?;
            Ok(Some((fingerprint, mesher)))
        });
        let (fingerprint, mesher) = match prepared {
            Ok(Some(prepared)) => prepared,
            Ok(None) => {
                debug!("Inputs unchanged, skipping build");
                self.state = SchedulerState::Idle;
                return SchedulerEvent::Unchanged;
            }
            Err(err) => return self.fail(err),
        };

        let area = opaque_bounds(&request.image).area();
        let preview = self.preview_detail().step(area);
        let full = self.full_detail().step(area);

        let token = self.tokens.issue();
        debug!("Starting build {} (preview step {}, final step {})", token.id(), preview, full);
        self.active = Some(ActiveBuild {
            request,
            mesher,
            fingerprint,
            token,
        });

        if preview == full {
            self.state = SchedulerState::FinalBuilding;
            self.run_phase(BuildPhase::Final)
        } else {
            self.state = SchedulerState::Previewing;
            self.run_phase(BuildPhase::Preview)
        }
    }

    fn preview_detail(&self) -> Detail {
        Detail::Preview {
            pixel_target: self.config.preview_pixels,
        }
    }

    fn full_detail(&self) -> Detail {
        Detail::Full {
            pixel_limit: self.config.full_pixel_limit,
        }
    }

    fn run_phase(&mut self, phase: BuildPhase) -> SchedulerEvent {
        let detail = match phase {
            BuildPhase::Preview => self.preview_detail(),
            BuildPhase::Final => self.full_detail(),
        };

        let (token, expected, result) = {
            let Some(active) = self.active.as_ref() else {
                self.state = SchedulerState::Idle;
                return SchedulerEvent::Superseded;
            };
            let mut checkpoint = Checkpoint::new(
                active.token,
                &self.tokens,
                &*self.clock,
                self.config.yield_interval,
            );
            if let Some(hook) = self.yield_hook.as_deref_mut() {
                checkpoint = checkpoint.with_yield(hook);
            }
            let sink: Option<&mut dyn FnMut(f32)> = match self.progress_hook.as_deref_mut() {
                Some(hook) => Some(hook),
                None => None,
            };
            let mut progress = Progress::new(sink);
            let result = active
                .mesher
                .build(&active.request.image, detail, &mut checkpoint, &mut progress);
            (active.token, active.fingerprint, result)
        };

        let model = match result {
            Ok(BuildOutcome::Completed(model)) => model,
            Ok(BuildOutcome::Cancelled) => return self.superseded(),
            Err(err) => return self.fail(err),
        };
        if !self.tokens.is_live(token) {
            return self.superseded();
        }

        let is_final = phase == BuildPhase::Final;
        let generation = self.current.publish(model, is_final);
        info!("Published {:?} model (generation {})", phase, generation);
        if is_final {
            self.last_final = Some(expected);
            self.active = None;
            self.state = SchedulerState::Idle;
        } else {
            self.state = SchedulerState::FinalPending;
        }
        self.absorb_inbox();
        SchedulerEvent::Published { phase, generation }
    }

    fn superseded(&mut self) -> SchedulerEvent {
        debug!("Build superseded, discarding results");
        self.active = None;
        self.state = SchedulerState::Idle;
        self.absorb_inbox();
        SchedulerEvent::Superseded
    }

    fn fail(&mut self, err: MesherError) -> SchedulerEvent {
        warn!("Build failed: {}", err);
        self.active = None;
        self.state = SchedulerState::Idle;
        self.absorb_inbox();
        SchedulerEvent::Failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::ManualClock;
    use crate::types::LayerSpec;
    use image::Rgba;
    use std::cell::Cell;

    fn params(thickness: f32) -> BuildParams {
        let mut params = BuildParams::with_layers(vec![
            LayerSpec::new(0, "#ff0000", 0.2),
            LayerSpec::new(1, "#0000ff", thickness),
        ]);
        params.pixel_size_mm = 1.0;
        params
    }

    fn request(size: u32, thickness: f32) -> BuildRequest {
        let mut image = RgbaImage::from_pixel(size, size, Rgba([255, 0, 0, 255]));
        image.put_pixel(0, 0, Rgba([0, 0, 255, 255]));
        BuildRequest::new(Rc::new(image), params(thickness))
    }

    fn scheduler(config: SchedulerConfig) -> (BuildScheduler, ManualClock) {
        let clock = ManualClock::new();
        let scheduler = BuildScheduler::with_clock(config, Rc::new(clock.clone()));
        (scheduler, clock)
    }

    const DEBOUNCE: Duration = Duration::from_millis(120);

    #[test]
    fn test_changes_within_debounce_publish_once() {
        let (mut scheduler, clock) = scheduler(SchedulerConfig::default());
        let current = scheduler.current_model();

        scheduler.submit(request(4, 0.4));
        clock.advance(Duration::from_millis(50));
        assert_eq!(scheduler.poll(), None);

        let last = request(4, 0.6);
        scheduler.submit(last.clone());
        clock.advance(Duration::from_millis(100));
        // The second change restarted the timer.
        assert_eq!(scheduler.poll(), None);

        clock.advance(Duration::from_millis(20));
        assert_eq!(
            scheduler.poll(),
            Some(SchedulerEvent::Published {
                phase: BuildPhase::Final,
                generation: 1
            })
        );
        assert_eq!(scheduler.poll(), None);
        assert_eq!(scheduler.run_idle(), None);

        assert_eq!(current.generation(), 1);
        let model = current.get().unwrap();
        assert_eq!(
            model.fingerprint,
            fingerprint(&last.image, &last.params).unwrap()
        );
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_preview_then_final() {
        let config = SchedulerConfig {
            preview_pixels: 4,
            ..SchedulerConfig::default()
        };
        let (mut scheduler, clock) = scheduler(config);
        let current = scheduler.current_model();

        scheduler.submit(request(8, 0.4));
        clock.advance(DEBOUNCE);
        assert_eq!(
            scheduler.poll(),
            Some(SchedulerEvent::Published {
                phase: BuildPhase::Preview,
                generation: 1
            })
        );
        assert_eq!(scheduler.state(), SchedulerState::FinalPending);
        assert!(!current.is_final());
        assert_eq!(current.get().unwrap().step, 4);

        assert_eq!(
            scheduler.run_idle(),
            Some(SchedulerEvent::Published {
                phase: BuildPhase::Final,
                generation: 2
            })
        );
        assert!(current.is_final());
        assert_eq!(current.get().unwrap().step, 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_new_request_drops_pending_final() {
        let config = SchedulerConfig {
            preview_pixels: 4,
            ..SchedulerConfig::default()
        };
        let (mut scheduler, clock) = scheduler(config);

        scheduler.submit(request(8, 0.4));
        clock.advance(DEBOUNCE);
        assert!(scheduler.poll().is_some());

        scheduler.submit(request(8, 0.6));
        assert_eq!(scheduler.run_idle(), None);
        assert!(matches!(scheduler.state(), SchedulerState::Debouncing { .. }));
    }

    #[test]
    fn test_submit_during_build_supersedes_it() {
        let config = SchedulerConfig {
            yield_interval: Duration::ZERO,
            ..SchedulerConfig::default()
        };
        let (mut scheduler, clock) = scheduler(config);
        let current = scheduler.current_model();

        let handle = scheduler.handle();
        let replacement = request(4, 0.6);
        let queued = replacement.clone();
        let fired = Rc::new(Cell::new(false));
        let hook_fired = Rc::clone(&fired);
        scheduler.set_yield_hook(move || {
            if !hook_fired.replace(true) {
                handle.submit(queued.clone());
            }
        });

        scheduler.submit(request(4, 0.4));
        clock.advance(DEBOUNCE);
        assert_eq!(scheduler.poll(), Some(SchedulerEvent::Superseded));
        assert!(fired.get());
        assert!(current.get().is_none());
        assert!(scheduler.next_deadline().is_some());

        clock.advance(DEBOUNCE);
        assert!(matches!(
            scheduler.poll(),
            Some(SchedulerEvent::Published { generation: 1, .. })
        ));
        assert_eq!(
            current.get().unwrap().fingerprint,
            fingerprint(&replacement.image, &replacement.params).unwrap()
        );
    }

    #[test]
    fn test_unchanged_inputs_are_skipped() {
        let (mut scheduler, clock) = scheduler(SchedulerConfig::default());
        let current = scheduler.current_model();

        scheduler.submit(request(4, 0.4));
        clock.advance(DEBOUNCE);
        assert!(scheduler.poll().is_some());

        scheduler.submit(request(4, 0.4));
        clock.advance(DEBOUNCE);
        assert_eq!(scheduler.poll(), Some(SchedulerEvent::Unchanged));
        assert_eq!(current.generation(), 1);
    }

    #[test]
    fn test_failure_keeps_previous_model() {
        let (mut scheduler, clock) = scheduler(SchedulerConfig::default());
        let current = scheduler.current_model();

        scheduler.submit(request(4, 0.4));
        clock.advance(DEBOUNCE);
        assert!(scheduler.poll().is_some());
        let before = current.get().unwrap();

        scheduler.submit(BuildRequest::new(Rc::new(RgbaImage::new(0, 0)), params(0.4)));
        clock.advance(DEBOUNCE);
        assert!(matches!(scheduler.poll(), Some(SchedulerEvent::Failed(_))));

        let mut invalid = request(4, 0.4);
        invalid.params.layers.clear();
        scheduler.submit(invalid);
        clock.advance(DEBOUNCE);
        assert!(matches!(scheduler.poll(), Some(SchedulerEvent::Failed(_))));

        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(current.generation(), 1);
        assert!(Rc::ptr_eq(&before, &current.get().unwrap()));
    }

    #[test]
    fn test_progress_hook_sees_completion() {
        let (mut scheduler, clock) = scheduler(SchedulerConfig::default());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        scheduler.set_progress_hook(move |v| sink.borrow_mut().push(v));

        scheduler.submit(request(4, 0.4));
        clock.advance(DEBOUNCE);
        scheduler.poll();

        let seen = seen.borrow();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(1.0));
    }
}
