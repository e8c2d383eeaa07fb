//! Monotonic progress reporting.

/// Forwards build progress in `[0, 1]` to an optional host callback.
///
/// Values never decrease: a report below the last delivered value is dropped.
pub struct Progress<'a> {
    sink: Option<&'a mut dyn FnMut(f32)>,
    last: f32,
}

impl<'a> Progress<'a> {
    pub fn new(sink: Option<&'a mut dyn FnMut(f32)>) -> Self {
        Self { sink, last: 0.0 }
    }

    /// A reporter that discards everything.
    pub fn silent() -> Self {
        Self::new(None)
    }

    /// Last value delivered.
    pub fn current(&self) -> f32 {
        self.last
    }

    /// Report an absolute fraction of the whole build.
    pub fn report(&mut self, fraction: f32) {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        if fraction <= self.last {
            return;
        }
        self.last = fraction;
        if let Some(sink) = self.sink.as_deref_mut() {
            sink(fraction);
        }
    }

    /// Report `done / total` of a stage occupying `[start, end]` of the build.
    pub fn report_stage(&mut self, start: f32, end: f32, done: usize, total: usize) {
        let local = if total == 0 { 1.0 } else { done as f32 / total as f32 };
        self.report(start + (end - start) * local);
    }
}
