//! Audio source abstraction.
//!
//! The `AudioSource` trait decouples the producer loop from whatever is
//! actually making sound: a synthetic test tone, or an engine simulator
//! reached through [`EngineSimulator`](engine::EngineSimulator).
//!
//! Sources are stateful (oscillator phase, simulation state), so all calls
//! go through `SourceHandle`'s `parking_lot::Mutex`. Only the producer
//! thread locks it while playing.

pub mod engine;
pub mod sine;
pub mod stub;

pub use engine::{EngineSimulator, EngineSource, EngineStats};
pub use sine::{Pitch, SineSource};
pub use stub::StubEngine;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::error::Result;
use crate::events::BufferReportEvent;

/// Contract for anything that can feed the ring buffer.
pub trait AudioSource: Send + 'static {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// Advance internal state by `dt` seconds. Called once per producer
    /// cycle, during warm-up as well as playback.
    fn tick(&mut self, dt: f64) -> Result<()>;

    /// Fill `out` with interleaved stereo frames.
    ///
    /// # Returns
    /// Frames actually produced. Fewer than `out.len() / 2` is a partial
    /// result; the producer writes only the produced prefix.
    fn generate(&mut self, out: &mut [f32]) -> Result<usize>;

    /// Latest engine speed, for sources that have one.
    fn rpm(&self) -> Option<f64> {
        None
    }

    /// Diagnostic hook invoked with each periodic buffer report.
    fn display_progress(&mut self, _report: &BufferReportEvent) {}
}

/// Thread-safe reference-counted handle to any `AudioSource` implementor.
#[derive(Clone)]
pub struct SourceHandle(pub Arc<Mutex<dyn AudioSource>>);

impl SourceHandle {
    /// Wrap any `AudioSource` in a `SourceHandle`.
    pub fn new<S: AudioSource>(source: S) -> Self {
        Self(Arc::new(Mutex::new(source)))
    }
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle").finish_non_exhaustive()
    }
}

/// A lock-free `f64` shared between a controller and a source.
///
/// Used for the external throttle input and for publishing RPM back out.
#[derive(Clone, Default)]
pub struct ControlValue(Arc<AtomicU64>);

impl ControlValue {
    pub fn new(value: f64) -> Self {
        Self(Arc::new(AtomicU64::new(value.to_bits())))
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

impl std::fmt::Debug for ControlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ControlValue").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_value_is_shared_between_clones() {
        let throttle = ControlValue::new(0.25);
        let reader = throttle.clone();
        throttle.set(0.8);
        assert_eq!(reader.get(), 0.8);
    }

    #[test]
    fn default_control_value_is_zero() {
        assert_eq!(ControlValue::default().get(), 0.0);
    }
}
