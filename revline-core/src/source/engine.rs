//! Engine-backed audio source.
//!
//! [`EngineSimulator`] is the Rust-side shape of the external engine ABI
//! (create/load/update/controls/stats/pull audio). [`EngineSource`] wraps any
//! implementor and turns it into an [`AudioSource`]: each producer tick it
//! applies the external throttle, steps the simulation, refreshes stats and
//! runs the starter-motor state machine.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::events::BufferReportEvent;
use crate::source::{AudioSource, ControlValue};

/// Above this speed combustion sustains itself and the starter is released.
pub const STARTER_RELEASE_RPM: f64 = 550.0;

/// Below this speed the engine is considered stalled and the starter re-engages.
pub const STARTER_REENGAGE_RPM: f64 = STARTER_RELEASE_RPM / 2.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub rpm: f64,
    /// Engine load in [0.0, 1.0].
    pub load: f64,
    pub exhaust_flow: f64,
    pub manifold_pressure: f64,
}

/// Contract for engine simulation backends.
pub trait EngineSimulator: Send + 'static {
    /// Load an engine definition script. `asset_base` resolves relative
    /// assets (impulse responses and the like).
    ///
    /// # Errors
    /// Returns an error if the script is missing or rejected.
    fn load_configuration(&mut self, script: &Path, asset_base: &Path) -> Result<()>;

    /// Advance the simulation by `dt` seconds, synthesising audio internally.
    fn update(&mut self, dt: f64) -> Result<()>;

    /// Throttle position in [0.0, 1.0].
    fn set_throttle(&mut self, position: f64);

    fn set_ignition(&mut self, enabled: bool);

    fn set_starter_motor(&mut self, enabled: bool);

    fn stats(&self) -> EngineStats;

    /// Pull up to `out.len() / 2` interleaved stereo frames of rendered audio.
    ///
    /// # Returns
    /// Frames actually copied; may be fewer than requested.
    fn read_audio_buffer(&mut self, out: &mut [f32]) -> usize;
}

pub struct EngineSource<E: EngineSimulator> {
    engine: E,
    throttle: ControlValue,
    rpm: ControlValue,
    stats: EngineStats,
    starter_engaged: bool,
}

impl<E: EngineSimulator> EngineSource<E> {
    /// Wrap `engine`, switching ignition and the starter motor on.
    pub fn new(mut engine: E, throttle: ControlValue) -> Self {
        engine.set_ignition(true);
        engine.set_starter_motor(true);
        let stats = engine.stats();
        Self {
            engine,
            throttle,
            rpm: ControlValue::new(stats.rpm),
            stats,
            starter_engaged: true,
        }
    }

    /// Shared handle to the throttle input.
    pub fn throttle(&self) -> ControlValue {
        self.throttle.clone()
    }

    /// Shared handle that receives the latest RPM after every tick.
    pub fn rpm_output(&self) -> ControlValue {
        self.rpm.clone()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn starter_engaged(&self) -> bool {
        self.starter_engaged
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn manage_starter(&mut self) {
        let rpm = self.stats.rpm;
        if self.starter_engaged && rpm > STARTER_RELEASE_RPM {
            self.engine.set_starter_motor(false);
            self.starter_engaged = false;
            info!(rpm, "engine running, starter released");
        } else if !self.starter_engaged && rpm < STARTER_REENGAGE_RPM {
            self.engine.set_starter_motor(true);
            self.starter_engaged = true;
            info!(rpm, "engine speed too low, starter re-engaged");
        }
    }
}

impl<E: EngineSimulator> AudioSource for EngineSource<E> {
    fn name(&self) -> &str {
        "engine"
    }

    fn tick(&mut self, dt: f64) -> Result<()> {
        self.engine.set_throttle(self.throttle.get().clamp(0.0, 1.0));
        self.engine.update(dt)?;
        self.stats = self.engine.stats();
        self.rpm.set(self.stats.rpm);
        self.manage_starter();
        Ok(())
    }

    fn generate(&mut self, out: &mut [f32]) -> Result<usize> {
        Ok(self.engine.read_audio_buffer(out))
    }

    fn rpm(&self) -> Option<f64> {
        Some(self.stats.rpm)
    }

    fn display_progress(&mut self, report: &BufferReportEvent) {
        debug!(
            rpm = self.stats.rpm,
            load = self.stats.load,
            throttle = self.throttle.get(),
            starter = self.starter_engaged,
            lead_ms = report.lead_ms,
            underruns = report.underruns,
            "engine progress"
        );
    }
}

impl<E: EngineSimulator> std::fmt::Debug for EngineSource<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSource")
            .field("stats", &self.stats)
            .field("starter_engaged", &self.starter_engaged)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a fixed RPM trace and records every control call.
    #[derive(Default)]
    struct ScriptedEngine {
        rpm_trace: VecDeque<f64>,
        rpm: f64,
        throttle: f64,
        ignition: bool,
        starter_calls: Vec<bool>,
        audio_frames: usize,
    }

    impl EngineSimulator for ScriptedEngine {
        fn load_configuration(&mut self, _script: &Path, _asset_base: &Path) -> Result<()> {
            Ok(())
        }

        fn update(&mut self, _dt: f64) -> Result<()> {
            if let Some(rpm) = self.rpm_trace.pop_front() {
                self.rpm = rpm;
            }
            Ok(())
        }

        fn set_throttle(&mut self, position: f64) {
            self.throttle = position;
        }

        fn set_ignition(&mut self, enabled: bool) {
            self.ignition = enabled;
        }

        fn set_starter_motor(&mut self, enabled: bool) {
            self.starter_calls.push(enabled);
        }

        fn stats(&self) -> EngineStats {
            EngineStats {
                rpm: self.rpm,
                ..EngineStats::default()
            }
        }

        fn read_audio_buffer(&mut self, out: &mut [f32]) -> usize {
            let frames = (out.len() / 2).min(self.audio_frames);
            out[..frames * 2].fill(0.5);
            self.audio_frames -= frames;
            frames
        }
    }

    fn scripted(trace: &[f64]) -> ScriptedEngine {
        ScriptedEngine {
            rpm_trace: trace.iter().copied().collect(),
            ..ScriptedEngine::default()
        }
    }

    #[test]
    fn creation_enables_ignition_and_starter() {
        let source = EngineSource::new(scripted(&[]), ControlValue::default());
        assert!(source.engine().ignition);
        assert_eq!(source.engine().starter_calls, vec![true]);
        assert!(source.starter_engaged());
    }

    #[test]
    fn starter_released_above_threshold_and_reengaged_on_stall() {
        let trace = [200.0, 400.0, 560.0, 800.0, 400.0, 270.0, 260.0];
        let mut source = EngineSource::new(scripted(&trace), ControlValue::default());

        for _ in 0..trace.len() {
            source.tick(1.0 / 60.0).expect("tick");
        }
        // created(on), 560 -> off, 270 -> on; 400 and 260 change nothing
        assert_eq!(source.engine().starter_calls, vec![true, false, true]);
        assert!(source.starter_engaged());
    }

    #[test]
    fn tick_applies_throttle_and_publishes_rpm() {
        let throttle = ControlValue::new(0.4);
        let mut source = EngineSource::new(scripted(&[1_200.0]), throttle.clone());
        let rpm = source.rpm_output();

        source.tick(1.0 / 60.0).expect("tick");
        assert_eq!(source.engine().throttle, 0.4);
        assert_eq!(rpm.get(), 1_200.0);

        throttle.set(3.0);
        source.tick(1.0 / 60.0).expect("tick");
        assert_eq!(source.engine().throttle, 1.0);
    }

    #[test]
    fn generate_passes_through_partial_reads() {
        let mut engine = scripted(&[]);
        engine.audio_frames = 300;
        let mut source = EngineSource::new(engine, ControlValue::default());

        let mut out = vec![0.0; 735 * 2];
        assert_eq!(source.generate(&mut out).expect("generate"), 300);
        assert!(out[..600].iter().all(|s| *s == 0.5));
        assert_eq!(source.generate(&mut out).expect("generate"), 0);
    }
}
