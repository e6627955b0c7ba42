//! `StubEngine`: placeholder engine simulator with no physics.
//!
//! RPM follows the throttle with a first-order lag; audio is a firing-order
//! tone rendered during `update` into an internal `ringbuf` SPSC buffer and
//! pulled back out by `read_audio_buffer`, mirroring how the real engine ABI
//! buffers its synthesiser output. A read larger than what `update` rendered
//! comes back short, which exercises the producer's source-starvation path.

use std::f64::consts::TAU;
use std::path::{Path, PathBuf};

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use tracing::{debug, info};

use crate::buffering::CHANNELS;
use crate::error::{Result, RevlineError};
use crate::source::engine::{EngineSimulator, EngineStats};

const IDLE_RPM: f64 = 800.0;
const REDLINE_RPM: f64 = 6_500.0;
/// Speed the starter alone can turn the crank at.
const CRANKING_RPM: f64 = 350.0;
/// Below this, combustion cannot sustain.
const COMBUSTION_MIN_RPM: f64 = 150.0;
/// Time constant of the RPM response (s).
const RPM_TIME_CONSTANT: f64 = 0.35;
const CYLINDERS: f64 = 4.0;
const ATMOSPHERIC_KPA: f64 = 101.325;

pub struct StubEngine {
    sample_rate: u32,
    script: Option<PathBuf>,
    throttle: f64,
    ignition: bool,
    starter: bool,
    rpm: f64,
    phase: f64,
    /// Fractional frames carried between updates.
    frame_debt: f64,
    scratch: Vec<f32>,
    producer: HeapProd<f32>,
    consumer: HeapCons<f32>,
    dropped_frames: u64,
}

impl StubEngine {
    /// Engine with half a second of internal audio buffering.
    pub fn new(sample_rate: u32) -> Self {
        let capacity = (sample_rate as usize / 2).max(1) * CHANNELS;
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        Self {
            sample_rate,
            script: None,
            throttle: 0.0,
            ignition: false,
            starter: false,
            rpm: 0.0,
            phase: 0.0,
            frame_debt: 0.0,
            scratch: Vec::new(),
            producer,
            consumer,
            dropped_frames: 0,
        }
    }

    pub fn script(&self) -> Option<&Path> {
        self.script.as_deref()
    }

    /// Frames of rendered audio waiting to be pulled.
    pub fn buffered_frames(&self) -> usize {
        self.consumer.occupied_len() / CHANNELS
    }

    /// Frames discarded because nobody pulled them in time.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    fn target_rpm(&self) -> f64 {
        let firing = self.ignition && self.rpm >= COMBUSTION_MIN_RPM;
        let combustion = if firing {
            IDLE_RPM + self.throttle * (REDLINE_RPM - IDLE_RPM)
        } else {
            0.0
        };
        let cranking = if self.starter { CRANKING_RPM } else { 0.0 };
        combustion.max(cranking)
    }

    fn load(&self) -> f64 {
        if self.ignition && self.rpm >= COMBUSTION_MIN_RPM {
            self.throttle
        } else {
            0.0
        }
    }

    fn render(&mut self, frames: usize) {
        // Firing frequency of a four-stroke: rpm/60 revolutions, a pulse every other one per cylinder.
        let firing_hz = self.rpm / 60.0 * CYLINDERS / 2.0;
        let step = TAU * firing_hz / self.sample_rate as f64;
        let amplitude = (0.15 + 0.35 * self.load()) * (self.rpm / IDLE_RPM).min(1.0);

        self.scratch.resize(frames * CHANNELS, 0.0);
        for frame in self.scratch.chunks_exact_mut(CHANNELS) {
            let tone = self.phase.sin() + 0.5 * (2.0 * self.phase).sin() + 0.25 * (3.0 * self.phase).sin();
            frame.fill((tone * amplitude / 1.75) as f32);
            self.phase = (self.phase + step) % TAU;
        }

        let room = self.producer.vacant_len() / CHANNELS * CHANNELS;
        let pushed = self.producer.push_slice(&self.scratch[..room.min(self.scratch.len())]);
        let dropped = (self.scratch.len() - pushed) / CHANNELS;
        if dropped > 0 {
            self.dropped_frames += dropped as u64;
            debug!(dropped, "stub engine audio buffer full");
        }
    }
}

impl EngineSimulator for StubEngine {
    fn load_configuration(&mut self, script: &Path, asset_base: &Path) -> Result<()> {
        if !script.is_file() {
            return Err(RevlineError::ScriptNotFound {
                path: script.to_path_buf(),
            });
        }
        info!(
            script = %script.display(),
            assets = %asset_base.display(),
            "stub engine accepted configuration (contents ignored)"
        );
        self.script = Some(script.to_path_buf());
        Ok(())
    }

    fn update(&mut self, dt: f64) -> Result<()> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(RevlineError::Engine(format!("invalid time step: {dt}")));
        }
        let alpha = 1.0 - (-dt / RPM_TIME_CONSTANT).exp();
        self.rpm += (self.target_rpm() - self.rpm) * alpha;

        let exact = dt * self.sample_rate as f64 + self.frame_debt;
        // Tolerate float error so 1/60 s at 44.1 kHz is 735 frames, not 734.
        let frames = (exact + 1e-9).floor();
        self.frame_debt = (exact - frames).max(0.0);
        self.render(frames as usize);
        Ok(())
    }

    fn set_throttle(&mut self, position: f64) {
        self.throttle = position.clamp(0.0, 1.0);
    }

    fn set_ignition(&mut self, enabled: bool) {
        self.ignition = enabled;
    }

    fn set_starter_motor(&mut self, enabled: bool) {
        self.starter = enabled;
    }

    fn stats(&self) -> EngineStats {
        let load = self.load();
        EngineStats {
            rpm: self.rpm,
            load,
            exhaust_flow: self.rpm / REDLINE_RPM * load,
            manifold_pressure: ATMOSPHERIC_KPA * (0.3 + 0.7 * self.throttle),
        }
    }

    fn read_audio_buffer(&mut self, out: &mut [f32]) -> usize {
        let whole = out.len() / CHANNELS * CHANNELS;
        self.consumer.pop_slice(&mut out[..whole]) / CHANNELS
    }
}

impl std::fmt::Debug for StubEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubEngine")
            .field("rpm", &self.rpm)
            .field("throttle", &self.throttle)
            .field("ignition", &self.ignition)
            .field("starter", &self.starter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AudioSource, ControlValue, EngineSource};

    const DT: f64 = 1.0 / 60.0;

    #[test]
    fn update_renders_one_tick_of_audio() {
        let mut engine = StubEngine::new(44_100);
        engine.set_ignition(true);
        engine.set_starter_motor(true);
        engine.update(DT).expect("update");
        assert_eq!(engine.buffered_frames(), 735);

        let mut out = vec![0.0; 1_000 * CHANNELS];
        assert_eq!(engine.read_audio_buffer(&mut out), 735);
        assert_eq!(engine.read_audio_buffer(&mut out), 0);
    }

    #[test]
    fn fractional_frames_carry_over() {
        let mut engine = StubEngine::new(48_000);
        for _ in 0..7 {
            engine.update(1.0 / 7_000.0).expect("update");
        }
        // 7 × 6.857… frames = 48 frames in total
        assert_eq!(engine.buffered_frames(), 48);
    }

    #[test]
    fn engine_source_starts_and_releases_starter() {
        let mut source = EngineSource::new(StubEngine::new(44_100), ControlValue::new(0.0));
        for _ in 0..300 {
            source.tick(DT).expect("tick");
        }
        let rpm = source.rpm().expect("engine rpm");
        assert!(rpm > 700.0 && rpm < 900.0, "idle rpm {rpm}");
        assert!(!source.starter_engaged());
    }

    #[test]
    fn throttle_raises_rpm() {
        let throttle = ControlValue::new(0.0);
        let mut source = EngineSource::new(StubEngine::new(44_100), throttle.clone());
        for _ in 0..300 {
            source.tick(DT).expect("tick");
        }
        let idle = source.stats().rpm;
        throttle.set(1.0);
        for _ in 0..300 {
            source.tick(DT).expect("tick");
        }
        assert!(source.stats().rpm > idle + 3_000.0);
        assert_eq!(source.stats().load, 1.0);
    }

    #[test]
    fn overflow_drops_newest_audio() {
        let mut engine = StubEngine::new(1_000);
        engine.update(2.0).expect("update");
        assert_eq!(engine.buffered_frames(), 500);
        assert_eq!(engine.dropped_frames(), 1_500);
    }

    #[test]
    fn missing_script_is_reported() {
        let mut engine = StubEngine::new(44_100);
        let err = engine
            .load_configuration(Path::new("/definitely/not/here.mr"), Path::new("."))
            .expect_err("missing script");
        assert!(matches!(err, RevlineError::ScriptNotFound { .. }));
        assert!(engine.script().is_none());
    }

    #[test]
    fn negative_time_step_is_rejected() {
        let mut engine = StubEngine::new(44_100);
        assert!(engine.update(-1.0).is_err());
    }
}
