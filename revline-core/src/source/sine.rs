//! `SineSource`: synthetic test tone for verifying the output path.
//!
//! Either a fixed frequency, or a frequency that follows an RPM value
//! published by some other component. Phase carries over between calls, so
//! arbitrary block sizes stitch together without discontinuities.

use std::f64::consts::TAU;

use crate::buffering::CHANNELS;
use crate::error::{Result, RevlineError};
use crate::source::{AudioSource, ControlValue};

/// Fade-in length on start: 10 ms.
const FADE_IN_DIVISOR: u32 = 100;

/// Default RPM-to-pitch ratio: 600 RPM idle sounds at 100 Hz.
pub const DEFAULT_HZ_PER_RPM: f64 = 1.0 / 6.0;

#[derive(Debug, Clone)]
pub enum Pitch {
    Fixed(f64),
    RpmLinked { rpm: ControlValue, hz_per_rpm: f64 },
}

impl Pitch {
    fn frequency(&self) -> f64 {
        match self {
            Pitch::Fixed(hz) => *hz,
            Pitch::RpmLinked { rpm, hz_per_rpm } => rpm.get().max(0.0) * hz_per_rpm,
        }
    }
}

#[derive(Debug)]
pub struct SineSource {
    pitch: Pitch,
    amplitude: f32,
    sample_rate: u32,
    /// Phase in radians, kept in [0, τ).
    phase: f64,
    fade_frames: u32,
    frames_emitted: u64,
}

impl SineSource {
    pub fn new(pitch: Pitch, amplitude: f32, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(RevlineError::InvalidConfig("sample rate must be non-zero".into()));
        }
        if let Pitch::Fixed(hz) = pitch {
            if !hz.is_finite() || hz <= 0.0 {
                return Err(RevlineError::InvalidConfig(format!("invalid tone frequency: {hz}")));
            }
        }
        Ok(Self {
            pitch,
            amplitude: amplitude.clamp(0.0, 1.0),
            sample_rate,
            phase: 0.0,
            fade_frames: (sample_rate / FADE_IN_DIVISOR).max(1),
            frames_emitted: 0,
        })
    }

    pub fn fixed(frequency_hz: f64, amplitude: f32, sample_rate: u32) -> Result<Self> {
        Self::new(Pitch::Fixed(frequency_hz), amplitude, sample_rate)
    }

    pub fn rpm_linked(rpm: ControlValue, amplitude: f32, sample_rate: u32) -> Result<Self> {
        Self::new(
            Pitch::RpmLinked {
                rpm,
                hz_per_rpm: DEFAULT_HZ_PER_RPM,
            },
            amplitude,
            sample_rate,
        )
    }

    pub fn frequency(&self) -> f64 {
        self.pitch.frequency()
    }

    fn gain(&self) -> f32 {
        if self.frames_emitted >= self.fade_frames as u64 {
            self.amplitude
        } else {
            self.amplitude * self.frames_emitted as f32 / self.fade_frames as f32
        }
    }
}

impl AudioSource for SineSource {
    fn name(&self) -> &str {
        "sine"
    }

    fn tick(&mut self, _dt: f64) -> Result<()> {
        Ok(())
    }

    fn generate(&mut self, out: &mut [f32]) -> Result<usize> {
        // Frequency is sampled once per block; RPM moves slowly next to 60 Hz.
        let step = TAU * self.frequency() / self.sample_rate as f64;
        let mut frames = 0;

        for frame in out.chunks_exact_mut(CHANNELS) {
            let sample = self.phase.sin() as f32 * self.gain();
            frame.fill(sample);
            self.phase = (self.phase + step) % TAU;
            self.frames_emitted += 1;
            frames += 1;
        }
        Ok(frames)
    }

    fn rpm(&self) -> Option<f64> {
        match &self.pitch {
            Pitch::Fixed(_) => None,
            Pitch::RpmLinked { rpm, .. } => Some(rpm.get()),
        }
    }
}
