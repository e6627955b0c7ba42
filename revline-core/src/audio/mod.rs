//! Audio output via cpal backend.
//!
//! # Design constraints
//!
//! The cpal output callback runs on an OS audio thread at elevated priority.
//! It **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! All of the callback's work is delegated to [`RenderCallback`], which only
//! reads from the lock-free ring and bumps atomic counters.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `AudioOutput` therefore must be created and dropped on the same
//! thread. The playback session opens it inside the producer's
//! `spawn_blocking` closure.

pub mod callback;
pub mod device;

pub use callback::RenderCallback;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use crate::error::{Result, RevlineError};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Pre-sized conversion scratch for integer devices (samples).
#[cfg(feature = "audio-cpal")]
const CONVERT_SCRATCH_SAMPLES: usize = 16_384;

/// Render into `data` through the f32 `scratch`, one scratch-sized chunk at a
/// time, so oversized HAL blocks never allocate on the audio thread.
#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
fn render_i16(callback: &mut RenderCallback, scratch: &mut [f32], data: &mut [i16]) {
    let chunk_samples = scratch.len() - scratch.len() % crate::buffering::CHANNELS;
    for chunk in data.chunks_mut(chunk_samples) {
        let block = &mut scratch[..chunk.len()];
        callback.render(block);
        for (dst, src) in chunk.iter_mut().zip(block.iter()) {
            *dst = (src.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        }
    }
}

/// Handle to an active output stream.
///
/// **Not `Send`**: `cpal::Stream` is bound to its creation thread on Windows/macOS.
/// Create and drop this type on the same OS thread.
pub struct AudioOutput {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    stream: Stream,
    /// Shared with the callback; cleared by [`stop`](Self::stop).
    playing: Arc<AtomicBool>,
    /// Stream sample rate (Hz).
    pub sample_rate: u32,
    /// Name of the device actually opened.
    pub device_name: String,
}

impl AudioOutput {
    /// Open an output device by preferred name, otherwise fall back to the
    /// default output device and then the first available device.
    ///
    /// The stream is interleaved stereo at `sample_rate` and starts running
    /// immediately; `callback` emits silence until its `playing` flag is set.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        mut callback: RenderCallback,
        playing: Arc<AtomicBool>,
        sample_rate: u32,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.output_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| crate::audio::device::matches_preference(&name, preferred_name))
                            .unwrap_or(false)
                    });

                    if selected_device.is_none() {
                        warn!(
                            "preferred output device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list output devices while resolving preference: {e}");
                }
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else if let Some(default) = host.default_output_device() {
            default
        } else {
            let mut devices = host
                .output_devices()
                .map_err(|e| RevlineError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(RevlineError::NoDefaultOutputDevice)?;
            warn!("no default output device, falling back to first available output");
            fallback
        };

        let device_name = device.name().unwrap_or_default();
        info!(device = device_name.as_str(), "opening output device");

        let supported = device
            .default_output_config()
            .map_err(|e| RevlineError::AudioDevice(e.to_string()))?;

        let config = StreamConfig {
            channels: crate::buffering::CHANNELS as u16,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            sample_rate,
            channels = config.channels,
            device_format = ?supported.sample_format(),
            "output config selected"
        );

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    callback.render(data);
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),

            SampleFormat::I16 => {
                let mut scratch: Vec<f32> = vec![0.0; CONVERT_SCRATCH_SAMPLES];
                device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _info: &cpal::OutputCallbackInfo| {
                        render_i16(&mut callback, &mut scratch, data);
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            fmt => {
                return Err(RevlineError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| RevlineError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| RevlineError::AudioStream(e.to_string()))?;

        Ok(Self {
            stream,
            playing,
            sample_rate,
            device_name,
        })
    }

    /// Stop: silence the callback, then ask the HAL to stop invoking it.
    #[cfg(feature = "audio-cpal")]
    pub fn stop(&self) {
        self.playing.store(false, Ordering::Release);
        if let Err(e) = self.stream.pause() {
            warn!("failed to pause output stream: {e}");
        }
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioOutput {
    pub fn open_with_preference(
        _callback: RenderCallback,
        _playing: Arc<AtomicBool>,
        _sample_rate: u32,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(RevlineError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn stop(&self) {
        self.playing.store(false, Ordering::Release);
    }
}
