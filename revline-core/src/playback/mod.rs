//! `PlaybackSession`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! PlaybackSession::new()
//!     └─► start()        → device open, producer spawned, status = WarmingUp
//!         ├─ (warm-up)   → ring reset, callback enabled, status = Playing
//!         └─► stop()     → playing=false, running=false, stream paused and dropped,
//!                          status = Stopped
//! ```
//!
//! `start()`/`stop()` in the wrong state return an error rather than panicking.
//! A stopped session can be started again; each run gets a fresh ring.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread affinity).
//! `AudioOutput` is therefore created *inside* the `spawn_blocking` closure so
//! it never crosses a thread boundary. A bounded crossbeam channel carries the
//! open-device result back to the `start()` caller, and a second one signals
//! when the producer thread has released the device.

pub mod clock;
pub mod producer;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    audio::{AudioOutput, RenderCallback},
    buffering::{stereo_ring, RingObserver, DEFAULT_CAPACITY_FRAMES},
    diagnostics::{BufferDiagnostics, BufferHealth, DiagnosticsSnapshot},
    error::{Result, RevlineError},
    events::{BufferReportEvent, SessionStatus, SessionStatusEvent},
    source::SourceHandle,
};

/// Producer cadence (Hz). Fixed.
pub const UPDATE_HZ: u32 = 60;

/// Broadcast channel capacity: events buffered for slow subscribers.
const BROADCAST_CAP: usize = 256;

/// How long `stop()` waits for the producer thread to release the device.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for `PlaybackSession`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaybackConfig {
    /// Output sample rate (Hz). Default: 44100.
    pub sample_rate: u32,
    /// Buffered audio the controller aims for. Default: 100 ms.
    ///
    /// Half of it must exceed the device's callback block, otherwise a safety
    /// reset can land behind a read already in flight.
    pub target_lead_ms: u32,
    /// Lead above which the write cursor is snapped back. Default: 500 ms.
    pub max_lead_ms: u32,
    /// Ring capacity in frames. Default: 96000 (≈2.18 s at 44.1 kHz).
    pub capacity_frames: usize,
    /// Start-up period whose audio is discarded. Default: 2000 ms.
    pub warmup_ms: u32,
    /// Producer cycles between buffer reports; 0 disables them. Default: 60.
    pub report_interval_cycles: u32,
    /// Output device name. `None` uses the system default.
    pub preferred_output_device: Option<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            target_lead_ms: 100,
            max_lead_ms: 500,
            capacity_frames: DEFAULT_CAPACITY_FRAMES,
            warmup_ms: 2_000,
            report_interval_cycles: 60,
            preferred_output_device: None,
        }
    }
}

impl PlaybackConfig {
    /// Frames per producer cycle, rounded up. Must never be below what the
    /// device drains per cycle, or the lead bleeds away at rates like 22050 Hz.
    pub fn frames_per_cycle(&self) -> usize {
        self.sample_rate.div_ceil(UPDATE_HZ) as usize
    }

    pub fn target_lead_frames(&self) -> usize {
        ms_to_frames(self.target_lead_ms, self.sample_rate)
    }

    pub fn max_lead_frames(&self) -> usize {
        ms_to_frames(self.max_lead_ms, self.sample_rate)
    }

    /// Warm-up length rounded up to whole producer cycles.
    pub fn warmup_cycles(&self) -> u64 {
        (self.warmup_ms as u64 * UPDATE_HZ as u64).div_ceil(1_000)
    }

    pub fn cycle_period(&self) -> Duration {
        Duration::from_secs(1) / UPDATE_HZ
    }

    /// # Errors
    /// `RevlineError::InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate < UPDATE_HZ {
            return Err(RevlineError::InvalidConfig(format!(
                "sample rate {} Hz is below the {UPDATE_HZ} Hz update rate",
                self.sample_rate
            )));
        }
        if self.target_lead_frames() == 0 {
            return Err(RevlineError::InvalidConfig(
                "target lead must be at least one frame".into(),
            ));
        }
        if self.max_lead_frames() <= self.target_lead_frames() {
            return Err(RevlineError::InvalidConfig(format!(
                "max lead ({} ms) must exceed target lead ({} ms)",
                self.max_lead_ms, self.target_lead_ms
            )));
        }
        let needed = self.max_lead_frames() + self.frames_per_cycle() + 1;
        if self.capacity_frames < needed {
            return Err(RevlineError::InvalidConfig(format!(
                "ring capacity {} frames cannot hold max lead plus one cycle ({needed} frames)",
                self.capacity_frames
            )));
        }
        Ok(())
    }
}

fn ms_to_frames(ms: u32, sample_rate: u32) -> usize {
    (ms as u64 * sample_rate as u64 / 1_000) as usize
}

/// Opens the HAL on the producer thread. Swappable so device failures can be
/// exercised without hardware.
type OpenOutput = fn(RenderCallback, Arc<AtomicBool>, u32, Option<&str>) -> Result<AudioOutput>;

/// Per-run state; replaced on every `start()`.
struct ActiveRun {
    running: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    observer: RingObserver,
    done_rx: Receiver<()>,
}

/// The top-level playback handle.
///
/// `PlaybackSession` is `Send + Sync`: all fields use interior mutability.
/// Wrap in `Arc<PlaybackSession>` to share it with event-forwarding tasks.
pub struct PlaybackSession {
    config: PlaybackConfig,
    source: SourceHandle,
    active: Mutex<Option<ActiveRun>>,
    /// Canonical status (written via Mutex, read from anywhere).
    status: Arc<Mutex<SessionStatus>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    report_tx: broadcast::Sender<BufferReportEvent>,
    diagnostics: Arc<BufferDiagnostics>,
}

impl PlaybackSession {
    /// Create a session. Nothing is opened until `start()`.
    pub fn new(config: PlaybackConfig, source: SourceHandle) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (report_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            config,
            source,
            active: Mutex::new(None),
            status: Arc::new(Mutex::new(SessionStatus::Idle)),
            status_tx,
            report_tx,
            diagnostics: Arc::new(BufferDiagnostics::default()),
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Open the configured output device and start producing.
    ///
    /// Blocks until the device is confirmed open (or fails), then returns.
    /// Warm-up and playback continue on a background blocking thread.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - `RevlineError::AlreadyRunning` if already started.
    /// - `RevlineError::InvalidConfig` if the configuration is inconsistent.
    /// - `RevlineError::NoDefaultOutputDevice` / `RevlineError::AudioStream` on device error.
    pub fn start(&self) -> Result<()> {
        self.start_with_device(self.config.preferred_output_device.clone())
    }

    /// Start using a specific output device name, overriding the configuration.
    pub fn start_with_device(&self, preferred_output_device: Option<String>) -> Result<()> {
        self.start_run(preferred_output_device, AudioOutput::open_with_preference)
    }

    fn start_run(&self, preferred_output_device: Option<String>, open_output: OpenOutput) -> Result<()> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(RevlineError::AlreadyRunning);
        }
        self.config.validate()?;

        self.diagnostics.reset();
        self.set_status(SessionStatus::WarmingUp, None);

        let (writer, reader) = stereo_ring(self.config.capacity_frames);
        let observer = writer.observer();
        let running = Arc::new(AtomicBool::new(true));
        let playing = Arc::new(AtomicBool::new(false));
        let callback = RenderCallback::new(reader, Arc::clone(&playing), Arc::clone(&self.diagnostics));

        let ctx = producer::ProducerContext {
            config: self.config.clone(),
            source: self.source.clone(),
            writer,
            running: Arc::clone(&running),
            playing: Arc::clone(&playing),
            status: Arc::clone(&self.status),
            status_tx: self.status_tx.clone(),
            report_tx: self.report_tx.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
        };
        let sample_rate = self.config.sample_rate;

        // open_tx: device open result for start(); done_tx: dropped when the
        // producer thread has released the device.
        let (open_tx, open_rx) = bounded::<Result<String>>(1);
        let (done_tx, done_rx) = bounded::<()>(1);

        tokio::task::spawn_blocking(move || {
            let _done = done_tx;

            // ── Open output (must happen on THIS thread, cpal::Stream is !Send) ──
            let output = match open_output(
                callback,
                Arc::clone(&ctx.playing),
                sample_rate,
                preferred_output_device.as_deref(),
            ) {
                Ok(output) => {
                    let _ = open_tx.send(Ok(output.device_name.clone()));
                    output
                }
                Err(e) => {
                    ctx.running.store(false, Ordering::SeqCst);
                    let _ = open_tx.send(Err(e));
                    return;
                }
            };

            producer::run(ctx);

            // Callback silenced and HAL stopped before the stream (and with it
            // the reader half of the ring) is dropped on this thread.
            output.stop();
            drop(output);
        });

        match open_rx.recv() {
            Ok(Ok(device)) => {
                info!(device = device.as_str(), "playback session started, warming up");
                *active = Some(ActiveRun {
                    running,
                    playing,
                    observer,
                    done_rx,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_status(SessionStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent: the blocking task panicked.
                running.store(false, Ordering::SeqCst);
                self.set_status(SessionStatus::Error, Some("producer failed to start".into()));
                Err(RevlineError::Other(anyhow::anyhow!(
                    "producer task died unexpectedly"
                )))
            }
        }
    }

    /// Stop playback and wait (bounded) for the device to be released.
    ///
    /// If the producer thread does not exit in time the run stays registered,
    /// status becomes `Error`, and `stop()` may be called again.
    ///
    /// # Errors
    /// - `RevlineError::NotRunning` if not currently running.
    /// - `RevlineError::StopTimeout` if the producer thread is still alive.
    pub fn stop(&self) -> Result<()> {
        self.stop_within(STOP_JOIN_TIMEOUT)
    }

    fn stop_within(&self, timeout: Duration) -> Result<()> {
        let mut active = self.active.lock();
        let run = active.as_ref().ok_or(RevlineError::NotRunning)?;

        // Consumer first, then the producer loop.
        run.playing.store(false, Ordering::SeqCst);
        run.running.store(false, Ordering::SeqCst);
        info!("playback stop requested");

        match run.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                *active = None;
                self.set_status(SessionStatus::Stopped, None);
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("producer thread did not exit within {timeout:?}");
                self.set_status(
                    SessionStatus::Error,
                    Some(format!("producer did not exit within {timeout:?}")),
                );
                Err(RevlineError::StopTimeout(timeout))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Current session status (snapshot).
    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    /// Subscribe to lifecycle change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to periodic buffer reports.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<BufferReportEvent> {
        self.report_tx.subscribe()
    }

    /// Snapshot of playback counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Current buffer health, or `None` when no run is active.
    pub fn buffer_health(&self) -> Option<BufferHealth> {
        self.active.lock().as_ref().map(|run| {
            BufferHealth::observe(
                &run.observer,
                self.config.target_lead_frames(),
                self.config.sample_rate,
            )
        })
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn set_status(&self, new_status: SessionStatus, detail: Option<String>) {
        publish_status(&self.status, &self.status_tx, new_status, detail);
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        if let Some(run) = self.active.get_mut().take() {
            run.playing.store(false, Ordering::SeqCst);
            run.running.store(false, Ordering::SeqCst);
        }
    }
}

fn publish_status(
    status: &Mutex<SessionStatus>,
    status_tx: &broadcast::Sender<SessionStatusEvent>,
    new_status: SessionStatus,
    detail: Option<String>,
) {
    *status.lock() = new_status;
    let _ = status_tx.send(SessionStatusEvent {
        status: new_status,
        detail,
    });
}

/// Move from `from` to `to` only if the session is still in `from`, so a
/// late transition from the producer cannot overwrite `Stopped`.
pub(crate) fn transition_status(
    status: &Mutex<SessionStatus>,
    status_tx: &broadcast::Sender<SessionStatusEvent>,
    from: SessionStatus,
    to: SessionStatus,
) -> bool {
    let mut current = status.lock();
    if *current != from {
        return false;
    }
    *current = to;
    let _ = status_tx.send(SessionStatusEvent {
        status: to,
        detail: None,
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SineSource;

    fn tone() -> SourceHandle {
        SourceHandle::new(SineSource::fixed(440.0, 0.2, 44_100).expect("tone"))
    }

    /// Stands in for a device that fails to open.
    fn failing_output(
        _callback: RenderCallback,
        _playing: Arc<AtomicBool>,
        _sample_rate: u32,
        _preferred: Option<&str>,
    ) -> Result<AudioOutput> {
        Err(RevlineError::AudioStream("device unplugged".into()))
    }

    fn idle_run(done_rx: Receiver<()>) -> ActiveRun {
        let (writer, _reader) = stereo_ring(1_024);
        ActiveRun {
            running: Arc::new(AtomicBool::new(true)),
            playing: Arc::new(AtomicBool::new(true)),
            observer: writer.observer(),
            done_rx,
        }
    }

    #[test]
    fn default_config_derives_frame_counts() {
        let config = PlaybackConfig::default();
        assert_eq!(config.frames_per_cycle(), 735);
        assert_eq!(config.target_lead_frames(), 4_410);
        assert_eq!(config.max_lead_frames(), 22_050);
        assert_eq!(config.warmup_cycles(), 120);
        assert_eq!(config.cycle_period(), Duration::from_nanos(16_666_666));
        config.validate().expect("default config is valid");
    }

    #[test]
    fn frames_per_cycle_rounds_up_for_uneven_rates() {
        let at = |sample_rate| PlaybackConfig { sample_rate, ..PlaybackConfig::default() }.frames_per_cycle();
        assert_eq!(at(48_000), 800);
        assert_eq!(at(22_050), 368);
        assert_eq!(at(16_000), 267);
        assert_eq!(at(32_000), 534);
    }

    #[test]
    fn validate_rejects_inconsistent_values() {
        let zero_rate = PlaybackConfig { sample_rate: 0, ..PlaybackConfig::default() };
        assert!(zero_rate.validate().is_err());

        let inverted = PlaybackConfig { max_lead_ms: 100, ..PlaybackConfig::default() };
        assert!(inverted.validate().is_err());

        let tiny = PlaybackConfig { capacity_frames: 22_050, ..PlaybackConfig::default() };
        assert!(tiny.validate().is_err());

        let exact = PlaybackConfig { capacity_frames: 22_050 + 735 + 1, ..PlaybackConfig::default() };
        assert!(exact.validate().is_ok());
    }

    #[test]
    fn config_deserializes_partial_json_with_defaults() {
        let config: PlaybackConfig =
            serde_json::from_str(r#"{ "targetLeadMs": 50, "preferredOutputDevice": "USB DAC" }"#)
                .expect("parse config");
        assert_eq!(config.target_lead_ms, 50);
        assert_eq!(config.max_lead_ms, 500);
        assert_eq!(config.preferred_output_device.as_deref(), Some("USB DAC"));
    }

    #[test]
    fn stop_without_start_is_an_error() {
        let session = PlaybackSession::new(PlaybackConfig::default(), tone());
        assert!(matches!(session.stop(), Err(RevlineError::NotRunning)));
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(session.buffer_health().is_none());
    }

    #[test]
    fn start_rejects_invalid_config_before_touching_devices() {
        let config = PlaybackConfig { max_lead_ms: 10, ..PlaybackConfig::default() };
        let session = PlaybackSession::new(config, tone());
        assert!(matches!(session.start(), Err(RevlineError::InvalidConfig(_))));
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn device_open_failure_is_reported_from_start() {
        let session = PlaybackSession::new(PlaybackConfig::default(), tone());
        let mut status_rx = session.subscribe_status();

        let err = session
            .start_run(None, failing_output)
            .expect_err("open failure must surface from start");
        assert!(matches!(err, RevlineError::AudioStream(ref msg) if msg == "device unplugged"));
        assert_eq!(session.status(), SessionStatus::Error);
        assert!(!session.is_running());

        assert_eq!(status_rx.try_recv().expect("warming up").status, SessionStatus::WarmingUp);
        let failed = status_rx.try_recv().expect("error event");
        assert_eq!(failed.status, SessionStatus::Error);
        assert_eq!(failed.detail.as_deref(), Some("audio stream error: device unplugged"));

        // Nothing is left registered, so stop() has nothing to do.
        assert!(matches!(session.stop(), Err(RevlineError::NotRunning)));
    }

    #[test]
    fn stop_timeout_keeps_the_run_registered() {
        let session = PlaybackSession::new(PlaybackConfig::default(), tone());
        let (done_tx, done_rx) = bounded::<()>(1);
        *session.active.lock() = Some(idle_run(done_rx));

        let err = session
            .stop_within(Duration::from_millis(20))
            .expect_err("producer still alive");
        assert!(matches!(err, RevlineError::StopTimeout(_)));
        assert_eq!(session.status(), SessionStatus::Error);
        assert!(session.is_running());
        assert!(matches!(session.start(), Err(RevlineError::AlreadyRunning)));
        {
            let active = session.active.lock();
            let run = active.as_ref().expect("run kept");
            assert!(!run.running.load(Ordering::SeqCst));
            assert!(!run.playing.load(Ordering::SeqCst));
        }

        // Producer thread finally exits.
        drop(done_tx);
        session.stop().expect("second stop succeeds");
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert!(!session.is_running());
    }

    #[test]
    fn transition_only_applies_from_expected_state() {
        let status = Mutex::new(SessionStatus::Stopped);
        let (tx, mut rx) = broadcast::channel(4);
        assert!(!transition_status(&status, &tx, SessionStatus::WarmingUp, SessionStatus::Playing));
        assert_eq!(*status.lock(), SessionStatus::Stopped);

        *status.lock() = SessionStatus::WarmingUp;
        assert!(transition_status(&status, &tx, SessionStatus::WarmingUp, SessionStatus::Playing));
        assert_eq!(rx.try_recv().expect("event").status, SessionStatus::Playing);
    }
}
