//! Fixed-cadence producer loop.
//!
//! ## Per cycle
//!
//! ```text
//! 1. Tick the source by one update period (1/60 s)
//! 2. Ask the LeadController for this cycle's frame budget
//!    (snapping the write cursor back first if the lead is above max)
//! 3. Generate up to that many frames from the source
//! 4. Write what was generated into the ring; a short source is not waited on
//! 5. Every `report_interval_cycles`, publish a BufferReportEvent
//! 6. Sleep until the next absolute deadline
//! ```
//!
//! Warm-up runs steps 1 and 3 only and throws the audio away. When it ends,
//! the ring is reset with the write cursor pre-offset by the target lead and
//! the callback is switched on.
//!
//! [`run`] executes inside `spawn_blocking`. [`Producer`] holds the per-cycle
//! logic on its own so it can be driven deterministically without a clock.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    buffering::{LeadController, LeadDecision, RingObserver, RingWriter, CHANNELS},
    diagnostics::{classify, frames_to_ms, BufferDiagnostics},
    error::RevlineError,
    events::{BufferReportEvent, SessionStatus, SessionStatusEvent},
    playback::{clock::CycleClock, clock::Pacing, transition_status, PlaybackConfig, UPDATE_HZ},
    source::SourceHandle,
};

/// Log the 1st, 61st, 121st, … source error.
const SOURCE_ERROR_LOG_EVERY: u64 = 60;

/// What one playback cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub decision: LeadDecision,
    /// Frames the source actually produced.
    pub generated: usize,
    /// Frames that landed in the ring.
    pub written: usize,
}

pub struct Producer {
    controller: LeadController,
    writer: RingWriter,
    source: SourceHandle,
    diagnostics: Arc<BufferDiagnostics>,
    /// One cycle of interleaved audio; the controller never asks for more.
    scratch: Vec<f32>,
    dt: f64,
    sample_rate: u32,
    report_interval: u64,
    report_seq: u64,
    cycles: u64,
}

impl Producer {
    pub fn new(
        config: &PlaybackConfig,
        writer: RingWriter,
        source: SourceHandle,
        diagnostics: Arc<BufferDiagnostics>,
    ) -> Self {
        let controller = LeadController::from_config(config);
        Self {
            scratch: vec![0.0; controller.frames_per_cycle() * CHANNELS],
            controller,
            writer,
            source,
            diagnostics,
            dt: 1.0 / UPDATE_HZ as f64,
            sample_rate: config.sample_rate,
            report_interval: config.report_interval_cycles as u64,
            report_seq: 0,
            cycles: 0,
        }
    }

    pub fn controller(&self) -> &LeadController {
        &self.controller
    }

    pub fn observer(&self) -> RingObserver {
        self.writer.observer()
    }

    /// Playback cycles run so far (warm-up excluded).
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Advance the source and discard one cycle of its audio.
    pub fn warm_up_cycle(&mut self) {
        let mut source = self.source.0.lock();
        if let Err(e) = source.tick(self.dt) {
            note_source_error(&self.diagnostics, "tick", &e);
        }
        if let Err(e) = source.generate(&mut self.scratch) {
            note_source_error(&self.diagnostics, "generate", &e);
        }
    }

    /// Drop everything buffered so far and pre-seed the target lead with silence.
    pub fn finish_warm_up(&mut self) {
        self.writer.reset(self.controller.target_lead_frames());
        debug!(
            lead = self.writer.available(),
            "ring reset after warm-up"
        );
    }

    /// One playback cycle: tick, plan, generate, write.
    pub fn cycle(&mut self) -> CycleOutcome {
        let mut source = self.source.0.lock();
        if let Err(e) = source.tick(self.dt) {
            note_source_error(&self.diagnostics, "tick", &e);
        }

        let decision = self.controller.plan(&mut self.writer);
        if decision.safety_reset {
            self.diagnostics.safety_resets.fetch_add(1, Ordering::Relaxed);
        }

        let budget = decision.frames.min(self.scratch.len() / CHANNELS);
        let mut generated = 0;
        if budget > 0 {
            match source.generate(&mut self.scratch[..budget * CHANNELS]) {
                Ok(frames) => generated = frames.min(budget),
                Err(e) => note_source_error(&self.diagnostics, "generate", &e),
            }
        }
        drop(source);

        let d = &self.diagnostics;
        if budget == 0 {
            d.skipped_cycles.fetch_add(1, Ordering::Relaxed);
        } else if generated < budget {
            d.source_shortfalls.fetch_add(1, Ordering::Relaxed);
        }

        let written = if generated > 0 {
            self.writer.write(&self.scratch[..generated * CHANNELS])
        } else {
            0
        };
        if written < generated {
            d.truncated_writes.fetch_add(1, Ordering::Relaxed);
        }
        d.frames_written.fetch_add(written as u64, Ordering::Relaxed);
        d.producer_cycles.fetch_add(1, Ordering::Relaxed);
        self.cycles += 1;

        CycleOutcome {
            decision,
            generated,
            written,
        }
    }

    /// Build a report if this cycle is on the reporting interval, and hand it
    /// to the source's progress hook.
    pub fn maybe_report(&mut self) -> Option<BufferReportEvent> {
        if self.report_interval == 0 || self.cycles == 0 || self.cycles % self.report_interval != 0 {
            return None;
        }
        let report = self.report();
        self.source.0.lock().display_progress(&report);
        Some(report)
    }

    pub fn report(&mut self) -> BufferReportEvent {
        self.report_seq += 1;
        let available = self.writer.available();
        let snap = self.diagnostics.snapshot();
        BufferReportEvent {
            seq: self.report_seq,
            producer_cycles: snap.producer_cycles,
            available_frames: available,
            lead_ms: frames_to_ms(available, self.sample_rate),
            status: classify(available, self.controller.target_lead_frames()),
            last_callback_status: snap.last_callback_status,
            underruns: snap.underruns,
            safety_resets: snap.safety_resets,
            rpm: self.source.0.lock().rpm(),
        }
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("controller", &self.controller)
            .field("cycles", &self.cycles)
            .finish_non_exhaustive()
    }
}

fn note_source_error(diagnostics: &BufferDiagnostics, stage: &str, err: &RevlineError) {
    let total = diagnostics.source_errors.fetch_add(1, Ordering::Relaxed) + 1;
    if total % SOURCE_ERROR_LOG_EVERY == 1 {
        warn!(stage, errors = total, "audio source error: {err}");
    }
}

/// All context the producer needs, passed as one struct so the closure stays tidy.
pub struct ProducerContext {
    pub config: PlaybackConfig,
    pub source: SourceHandle,
    pub writer: RingWriter,
    /// Loop exits once this is false.
    pub running: Arc<AtomicBool>,
    /// Set after warm-up; gates the audio callback.
    pub playing: Arc<AtomicBool>,
    pub status: Arc<Mutex<SessionStatus>>,
    pub status_tx: broadcast::Sender<SessionStatusEvent>,
    pub report_tx: broadcast::Sender<BufferReportEvent>,
    pub diagnostics: Arc<BufferDiagnostics>,
}

/// Run the blocking producer loop until `ctx.running` becomes false.
pub fn run(ctx: ProducerContext) {
    let ProducerContext {
        config,
        source,
        writer,
        running,
        playing,
        status,
        status_tx,
        report_tx,
        diagnostics,
    } = ctx;

    let mut producer = Producer::new(&config, writer, source, Arc::clone(&diagnostics));
    let warmup_cycles = config.warmup_cycles();
    info!(
        sample_rate = config.sample_rate,
        target_lead_frames = producer.controller().target_lead_frames(),
        max_lead_frames = producer.controller().max_lead_frames(),
        frames_per_cycle = producer.controller().frames_per_cycle(),
        warmup_cycles,
        "producer started"
    );

    let mut clock = CycleClock::start(config.cycle_period());

    // ── Warm-up: run the source, keep none of its audio ─────────────────────
    while running.load(Ordering::Acquire) && clock.iteration() < warmup_cycles {
        producer.warm_up_cycle();
        pace(&mut clock, &diagnostics);
    }

    if running.load(Ordering::Acquire) {
        producer.finish_warm_up();
        playing.store(true, Ordering::Release);
        transition_status(&status, &status_tx, SessionStatus::WarmingUp, SessionStatus::Playing);
        info!("warm-up complete, playback started");
    }

    // ── Playback ─────────────────────────────────────────────────────────────
    while running.load(Ordering::Acquire) {
        let outcome = producer.cycle();
        if outcome.decision.safety_reset {
            debug!(lead = outcome.decision.lead, "safety reset applied");
        }

        if let Some(report) = producer.maybe_report() {
            debug!(
                seq = report.seq,
                available = report.available_frames,
                lead_ms = report.lead_ms,
                status = ?report.status,
                underruns = report.underruns,
                "buffer report"
            );
            let _ = report_tx.send(report);
        }

        pace(&mut clock, &diagnostics);
    }

    playing.store(false, Ordering::Release);

    let snap = diagnostics.snapshot();
    info!(
        producer_cycles = snap.producer_cycles,
        frames_written = snap.frames_written,
        skipped_cycles = snap.skipped_cycles,
        safety_resets = snap.safety_resets,
        truncated_writes = snap.truncated_writes,
        source_shortfalls = snap.source_shortfalls,
        source_errors = snap.source_errors,
        schedule_overruns = snap.schedule_overruns,
        callbacks = snap.callbacks,
        underruns = snap.underruns,
        "producer diagnostics"
    );
    info!("producer stopped");
}

fn pace(clock: &mut CycleClock, diagnostics: &BufferDiagnostics) {
    if let Pacing::Overran(late) = clock.wait() {
        if late > clock.period() {
            let total = diagnostics.schedule_overruns.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(late_us = late.as_micros() as u64, overruns = total, "producer cycle overran");
        }
    }
}
