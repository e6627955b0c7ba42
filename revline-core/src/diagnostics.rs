//! Buffer health classification and playback counters.
//!
//! Everything here is observational: counters are relaxed atomics bumped by
//! the producer and the callback, and [`classify`] is a pure function of the
//! current lead. Nothing in this module feeds back into the lead controller.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::buffering::RingObserver;

/// Coarse buffer health derived from the lead relative to the target lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferStatus {
    /// Lead within [0.5×, 2×] of target.
    Normal,
    /// Lead in [0.25×, 0.5×) of target, or above 2× (latency creeping up).
    Warning,
    /// Some audio buffered, but under a quarter of the target.
    Critical,
    /// Nothing buffered.
    Underrun,
}

impl BufferStatus {
    fn to_u8(self) -> u8 {
        match self {
            BufferStatus::Normal => 0,
            BufferStatus::Warning => 1,
            BufferStatus::Critical => 2,
            BufferStatus::Underrun => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => BufferStatus::Normal,
            1 => BufferStatus::Warning,
            2 => BufferStatus::Critical,
            _ => BufferStatus::Underrun,
        }
    }
}

/// Classify `available` frames against `target_lead_frames`.
pub fn classify(available: usize, target_lead_frames: usize) -> BufferStatus {
    if available == 0 {
        return BufferStatus::Underrun;
    }
    let target = target_lead_frames.max(1);
    if available * 2 >= target && available <= target * 2 {
        BufferStatus::Normal
    } else if available * 4 >= target {
        BufferStatus::Warning
    } else {
        BufferStatus::Critical
    }
}

/// Point-in-time buffer health, computed on demand from the cursors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferHealth {
    pub available_frames: usize,
    pub lead_ms: f32,
    pub status: BufferStatus,
}

impl BufferHealth {
    pub fn observe(observer: &RingObserver, target_lead_frames: usize, sample_rate: u32) -> Self {
        let available_frames = observer.available();
        Self {
            available_frames,
            lead_ms: frames_to_ms(available_frames, sample_rate),
            status: classify(available_frames, target_lead_frames),
        }
    }
}

pub fn frames_to_ms(frames: usize, sample_rate: u32) -> f32 {
    if sample_rate == 0 {
        return 0.0;
    }
    (frames as f64 * 1000.0 / sample_rate as f64) as f32
}

/// Shared playback counters. Producer and callback each touch only their
/// own fields.
pub struct BufferDiagnostics {
    // callback side
    pub callbacks: AtomicU64,
    pub underruns: AtomicU64,
    pub frames_requested: AtomicU64,
    pub frames_delivered: AtomicU64,
    last_callback_status: AtomicU8,
    // producer side
    pub producer_cycles: AtomicU64,
    pub frames_written: AtomicU64,
    pub skipped_cycles: AtomicU64,
    pub safety_resets: AtomicU64,
    pub truncated_writes: AtomicU64,
    pub source_shortfalls: AtomicU64,
    pub source_errors: AtomicU64,
    pub schedule_overruns: AtomicU64,
}

impl Default for BufferDiagnostics {
    fn default() -> Self {
        Self {
            callbacks: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            frames_requested: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            last_callback_status: AtomicU8::new(BufferStatus::Normal.to_u8()),
            producer_cycles: AtomicU64::new(0),
            frames_written: AtomicU64::new(0),
            skipped_cycles: AtomicU64::new(0),
            safety_resets: AtomicU64::new(0),
            truncated_writes: AtomicU64::new(0),
            source_shortfalls: AtomicU64::new(0),
            source_errors: AtomicU64::new(0),
            schedule_overruns: AtomicU64::new(0),
        }
    }
}

impl BufferDiagnostics {
    /// Record one callback that delivered `delivered` of `requested` frames.
    ///
    /// Returns the new underrun total when the request was short, so the
    /// caller can rate-limit its own reporting. Real-time safe.
    pub fn record_callback(&self, requested: usize, delivered: usize) -> Option<u64> {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        self.frames_requested
            .fetch_add(requested as u64, Ordering::Relaxed);
        self.frames_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);

        if delivered >= requested {
            self.last_callback_status
                .store(BufferStatus::Normal.to_u8(), Ordering::Relaxed);
            return None;
        }

        let status = if delivered == 0 {
            BufferStatus::Underrun
        } else {
            BufferStatus::Critical
        };
        self.last_callback_status
            .store(status.to_u8(), Ordering::Relaxed);
        Some(self.underruns.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Status set by the most recent callback: `Normal` when it was fully
    /// served, otherwise `Critical` or `Underrun`.
    pub fn last_callback_status(&self) -> BufferStatus {
        BufferStatus::from_u8(self.last_callback_status.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.callbacks.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        self.frames_requested.store(0, Ordering::Relaxed);
        self.frames_delivered.store(0, Ordering::Relaxed);
        self.last_callback_status
            .store(BufferStatus::Normal.to_u8(), Ordering::Relaxed);
        self.producer_cycles.store(0, Ordering::Relaxed);
        self.frames_written.store(0, Ordering::Relaxed);
        self.skipped_cycles.store(0, Ordering::Relaxed);
        self.safety_resets.store(0, Ordering::Relaxed);
        self.truncated_writes.store(0, Ordering::Relaxed);
        self.source_shortfalls.store(0, Ordering::Relaxed);
        self.source_errors.store(0, Ordering::Relaxed);
        self.schedule_overruns.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            callbacks: self.callbacks.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            frames_requested: self.frames_requested.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            last_callback_status: self.last_callback_status(),
            producer_cycles: self.producer_cycles.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            skipped_cycles: self.skipped_cycles.load(Ordering::Relaxed),
            safety_resets: self.safety_resets.load(Ordering::Relaxed),
            truncated_writes: self.truncated_writes.load(Ordering::Relaxed),
            source_shortfalls: self.source_shortfalls.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
            schedule_overruns: self.schedule_overruns.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub callbacks: u64,
    pub underruns: u64,
    pub frames_requested: u64,
    pub frames_delivered: u64,
    pub last_callback_status: BufferStatus,
    pub producer_cycles: u64,
    pub frames_written: u64,
    pub skipped_cycles: u64,
    pub safety_resets: u64,
    pub truncated_writes: u64,
    pub source_shortfalls: u64,
    pub source_errors: u64,
    pub schedule_overruns: u64,
}
