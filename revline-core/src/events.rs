//! Event types broadcast by a [`PlaybackSession`](crate::playback::PlaybackSession).
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `SessionStatusEvent` | `PlaybackSession::subscribe_status` |
//! | `BufferReportEvent` | `PlaybackSession::subscribe_reports` |
//!
//! All types are serde-friendly so front-ends can forward them as JSON.

use serde::{Deserialize, Serialize};

use crate::diagnostics::BufferStatus;

// ---------------------------------------------------------------------------
// Session status events
// ---------------------------------------------------------------------------

/// Emitted whenever the session changes lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Lifecycle of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, never started (or fully torn down and restartable).
    Idle,
    /// Device open, source running, audio discarded while it settles.
    WarmingUp,
    /// Ring primed and the callback is delivering audio.
    Playing,
    /// Stopped cleanly.
    Stopped,
    /// Device or producer failure.
    Error,
}

// ---------------------------------------------------------------------------
// Buffer reports
// ---------------------------------------------------------------------------

/// Periodic buffer health report from the producer loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferReportEvent {
    /// Monotonically increasing report sequence number.
    pub seq: u64,
    /// Producer cycles completed since playback began.
    pub producer_cycles: u64,
    /// Frames buffered ahead of the read cursor.
    pub available_frames: usize,
    /// Same lead expressed in milliseconds.
    pub lead_ms: f32,
    pub status: BufferStatus,
    /// Status reported by the most recent audio callback.
    pub last_callback_status: BufferStatus,
    pub underruns: u64,
    pub safety_resets: u64,
    /// Latest RPM published by the source, if it tracks one.
    pub rpm: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_lowercase() {
        let event = SessionStatusEvent {
            status: SessionStatus::WarmingUp,
            detail: None,
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "warmingup");
        assert!(json["detail"].is_null());
    }

    #[test]
    fn buffer_report_uses_camel_case_keys() {
        let report = BufferReportEvent {
            seq: 3,
            producer_cycles: 180,
            available_frames: 4_410,
            lead_ms: 100.0,
            status: BufferStatus::Normal,
            last_callback_status: BufferStatus::Critical,
            underruns: 2,
            safety_resets: 0,
            rpm: Some(812.5),
        };
        let json = serde_json::to_value(&report).expect("serialize report");
        assert_eq!(json["availableFrames"], 4_410);
        assert_eq!(json["lastCallbackStatus"], "critical");
        assert_eq!(json["safetyResets"], 0);

        let back: BufferReportEvent = serde_json::from_value(json).expect("deserialize report");
        assert_eq!(back.seq, 3);
        assert_eq!(back.rpm, Some(812.5));
    }
}
