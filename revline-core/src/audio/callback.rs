//! The consumer side: fills HAL output buffers from the ring.
//!
//! `render` runs on the OS audio thread. It does bounded arithmetic, relaxed
//! atomics and a slice copy, nothing else. The single exception is a rate
//! limited `warn!` on underruns, which only fires once playback is already
//! degraded.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::warn;

use crate::{
    buffering::{RingReader, CHANNELS},
    diagnostics::BufferDiagnostics,
};

/// Log the 1st, 11th, 21st, … underrun.
const UNDERRUN_LOG_EVERY: u64 = 10;

pub struct RenderCallback {
    reader: RingReader,
    /// Cleared before teardown; while false the callback only emits silence.
    playing: Arc<AtomicBool>,
    diagnostics: Arc<BufferDiagnostics>,
}

impl RenderCallback {
    pub fn new(
        reader: RingReader,
        playing: Arc<AtomicBool>,
        diagnostics: Arc<BufferDiagnostics>,
    ) -> Self {
        Self {
            reader,
            playing,
            diagnostics,
        }
    }

    /// Fill `out` (interleaved stereo) and return the frames taken from the ring.
    ///
    /// Any shortfall is zero-filled and counted as one underrun. The read
    /// cursor only advances by the frames actually delivered.
    pub fn render(&mut self, out: &mut [f32]) -> usize {
        if !self.playing.load(Ordering::Acquire) {
            out.fill(0.0);
            return 0;
        }

        let requested = out.len() / CHANNELS;
        let delivered = self.reader.read(out);
        out[delivered * CHANNELS..].fill(0.0);

        if let Some(total) = self.diagnostics.record_callback(requested, delivered) {
            if total % UNDERRUN_LOG_EVERY == 1 {
                warn!(underruns = total, requested, delivered, "audio callback underrun");
            }
        }
        delivered
    }
}

impl std::fmt::Debug for RenderCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCallback")
            .field("playing", &self.playing.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::stereo_ring;
    use crate::diagnostics::BufferStatus;

    fn setup(capacity: usize) -> (crate::buffering::RingWriter, RenderCallback, Arc<AtomicBool>, Arc<BufferDiagnostics>) {
        let (writer, reader) = stereo_ring(capacity);
        let playing = Arc::new(AtomicBool::new(true));
        let diagnostics = Arc::new(BufferDiagnostics::default());
        let callback = RenderCallback::new(reader, Arc::clone(&playing), Arc::clone(&diagnostics));
        (writer, callback, playing, diagnostics)
    }

    #[test]
    fn inactive_playback_emits_silence_without_reading() {
        let (mut writer, mut callback, playing, diagnostics) = setup(1_024);
        writer.write(&vec![0.5; 100 * CHANNELS]);
        playing.store(false, Ordering::Release);

        let mut out = vec![1.0; 64 * CHANNELS];
        assert_eq!(callback.render(&mut out), 0);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(writer.available(), 100);
        assert_eq!(diagnostics.snapshot().callbacks, 0);
    }

    #[test]
    fn short_read_zero_fills_and_counts_one_underrun() {
        let (mut writer, mut callback, _playing, diagnostics) = setup(9_600);
        writer.write(&vec![0.25; 200 * CHANNELS]);

        let mut out = vec![1.0; 735 * CHANNELS];
        assert_eq!(callback.render(&mut out), 200);
        assert!(out[..200 * CHANNELS].iter().all(|s| *s == 0.25));
        assert!(out[200 * CHANNELS..].iter().all(|s| *s == 0.0));

        let snap = diagnostics.snapshot();
        assert_eq!(snap.underruns, 1);
        assert_eq!(snap.last_callback_status, BufferStatus::Critical);
        assert_eq!(writer.available(), 0);
    }

    #[test]
    fn empty_ring_reports_underrun_status() {
        let (_writer, mut callback, _playing, diagnostics) = setup(256);
        let mut out = vec![1.0; 32 * CHANNELS];
        assert_eq!(callback.render(&mut out), 0);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(diagnostics.last_callback_status(), BufferStatus::Underrun);
    }

    #[test]
    fn underruns_never_decrease_and_track_short_callbacks() {
        let (mut writer, mut callback, _playing, diagnostics) = setup(4_096);
        let mut out = vec![0.0; 256 * CHANNELS];
        let mut expected = 0;
        let mut last = 0;

        for i in 0..50usize {
            let frames = (i * 37) % 400;
            writer.write(&vec![0.1; frames * CHANNELS]);
            let delivered = callback.render(&mut out);
            if delivered < 256 {
                expected += 1;
            }
            let now = diagnostics.snapshot().underruns;
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, expected);
    }
}
