//! Cursor-chasing lead controller.
//!
//! ## Algorithm (once per producer cycle)
//!
//! 1. Load both cursors, `lead = (write - read) mod capacity`.
//! 2. If `lead > max_lead`: snap `write` back to `read + target_lead / 2`.
//! 3. `target_write = read + target_lead + frames_per_cycle`,
//!    `needed = (target_write - write) mod capacity`.
//! 4. If writing `needed` frames would leave a lead smaller than the current
//!    one (the write cursor is already past the target), write nothing.
//! 5. Otherwise write `min(needed, frames_per_cycle)`.
//!
//! The extra `frames_per_cycle` in the target covers what the callback drains
//! before the next cycle, so the lead it sees at the end of a cycle settles on
//! `target_lead`. The controller never writes more than one cycle's worth and
//! keeps no state of its own.

use tracing::warn;

use super::ring::{frame_distance, Cursors, RingWriter};
use crate::playback::PlaybackConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadController {
    target_lead_frames: usize,
    max_lead_frames: usize,
    frames_per_cycle: usize,
}

/// Outcome of one [`LeadController::plan`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadDecision {
    /// Frames the producer should generate and write this cycle.
    pub frames: usize,
    /// Lead in frames at decision time, after any safety reset.
    pub lead: usize,
    /// Whether the write cursor was snapped back this cycle.
    pub safety_reset: bool,
}

impl LeadController {
    pub fn new(target_lead_frames: usize, max_lead_frames: usize, frames_per_cycle: usize) -> Self {
        Self {
            target_lead_frames,
            max_lead_frames,
            frames_per_cycle,
        }
    }

    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self::new(
            config.target_lead_frames(),
            config.max_lead_frames(),
            config.frames_per_cycle(),
        )
    }

    pub fn target_lead_frames(&self) -> usize {
        self.target_lead_frames
    }

    pub fn max_lead_frames(&self) -> usize {
        self.max_lead_frames
    }

    pub fn frames_per_cycle(&self) -> usize {
        self.frames_per_cycle
    }

    /// Decide this cycle's write size, snapping the write cursor back first
    /// if the lead has grown past `max_lead_frames`.
    pub fn plan(&self, writer: &mut RingWriter) -> LeadDecision {
        let capacity = writer.capacity_frames();
        let mut cursors = writer.cursors();
        let mut lead = cursors.lead(capacity);
        let mut safety_reset = false;

        if lead > self.max_lead_frames {
            cursors = self.snap_back(writer, cursors.read);
            let snapped_lead = cursors.lead(capacity);
            warn!(
                lead,
                max_lead = self.max_lead_frames,
                snapped_lead,
                "lead above ceiling, write cursor snapped back"
            );
            lead = snapped_lead;
            safety_reset = true;
        }

        LeadDecision {
            frames: self.budget(cursors, capacity),
            lead,
            safety_reset,
        }
    }

    /// Move the write cursor to `read + target_lead / 2`.
    ///
    /// A callback that loaded the old write cursor may finish its read after
    /// the snap. If the reader has already moved past the snap point, snap
    /// again from where it is now so the lead cannot wrap to nearly the full
    /// capacity. A read still in flight after the second check is only caught
    /// when `target_lead / 2` exceeds the device block.
    fn snap_back(&self, writer: &mut RingWriter, read: usize) -> Cursors {
        let capacity = writer.capacity_frames();
        let half = self.target_lead_frames / 2;
        let mut write = (read + half) % capacity;
        writer.snap_write_cursor(write);

        let now = writer.cursors();
        if frame_distance(read, now.read, capacity) > half {
            write = (now.read + half) % capacity;
            writer.snap_write_cursor(write);
        }
        Cursors { write, read: now.read }
    }

    /// Frames to write for a cursor pair, without the safety reset.
    pub fn budget(&self, cursors: Cursors, capacity_frames: usize) -> usize {
        let lead = cursors.lead(capacity_frames);
        let target_write = (cursors.read + self.write_target_frames(capacity_frames)) % capacity_frames;
        let needed = frame_distance(cursors.write, target_write, capacity_frames);

        let lead_after = frame_distance(
            cursors.read,
            (cursors.write + needed) % capacity_frames,
            capacity_frames,
        );
        if lead_after < lead {
            return 0;
        }

        needed.min(self.frames_per_cycle)
    }

    fn write_target_frames(&self, capacity_frames: usize) -> usize {
        (self.target_lead_frames + self.frames_per_cycle).min(capacity_frames - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{stereo_ring, CHANNELS};

    // 10 ms target @ 44.1 kHz, 60 Hz cycle.
    const TARGET: usize = 441;
    const CYCLE: usize = 735;
    const MAX: usize = 2_205;
    const CAPACITY: usize = 9_600;

    fn controller() -> LeadController {
        LeadController::new(TARGET, MAX, CYCLE)
    }

    fn fill(writer: &mut RingWriter, frames: usize) {
        let block = vec![0.1f32; frames * CHANNELS];
        assert_eq!(writer.write(&block), frames);
    }

    #[test]
    fn steady_state_cycle_restores_target_lead() {
        let (mut writer, mut reader) = stereo_ring(CAPACITY);
        writer.reset(TARGET);

        let decision = controller().plan(&mut writer);
        assert_eq!(decision, LeadDecision { frames: CYCLE, lead: TARGET, safety_reset: false });
        fill(&mut writer, decision.frames);

        let mut hal = vec![0.0; CYCLE * CHANNELS];
        assert_eq!(reader.read(&mut hal), CYCLE);
        assert_eq!(reader.available(), TARGET);
    }

    #[test]
    fn never_budgets_more_than_one_cycle() {
        let (mut writer, _reader) = stereo_ring(CAPACITY);
        let decision = controller().plan(&mut writer);
        assert_eq!(decision.lead, 0);
        assert_eq!(decision.frames, CYCLE);
    }

    #[test]
    fn tops_up_to_write_target_when_close() {
        let (mut writer, _reader) = stereo_ring(CAPACITY);
        fill(&mut writer, 1_000);
        assert_eq!(controller().plan(&mut writer).frames, TARGET + CYCLE - 1_000);
    }

    #[test]
    fn skips_cycle_when_already_ahead_of_target() {
        let (mut writer, _reader) = stereo_ring(CAPACITY);
        fill(&mut writer, 1_500);

        let decision = controller().plan(&mut writer);
        assert_eq!(decision.frames, 0);
        assert!(!decision.safety_reset);
        assert_eq!(writer.available(), 1_500);
    }

    #[test]
    fn safety_reset_bounds_lead_by_target() {
        let (mut writer, mut reader) = stereo_ring(CAPACITY);
        fill(&mut writer, 3_000);
        let mut hal = vec![0.0; 100 * CHANNELS];
        reader.read(&mut hal);
        assert!(writer.available() > MAX);

        let decision = controller().plan(&mut writer);
        assert!(decision.safety_reset);
        assert_eq!(decision.lead, TARGET / 2);
        assert!(writer.available() <= TARGET);
        assert_eq!(writer.cursors().write, 100 + TARGET / 2);
        assert_eq!(decision.frames, CYCLE);
    }

    #[test]
    fn snap_follows_a_reader_that_overtook_it() {
        let (mut writer, mut reader) = stereo_ring(CAPACITY);
        fill(&mut writer, 3_000);
        let mut hal = vec![0.0; 100 * CHANNELS];
        reader.read(&mut hal);
        let stale_read = writer.cursors().read;

        // A 400-frame callback completes between loading the cursors and the snap.
        let mut block = vec![0.0; 400 * CHANNELS];
        assert_eq!(reader.read(&mut block), 400);

        let cursors = controller().snap_back(&mut writer, stale_read);
        assert_eq!(cursors.read, 500);
        assert_eq!(cursors.write, 500 + TARGET / 2);
        assert_eq!(writer.available(), TARGET / 2);
        assert_eq!(reader.available(), TARGET / 2);
    }

    #[test]
    fn snap_keeps_its_point_when_reader_stays_behind_it() {
        let (mut writer, mut reader) = stereo_ring(CAPACITY);
        fill(&mut writer, 3_000);
        let mut hal = vec![0.0; 100 * CHANNELS];
        reader.read(&mut hal);

        let mut small = vec![0.0; 50 * CHANNELS];
        reader.read(&mut small);

        let cursors = controller().snap_back(&mut writer, 100);
        assert_eq!(cursors.write, 100 + TARGET / 2);
        assert_eq!(writer.available(), TARGET / 2 - 50);
    }

    #[test]
    fn budget_handles_wrapped_cursors() {
        let c = controller();
        let cursors = Cursors { write: 100, read: CAPACITY - 300 };
        assert_eq!(cursors.lead(CAPACITY), 400);
        assert_eq!(c.budget(cursors, CAPACITY), CYCLE);

        let ahead = Cursors { write: 1_000, read: CAPACITY - 300 };
        assert_eq!(c.budget(ahead, CAPACITY), 0);
    }

    #[test]
    fn from_config_uses_derived_frame_counts() {
        let config = PlaybackConfig::default();
        let c = LeadController::from_config(&config);
        assert_eq!(c.target_lead_frames(), 4_410);
        assert_eq!(c.max_lead_frames(), 22_050);
        assert_eq!(c.frames_per_cycle(), 735);
    }
}
