//! Fixed-capacity interleaved stereo ring with two independently published cursors.
//!
//! ## Ownership
//!
//! `stereo_ring` hands out exactly one [`RingWriter`] (producer thread) and one
//! [`RingReader`] (audio callback thread). Each half is the only code that ever
//! stores to its own cursor; it reads the foreign cursor with an acquire load.
//! [`RingObserver`] is a cheap read-only view for diagnostics.
//!
//! Samples are kept as `f32` bit patterns in `AtomicU32` slots, so the copy
//! in/out is plain relaxed loads and stores: no locks, no allocation, and no
//! `unsafe`. Data written before a cursor publish (release) is visible to the
//! other side after it loads that cursor (acquire).
//!
//! One slot is always kept free so that `write == read` unambiguously means
//! "empty": a ring of `capacity_frames` buffers at most `capacity_frames - 1`.

use std::sync::{
    atomic::{AtomicU32, AtomicUsize, Ordering},
    Arc,
};

use super::CHANNELS;

struct RingShared {
    /// `capacity_frames * CHANNELS` interleaved L/R samples.
    storage: Box<[AtomicU32]>,
    capacity_frames: usize,
    write_cursor: AtomicUsize,
    read_cursor: AtomicUsize,
}

impl RingShared {
    fn cursors(&self) -> Cursors {
        Cursors {
            write: self.write_cursor.load(Ordering::Acquire),
            read: self.read_cursor.load(Ordering::Acquire),
        }
    }
}

/// Snapshot of both cursor positions, in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursors {
    pub write: usize,
    pub read: usize,
}

impl Cursors {
    /// Unread frames between the read and write cursors.
    pub fn lead(&self, capacity_frames: usize) -> usize {
        frame_distance(self.read, self.write, capacity_frames)
    }
}

/// Forward distance from `from` to `to` on a ring of `capacity_frames`.
#[inline]
pub fn frame_distance(from: usize, to: usize, capacity_frames: usize) -> usize {
    (to + capacity_frames - from) % capacity_frames
}

/// Allocate a zero-filled ring and split it into its writer and reader halves.
///
/// Capacities below 2 frames are raised to 2 (one usable frame).
pub fn stereo_ring(capacity_frames: usize) -> (RingWriter, RingReader) {
    let capacity_frames = capacity_frames.max(2);
    let storage = (0..capacity_frames * CHANNELS)
        .map(|_| AtomicU32::new(0))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let shared = Arc::new(RingShared {
        storage,
        capacity_frames,
        write_cursor: AtomicUsize::new(0),
        read_cursor: AtomicUsize::new(0),
    });

    (
        RingWriter {
            shared: Arc::clone(&shared),
        },
        RingReader { shared },
    )
}

#[inline]
fn store_samples(dst: &[AtomicU32], src: &[f32]) {
    for (slot, sample) in dst.iter().zip(src) {
        slot.store(sample.to_bits(), Ordering::Relaxed);
    }
}

#[inline]
fn load_samples(dst: &mut [f32], src: &[AtomicU32]) {
    for (sample, slot) in dst.iter_mut().zip(src) {
        *sample = f32::from_bits(slot.load(Ordering::Relaxed));
    }
}

/// Producer half. Owns the write cursor.
pub struct RingWriter {
    shared: Arc<RingShared>,
}

impl RingWriter {
    pub fn capacity_frames(&self) -> usize {
        self.shared.capacity_frames
    }

    pub fn cursors(&self) -> Cursors {
        self.shared.cursors()
    }

    /// Frames currently buffered and not yet consumed.
    pub fn available(&self) -> usize {
        self.cursors().lead(self.shared.capacity_frames)
    }

    /// Frames that can be written without touching unread data.
    pub fn free_frames(&self) -> usize {
        self.shared.capacity_frames - 1 - self.available()
    }

    /// Copy interleaved stereo `samples` in at the write cursor, then publish
    /// the advanced cursor.
    ///
    /// Writes are truncated to [`free_frames`](Self::free_frames); the return
    /// value is the number of frames actually written. A trailing half frame
    /// in `samples` is ignored.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let shared = &self.shared;
        let capacity = shared.capacity_frames;
        let write = shared.write_cursor.load(Ordering::Acquire);
        let read = shared.read_cursor.load(Ordering::Acquire);

        let free = capacity - 1 - frame_distance(read, write, capacity);
        let frames = (samples.len() / CHANNELS).min(free);
        if frames == 0 {
            return 0;
        }

        let first = frames.min(capacity - write);
        store_samples(
            &shared.storage[write * CHANNELS..(write + first) * CHANNELS],
            &samples[..first * CHANNELS],
        );
        let second = frames - first;
        if second > 0 {
            store_samples(
                &shared.storage[..second * CHANNELS],
                &samples[first * CHANNELS..frames * CHANNELS],
            );
        }

        shared
            .write_cursor
            .store((write + frames) % capacity, Ordering::Release);
        frames
    }

    /// Move the write cursor directly, discarding or re-exposing frames
    /// without copying. Used by the lead controller's safety reset.
    pub(crate) fn snap_write_cursor(&mut self, cursor: usize) {
        self.shared
            .write_cursor
            .store(cursor % self.shared.capacity_frames, Ordering::Release);
    }

    /// Zero-fill storage and move the cursors to `read = 0`,
    /// `write = write_offset`, pre-seeding `write_offset` frames of silence.
    ///
    /// Must only be called while the reader is idle (playback inactive).
    pub fn reset(&mut self, write_offset: usize) {
        for slot in self.shared.storage.iter() {
            slot.store(0, Ordering::Relaxed);
        }
        let capacity = self.shared.capacity_frames;
        self.shared.read_cursor.store(0, Ordering::Release);
        self.shared
            .write_cursor
            .store(write_offset.min(capacity - 1), Ordering::Release);
    }

    pub fn observer(&self) -> RingObserver {
        RingObserver {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl std::fmt::Debug for RingWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingWriter")
            .field("capacity_frames", &self.shared.capacity_frames)
            .field("cursors", &self.cursors())
            .finish()
    }
}

/// Consumer half. Owns the read cursor. Every method is real-time safe.
pub struct RingReader {
    shared: Arc<RingShared>,
}

impl RingReader {
    pub fn capacity_frames(&self) -> usize {
        self.shared.capacity_frames
    }

    pub fn available(&self) -> usize {
        self.shared.cursors().lead(self.shared.capacity_frames)
    }

    /// Read up to `dest.len() / 2` frames into `dest`, advancing the read
    /// cursor by exactly the frames copied. Returns that count.
    ///
    /// Never blocks and never allocates. Samples in `dest` past the returned
    /// frame count are left untouched.
    pub fn read(&mut self, dest: &mut [f32]) -> usize {
        let shared = &self.shared;
        let capacity = shared.capacity_frames;
        let read = shared.read_cursor.load(Ordering::Acquire);
        let write = shared.write_cursor.load(Ordering::Acquire);

        let frames = (dest.len() / CHANNELS).min(frame_distance(read, write, capacity));
        if frames == 0 {
            return 0;
        }

        let first = frames.min(capacity - read);
        load_samples(
            &mut dest[..first * CHANNELS],
            &shared.storage[read * CHANNELS..(read + first) * CHANNELS],
        );
        let second = frames - first;
        if second > 0 {
            load_samples(
                &mut dest[first * CHANNELS..frames * CHANNELS],
                &shared.storage[..second * CHANNELS],
            );
        }

        shared
            .read_cursor
            .store((read + frames) % capacity, Ordering::Release);
        frames
    }

    pub fn observer(&self) -> RingObserver {
        RingObserver {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl std::fmt::Debug for RingReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingReader")
            .field("capacity_frames", &self.shared.capacity_frames)
            .finish_non_exhaustive()
    }
}

/// Read-only view of the cursors, safe to poll from any thread.
#[derive(Clone)]
pub struct RingObserver {
    shared: Arc<RingShared>,
}

impl RingObserver {
    pub fn capacity_frames(&self) -> usize {
        self.shared.capacity_frames
    }

    pub fn cursors(&self) -> Cursors {
        self.shared.cursors()
    }

    pub fn available(&self) -> usize {
        self.cursors().lead(self.shared.capacity_frames)
    }
}

impl std::fmt::Debug for RingObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingObserver")
            .field("cursors", &self.cursors())
            .finish()
    }
}
