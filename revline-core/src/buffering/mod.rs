//! Lock-free stereo ring buffer and the cursor-chasing lead controller.
//!
//! The producer thread holds the [`RingWriter`] and asks the
//! [`LeadController`] how much to write each cycle; the audio callback holds
//! the [`RingReader`]. Neither side ever blocks the other.

pub mod lead;
pub mod ring;

pub use lead::{LeadController, LeadDecision};
pub use ring::{frame_distance, stereo_ring, Cursors, RingObserver, RingReader, RingWriter};

/// Interleaved stereo, always.
pub const CHANNELS: usize = 2;

/// Default ring capacity: 96 000 frames ≈ 2.18 s at 44.1 kHz.
pub const DEFAULT_CAPACITY_FRAMES: usize = 96_000;
