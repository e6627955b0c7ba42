//! # revline-core
//!
//! Real-time playback SDK for generated engine audio.
//!
//! ## Architecture
//!
//! ```text
//! AudioSource ─► Producer(spawn_blocking, 60 Hz) ─► stereo ring ─► RenderCallback ─► cpal
//!                     │        ▲                       │
//!                     │   LeadController          RingObserver
//!                     │   (cursor chasing)             │
//!                     ▼                           BufferHealth
//!         broadcast::Sender<BufferReportEvent>
//! ```
//!
//! The producer decides each cycle how many frames to generate so that the
//! lead (audio buffered ahead of the hardware) stays near its target. The
//! audio callback never locks or allocates; it reads what is there and
//! zero-fills the rest.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod playback;
pub mod source;

// Convenience re-exports for downstream crates
pub use diagnostics::{BufferHealth, BufferStatus, DiagnosticsSnapshot};
pub use error::RevlineError;
pub use events::{BufferReportEvent, SessionStatus, SessionStatusEvent};
pub use playback::{PlaybackConfig, PlaybackSession};
pub use source::{
    AudioSource, ControlValue, EngineSimulator, EngineSource, SineSource, SourceHandle, StubEngine,
};
