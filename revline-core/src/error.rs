use thiserror::Error;

/// All errors produced by revline-core.
#[derive(Debug, Error)]
pub enum RevlineError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("invalid playback config: {0}")]
    InvalidConfig(String),

    #[error("audio source error: {0}")]
    Source(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("engine script not found: {path}")]
    ScriptNotFound { path: std::path::PathBuf },

    #[error("playback is already running")]
    AlreadyRunning,

    #[error("playback is not running")]
    NotRunning,

    #[error("producer thread did not exit within {0:?}")]
    StopTimeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RevlineError>;
