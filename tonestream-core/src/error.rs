use std::time::Duration;

use thiserror::Error;

/// Lifecycle and setup errors produced by tonestream-core.
#[derive(Debug, Error)]
pub enum ToneError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("failed to spawn {name} worker: {source}")]
    WorkerSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ToneError>;

/// Recoverable faults observed inside the streaming workers.
///
/// None of these stop playback. They are counted and logged where they occur
/// and never cross the worker boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamFault {
    #[error("sink accepted nothing within {timeout:?}")]
    TransferTimeout { timeout: Duration },

    #[error("short transfer: sink accepted {written} of {requested} bytes")]
    PartialTransfer { written: usize, requested: usize },

    #[error("no handoff signal within {timeout:?}")]
    SynchronizationTimeout { timeout: Duration },
}

/// Errors reported by an [`AudioSink`](crate::audio::AudioSink).
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transfer timed out after {0:?}")]
    Timeout(Duration),

    #[error("sink is closed")]
    Closed,

    #[error("buffer length {len} is not a whole number of frames")]
    Misaligned { len: usize },

    #[error("sink IO error: {0}")]
    Io(String),
}

impl From<hound::Error> for SinkError {
    fn from(e: hound::Error) -> Self {
        SinkError::Io(e.to_string())
    }
}
