use thiserror::Error;

/// All errors produced by keshra-core.
#[derive(Debug, Error)]
pub enum KeshraError {
    #[error("voice access requires authorization")]
    AuthorizationRequired,

    #[error("microphone permission denied")]
    MicPermissionDenied,

    #[error("no microphone available")]
    NoInputDevice,

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("voice channel failure: {0}")]
    Channel(String),

    #[error("connection attempt superseded by a disconnect or a newer connect")]
    ConnectSuperseded,

    #[error("malformed audio chunk: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("chat history error: {0}")]
    History(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KeshraError {
    /// True for the connect-time failures caused by the audio hardware
    /// itself (as opposed to authorization or the network channel).
    pub fn is_device_unavailable(&self) -> bool {
        matches!(
            self,
            KeshraError::MicPermissionDenied
                | KeshraError::NoInputDevice
                | KeshraError::AudioDevice(_)
                | KeshraError::AudioStream(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, KeshraError>;
