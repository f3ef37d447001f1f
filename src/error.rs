use thiserror::Error;

/// Failure classes of the notifier.
///
/// Every variant except `Transport` raised from inside the publisher is fatal:
/// the pipeline tears down and the process exits.
#[derive(Debug, Error)]
pub enum NotifierError {
    /// Unsupported device or invalid runtime parameters. Raised before the tick loop.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Capture could not open, produced no frames, or produced a malformed frame.
    #[error("source error: {0}")]
    Source(String),

    /// Model load failure, execution fault, or await timeout.
    #[error("inference error: {0}")]
    Inference(String),

    /// Message bus connect/publish failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl NotifierError {
    /// Process exit code for a fatal error of this class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 2,
            Self::Source(_) | Self::Inference(_) | Self::Transport(_) => 1,
        }
    }

    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NotifierError>;
