use std::fmt;

/// Error taxonomy for the whole crate. Every fallible public operation returns
/// [`TelloResult`] rather than panicking on a remote-protocol condition.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TelloError {
    /// A socket could not be bound, or `connect()` never observed a state
    /// packet within the handshake window.
    #[error("transport init failed: {0}")]
    TransportInit(String),

    /// A control command exhausted its retries without an `ok`, or a read
    /// command came back with an error marker.
    #[error("command {command:?} failed after {tries} attempt(s): {last_response}")]
    CommandFailed {
        command: String,
        last_response: String,
        tries: u32,
    },

    /// A caller-supplied parameter fell outside the documented range.
    #[error("invalid argument for {command:?}: {reason}")]
    InvalidArgument { command: String, reason: String },

    /// The video stream could not be opened within `frame_grab_timeout`, or
    /// the decoder aborted mid-stream.
    #[error("video init failed: {0}")]
    VideoInit(String),

    /// `get_<field>` was called for a key absent from the last state snapshot.
    #[error("state field {0:?} is not available yet")]
    StateUnavailable(String),

    /// Empty IP list handed to a swarm, or the IP file could not be read.
    #[error("swarm config error: {0}")]
    ConfigError(String),

    /// `Swarm::sync` did not rendezvous within the given timeout.
    #[error("swarm sync timed out")]
    SyncTimeout,
}

/// Convenience alias used throughout the crate.
pub type TelloResult<T> = Result<T, TelloError>;

impl TelloError {
    pub(crate) fn command_failed(command: impl Into<String>, last_response: impl Into<String>, tries: u32) -> Self {
        TelloError::CommandFailed {
            command: command.into(),
            last_response: last_response.into(),
            tries,
        }
    }

    pub(crate) fn invalid_argument(command: impl Into<String>, reason: impl fmt::Display) -> Self {
        TelloError::InvalidArgument {
            command: command.into(),
            reason: reason.to_string(),
        }
    }
}
