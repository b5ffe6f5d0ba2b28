use std::fmt;
use std::io;

/// Error taxonomy for the pipe and everything beneath it.
///
/// There is no `Ok` variant: fallible operations return `Result<T, PipeError>` and use
/// `Result::Ok` directly.
#[derive(Debug)]
pub enum PipeError {
    /// Unexpected condition that leaves the transport or pipe unusable (socket creation/bind
    /// failure, send attempted with no buffers).
    Fatal(String),
    /// The URI could not be resolved to any address, or named a protocol other than `udp`.
    InvalidSettings(String),
    /// Reserved operation (`pipe_flush`, `pipe_peek`, `pipe_info_get`).
    NotImplemented,
    /// `send_to` returned an error for the last packet of a message.
    SendError(io::Error),
    /// The requested wait elapsed without a matching event.
    Timeout,
}

impl fmt::Display for PipeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeError::Fatal(msg) => write!(f, "fatal transport error: {}", msg),
            PipeError::InvalidSettings(msg) => write!(f, "invalid settings: {}", msg),
            PipeError::NotImplemented => write!(f, "operation not implemented"),
            PipeError::SendError(err) => write!(f, "send error: {}", err),
            PipeError::Timeout => write!(f, "timed out waiting for a matching record"),
        }
    }
}

impl std::error::Error for PipeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipeError::SendError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for PipeError {
    fn from(err: io::Error) -> Self {
        PipeError::Fatal(err.to_string())
    }
}

pub type PipeResult<T> = Result<T, PipeError>;
