use std::io;

use sockstream_frame::FrameError;
use sockstream_transport::TransportError;

/// Errors surfaced by the buffered stream adapters.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Framing or the transfer beneath it failed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// An unframed transfer failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame read as text was not valid UTF-8.
    #[error("received text is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The peer closed the connection before pending output was sent.
    #[error("peer closed the connection")]
    Closed,

    /// An earlier error left the stream unusable; call `clear` to retry.
    #[error("stream is in a failed state")]
    Failed,

    /// The buffer arena could not be mapped or grown.
    #[error("buffer allocation failed: {0}")]
    Arena(#[source] io::Error),
}

impl StreamError {
    /// Returns true if a socket timeout elapsed.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Transport(err) | Self::Frame(FrameError::Transport(err)) => err.is_timeout(),
            _ => false,
        }
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match &err {
            _ if err.is_timeout() => io::ErrorKind::TimedOut,
            StreamError::Closed => io::ErrorKind::BrokenPipe,
            StreamError::Arena(source) => source.kind(),
            StreamError::InvalidUtf8(_)
            | StreamError::Frame(FrameError::InvalidLength(_))
            | StreamError::Frame(FrameError::PayloadTooLarge { .. }) => io::ErrorKind::InvalidData,
            StreamError::Transport(source) | StreamError::Frame(FrameError::Transport(source)) => {
                source.io_source().map_or(io::ErrorKind::Other, io::Error::kind)
            }
            StreamError::Frame(FrameError::Resize { source, .. }) => source.kind(),
            StreamError::Failed => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_maps_to_broken_pipe() {
        let err: io::Error = StreamError::Closed.into();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(err.into_inner().unwrap().is::<StreamError>());
    }

    #[test]
    fn bad_length_maps_to_invalid_data() {
        let err: io::Error = StreamError::from(FrameError::InvalidLength(-3)).into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn arena_failure_keeps_os_kind() {
        let err: io::Error = StreamError::Arena(io::Error::from(io::ErrorKind::OutOfMemory)).into();
        assert_eq!(err.kind(), io::ErrorKind::OutOfMemory);
    }
}
