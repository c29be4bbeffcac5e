use sockstream_transport::TransportError;

/// Errors that can occur while framing messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The underlying transfer failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The payload does not fit the 32-bit signed length prefix.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The peer sent a negative length prefix.
    #[error("invalid frame length {0}")]
    InvalidLength(i32),

    /// The destination container refused to grow to the declared length.
    #[error("failed to resize receive buffer to {len} bytes: {source}")]
    Resize {
        len: usize,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, FrameError>;
