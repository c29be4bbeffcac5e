use std::io;
use std::net::SocketAddr;
use std::panic::Location;

/// Errors that can occur in socket transport operations.
///
/// A graceful close by the peer is never an error; it is reported through
/// [`Transfer::end_of_stream`](crate::Transfer::end_of_stream).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Host name resolution failed.
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: io::Error,
    },

    /// Resolution succeeded but yielded no address.
    #[error("no address found for {host}:{port}")]
    NoAddress { host: String, port: u16 },

    /// Failed to create the socket.
    #[error("failed to create socket for {addr}: {source}")]
    Socket { addr: SocketAddr, source: io::Error },

    /// Failed to connect to the resolved address.
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },

    /// Failed to apply a socket option.
    #[error("failed to set {option}: {source}")]
    SetOption {
        option: &'static str,
        source: io::Error,
    },

    /// A send call failed outright.
    #[error("send failed after {transferred} bytes at {location}: {source}")]
    Send {
        transferred: usize,
        source: io::Error,
        location: &'static Location<'static>,
    },

    /// A receive call failed outright (including timeouts).
    #[error("receive failed after {transferred} bytes at {location}: {source}")]
    Receive {
        transferred: usize,
        source: io::Error,
        location: &'static Location<'static>,
    },

    /// The non-blocking liveness probe failed.
    #[error("liveness probe failed at {location}: {source}")]
    Probe {
        source: io::Error,
        location: &'static Location<'static>,
    },

    /// The socket accepted zero bytes without reporting an error.
    #[error("{operation} made no progress after {transferred} bytes at {location}")]
    Stalled {
        operation: &'static str,
        transferred: usize,
        location: &'static Location<'static>,
    },
}

impl TransportError {
    #[track_caller]
    pub(crate) fn send(transferred: usize, source: io::Error) -> Self {
        Self::Send {
            transferred,
            source,
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub(crate) fn receive(transferred: usize, source: io::Error) -> Self {
        Self::Receive {
            transferred,
            source,
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub(crate) fn probe(source: io::Error) -> Self {
        Self::Probe {
            source,
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub(crate) fn stalled(operation: &'static str, transferred: usize) -> Self {
        Self::Stalled {
            operation,
            transferred,
            location: Location::caller(),
        }
    }

    /// The underlying OS error, if this failure came from a system call.
    pub fn io_source(&self) -> Option<&io::Error> {
        match self {
            Self::Resolve { source, .. }
            | Self::Socket { source, .. }
            | Self::Connect { source, .. }
            | Self::SetOption { source, .. }
            | Self::Send { source, .. }
            | Self::Receive { source, .. }
            | Self::Probe { source, .. } => Some(source),
            Self::NoAddress { .. } | Self::Stalled { .. } => None,
        }
    }

    /// Raw OS error code (`errno` / `WSAGetLastError`), when available.
    pub fn code(&self) -> Option<i32> {
        self.io_source().and_then(io::Error::raw_os_error)
    }

    /// Source location of the transfer call that failed.
    pub fn location(&self) -> Option<&'static Location<'static>> {
        match self {
            Self::Send { location, .. }
            | Self::Receive { location, .. }
            | Self::Probe { location, .. }
            | Self::Stalled { location, .. } => Some(location),
            _ => None,
        }
    }

    /// Number of bytes moved before the failure, for transfer errors.
    pub fn transferred(&self) -> usize {
        match self {
            Self::Send { transferred, .. }
            | Self::Receive { transferred, .. }
            | Self::Stalled { transferred, .. } => *transferred,
            _ => 0,
        }
    }

    /// Returns true if the OS timeout elapsed before the transfer completed.
    pub fn is_timeout(&self) -> bool {
        self.io_source().is_some_and(|err| {
            matches!(
                err.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            )
        })
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
