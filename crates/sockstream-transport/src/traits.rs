use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Flags forwarded to the OS `send`/`recv` calls.
pub type MsgFlags = std::ffi::c_int;

/// No send/receive flags.
pub const NO_FLAGS: MsgFlags = 0;

/// Outcome of a low-level transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transfer {
    /// Bytes actually moved.
    pub bytes: usize,
    /// True iff the peer performed an orderly close during the call.
    pub end_of_stream: bool,
}

impl Transfer {
    /// A transfer that moved every requested byte.
    pub fn complete(bytes: usize) -> Self {
        Self {
            bytes,
            end_of_stream: false,
        }
    }

    /// A transfer cut short by the peer closing the connection.
    pub fn closed(bytes: usize) -> Self {
        Self {
            bytes,
            end_of_stream: true,
        }
    }
}

/// Result of a non-blocking liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    /// At least one byte can be received without blocking.
    pub has_data: bool,
    /// Bytes queued by the OS plus bytes held in the lookahead FIFO.
    pub available_bytes: usize,
    /// False once the peer has closed or reset the connection.
    pub connected: bool,
}

/// The socket primitives a [`Transport`](crate::Transport) is built over.
///
/// [`Connection`](crate::Connection) is the TCP implementation. Other
/// implementations can be supplied through
/// [`Transport::with_socket`](crate::Transport::with_socket).
///
/// Methods take `&self` so one socket can be shared behind an `Arc`; the
/// socket is closed when the last owner drops it.
pub trait RawSocket: Send + Sync + std::fmt::Debug {
    /// Issue one `send`; may move fewer bytes than requested.
    fn send_some(&self, buf: &[u8], flags: MsgFlags) -> io::Result<usize>;

    /// Issue one `recv`; `Ok(0)` means the peer closed the connection.
    fn recv_some(&self, buf: &mut [u8], flags: MsgFlags) -> io::Result<usize>;

    /// Read without consuming. `Ok(0)` means the peer closed the connection.
    fn peek_some(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Whether the socket is currently in non-blocking mode.
    fn is_nonblocking(&self) -> io::Result<bool>;

    /// Switch between blocking and non-blocking mode.
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Bytes the OS has queued for receive.
    fn bytes_queued(&self) -> io::Result<usize>;

    /// Apply the same timeout to sends and receives (`None` = no timeout).
    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Address of the remote peer.
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    /// Local address of the socket.
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}
