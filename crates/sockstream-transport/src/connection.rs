use std::io::{self, Read};
use std::mem::MaybeUninit;
use std::net::{Shutdown, SocketAddr, TcpStream};
#[cfg(not(unix))]
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socket2::SockRef;
use tracing::debug;

use crate::traits::{MsgFlags, RawSocket, NO_FLAGS};

/// Flags OR-ed into every send so a closed peer surfaces as `EPIPE`
/// instead of `SIGPIPE`.
#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: MsgFlags = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: MsgFlags = NO_FLAGS;

/// An established TCP connection; the OS handle behind a transport.
///
/// The handle is closed exactly once, when the `Connection` is dropped.
/// Share it as `Arc<Connection>` to give it several owners.
pub struct Connection {
    stream: TcpStream,
    // Windows cannot query the blocking mode of a socket, so it is mirrored.
    #[cfg(not(unix))]
    nonblocking: AtomicBool,
}

impl Connection {
    /// Take ownership of a connected stream.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            #[cfg(not(unix))]
            nonblocking: AtomicBool::new(false),
        }
    }

    /// Borrow the underlying stream.
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Shut down one or both halves of the connection without closing it.
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        self.stream.shutdown(how)
    }
}

impl From<TcpStream> for Connection {
    fn from(stream: TcpStream) -> Self {
        Self::new(stream)
    }
}

impl RawSocket for Connection {
    fn send_some(&self, buf: &[u8], flags: MsgFlags) -> io::Result<usize> {
        SockRef::from(&self.stream).send_with_flags(buf, flags | SEND_FLAGS)
    }

    fn recv_some(&self, buf: &mut [u8], flags: MsgFlags) -> io::Result<usize> {
        if flags == NO_FLAGS {
            return (&self.stream).read(buf);
        }
        // SAFETY: `MaybeUninit<u8>` has the layout of `u8`, and `recv` only
        // ever writes initialized bytes into the slice.
        let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
        SockRef::from(&self.stream).recv_with_flags(uninit, flags)
    }

    fn peek_some(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.peek(buf)
    }

    #[cfg(unix)]
    fn is_nonblocking(&self) -> io::Result<bool> {
        use std::os::fd::AsRawFd;

        // SAFETY: the descriptor is open for the lifetime of `self.stream`.
        let flags = unsafe { libc::fcntl(self.stream.as_raw_fd(), libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(flags & libc::O_NONBLOCK != 0)
    }

    #[cfg(not(unix))]
    fn is_nonblocking(&self) -> io::Result<bool> {
        Ok(self.nonblocking.load(Ordering::Acquire))
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.stream.set_nonblocking(nonblocking)?;
        #[cfg(not(unix))]
        self.nonblocking.store(nonblocking, Ordering::Release);
        Ok(())
    }

    #[cfg(unix)]
    fn bytes_queued(&self) -> io::Result<usize> {
        use std::os::fd::AsRawFd;

        let mut pending: libc::c_int = 0;
        // SAFETY: `pending` is a valid writable `c_int` and the descriptor is
        // an open socket owned by this connection.
        let rc = unsafe { libc::ioctl(self.stream.as_raw_fd(), libc::FIONREAD, &mut pending) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(pending.max(0) as usize)
    }

    #[cfg(windows)]
    fn bytes_queued(&self) -> io::Result<usize> {
        use std::os::windows::io::AsRawSocket;
        use windows_sys::Win32::Networking::WinSock::{ioctlsocket, FIONREAD};

        let mut pending: u32 = 0;
        // SAFETY: `pending` is a valid writable `u32` and the socket is open
        // for the lifetime of `self.stream`.
        let rc = unsafe { ioctlsocket(self.stream.as_raw_socket() as usize, FIONREAD, &mut pending) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(pending as usize)
    }

    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        debug!(peer = ?self.stream.peer_addr().ok(), "closing connection");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.stream.peer_addr().ok())
            .field("local", &self.stream.local_addr().ok())
            .finish()
    }
}
