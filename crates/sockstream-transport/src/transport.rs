use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, trace, warn};

use crate::config::{to_socket_timeout, ReceiveMode, TransportConfig};
use crate::connection::Connection;
use crate::error::{Result, TransportError};
use crate::traits::{Liveness, MsgFlags, RawSocket, Transfer};

/// A blocking, connected byte transport.
///
/// Sends and receives move exactly the requested number of bytes, retrying
/// partial OS transfers, unless the peer closes the connection first. An
/// orderly close is reported through [`Transfer::end_of_stream`], never as an
/// error.
///
/// Bytes handed to [`add_receive_buffer`](Self::add_receive_buffer) are
/// delivered before anything read from the socket.
#[derive(Debug)]
pub struct Transport {
    socket: Arc<dyn RawSocket>,
    config: TransportConfig,
    lookahead: VecDeque<Bytes>,
}

impl Transport {
    /// Resolve `host`, connect to it and apply `config`.
    ///
    /// IPv4 addresses are preferred when the name resolves to both families.
    /// A nonzero timeout also bounds the connect itself.
    pub fn dial(host: &str, port: u16, config: TransportConfig) -> Result<Self> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Resolve {
                host: host.to_string(),
                port,
                source,
            })?
            .collect();

        let addr = addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| TransportError::NoAddress {
                host: host.to_string(),
                port,
            })?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|source| TransportError::Socket { addr, source })?;

        let connected = match config.socket_timeout() {
            Some(timeout) => socket.connect_timeout(&addr.into(), timeout),
            None => socket.connect(&addr.into()),
        };
        connected.map_err(|source| {
            warn!(%addr, error = %source, "connect failed");
            TransportError::Connect { addr, source }
        })?;

        info!(%addr, host, "connected");
        let stream: TcpStream = socket.into();
        Self::with_socket(Arc::new(Connection::new(stream)), config)
    }

    /// Wrap an already-connected stream, typically one returned by `accept`.
    pub fn adopt(stream: TcpStream, config: TransportConfig) -> Result<Self> {
        debug!(peer = ?stream.peer_addr().ok(), "adopting connection");
        // Accepted sockets can inherit a non-blocking listener's mode.
        stream
            .set_nonblocking(false)
            .map_err(|source| TransportError::SetOption {
                option: "blocking mode",
                source,
            })?;
        Self::with_socket(Arc::new(Connection::new(stream)), config)
    }

    /// Build a transport over any [`RawSocket`] implementation.
    pub fn with_socket(socket: Arc<dyn RawSocket>, config: TransportConfig) -> Result<Self> {
        socket
            .set_timeout(config.socket_timeout())
            .map_err(|source| TransportError::SetOption {
                option: "timeout",
                source,
            })?;

        Ok(Self {
            socket,
            config,
            lookahead: VecDeque::new(),
        })
    }

    /// Send every byte of `buf`.
    ///
    /// Returns early with `end_of_stream` set if the peer has closed the
    /// connection. A send that makes no progress without reporting an error
    /// fails with [`TransportError::Stalled`].
    #[track_caller]
    pub fn send_bytes(&mut self, buf: &[u8], flags: MsgFlags) -> Result<Transfer> {
        let mut sent = 0;
        while sent < buf.len() {
            match self.socket.send_some(&buf[sent..], flags) {
                Ok(0) => return Err(logged(TransportError::stalled("send", sent))),
                Ok(n) => sent += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    debug!(sent, "peer closed connection during send");
                    return Ok(Transfer::closed(sent));
                }
                Err(err) => return Err(logged(TransportError::send(sent, err))),
            }
        }

        trace!(bytes = sent, "sent");
        Ok(Transfer::complete(sent))
    }

    /// Fill `buf` completely, first from the lookahead FIFO, then from the
    /// socket.
    ///
    /// Blocks until the buffer is full, the peer closes the connection
    /// (`end_of_stream`), or the configured timeout elapses (an error for
    /// which [`TransportError::is_timeout`] returns true).
    #[track_caller]
    pub fn receive_bytes(&mut self, buf: &mut [u8], flags: MsgFlags) -> Result<Transfer> {
        let mut received = self.drain_lookahead(buf);
        while received < buf.len() {
            match self.socket.recv_some(&mut buf[received..], flags) {
                Ok(0) => {
                    debug!(received, "peer closed connection");
                    return Ok(Transfer::closed(received));
                }
                Ok(n) => received += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(logged(TransportError::receive(received, err))),
            }
        }

        trace!(bytes = received, "received");
        Ok(Transfer::complete(received))
    }

    /// Probe the connection without consuming data.
    ///
    /// The socket is switched to non-blocking mode for the duration of the
    /// probe and restored afterwards, whatever the outcome.
    #[track_caller]
    pub fn is_data_available(&self) -> Result<Liveness> {
        let buffered = self.lookahead_len();

        let _guard = match NonblockingGuard::enter(self.socket.as_ref()) {
            Ok(guard) => guard,
            Err(err) => return Err(logged(TransportError::probe(err))),
        };

        let mut probe = [0u8; 1];
        let peeked = loop {
            match self.socket.peek_some(&mut probe) {
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        let (readable, connected) = match peeked {
            Ok(0) => (false, false),
            Ok(_) => (true, true),
            Err(err) if err.kind() == ErrorKind::WouldBlock => (false, true),
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::NotConnected
                ) =>
            {
                debug!(error = %err, "probe found connection reset");
                (false, false)
            }
            Err(err) => return Err(logged(TransportError::probe(err))),
        };

        let queued = if readable {
            match self.socket.bytes_queued() {
                Ok(queued) => queued,
                Err(err) => return Err(logged(TransportError::probe(err))),
            }
        } else {
            0
        };

        Ok(Liveness {
            has_data: readable || buffered > 0,
            available_bytes: queued + buffered,
            connected,
        })
    }

    /// Queue bytes to be delivered ahead of the socket, in insertion order.
    pub fn add_receive_buffer(&mut self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return;
        }
        trace!(bytes = bytes.len(), "queued lookahead bytes");
        self.lookahead.push_back(bytes);
    }

    /// Bytes waiting in the lookahead FIFO.
    pub fn lookahead_len(&self) -> usize {
        self.lookahead.iter().map(Bytes::len).sum()
    }

    /// Apply a new send/receive timeout. `Duration::ZERO` blocks indefinitely.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.socket
            .set_timeout(to_socket_timeout(timeout))
            .map_err(|source| TransportError::SetOption {
                option: "timeout",
                source,
            })?;
        self.config.timeout = timeout;
        Ok(())
    }

    /// Current send/receive timeout.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Current receive resize policy.
    pub fn receive_mode(&self) -> ReceiveMode {
        self.config.receive_mode
    }

    /// Switch the receive resize policy.
    pub fn set_receive_mode(&mut self, receive_mode: ReceiveMode) {
        self.config.receive_mode = receive_mode;
    }

    /// Active configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The socket this transport is built over.
    pub fn socket(&self) -> &Arc<dyn RawSocket> {
        &self.socket
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.peer_addr()
    }

    /// Address of the local end.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn drain_lookahead(&mut self, buf: &mut [u8]) -> usize {
        let mut filled = 0;
        while filled < buf.len() {
            let Some(front) = self.lookahead.front_mut() else {
                break;
            };
            let n = front.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&front[..n]);
            filled += n;
            if n == front.len() {
                self.lookahead.pop_front();
            } else {
                front.advance(n);
            }
        }
        filled
    }
}

fn logged(err: TransportError) -> TransportError {
    warn!(error = %err, "transport failure");
    err
}

/// Puts a socket into non-blocking mode and restores blocking mode on drop,
/// if it was blocking to begin with.
struct NonblockingGuard<'a> {
    socket: &'a dyn RawSocket,
    restore: bool,
}

impl<'a> NonblockingGuard<'a> {
    fn enter(socket: &'a dyn RawSocket) -> std::io::Result<Self> {
        let already = socket.is_nonblocking()?;
        if !already {
            socket.set_nonblocking(true)?;
        }
        Ok(Self {
            socket,
            restore: !already,
        })
    }
}

impl Drop for NonblockingGuard<'_> {
    fn drop(&mut self) {
        if self.restore {
            if let Err(err) = self.socket.set_nonblocking(false) {
                warn!(error = %err, "failed to restore blocking mode");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    use super::*;
    use crate::traits::NO_FLAGS;

    fn pair(config: TransportConfig) -> (Transport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (Transport::adopt(client, config).unwrap(), server)
    }

    fn wait_for(transport: &Transport, pred: impl Fn(&Liveness) -> bool) -> Liveness {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let liveness = transport.is_data_available().unwrap();
            if pred(&liveness) || Instant::now() >= deadline {
                return liveness;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn dial_and_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let echo = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).unwrap();
            stream.write_all(&buf).unwrap();
        });

        let mut transport = Transport::dial("127.0.0.1", port, TransportConfig::default()).unwrap();
        assert_eq!(
            transport.send_bytes(b"hello", NO_FLAGS).unwrap(),
            Transfer::complete(5)
        );

        let mut buf = [0u8; 5];
        assert_eq!(
            transport.receive_bytes(&mut buf, NO_FLAGS).unwrap(),
            Transfer::complete(5)
        );
        assert_eq!(&buf, b"hello");
        echo.join().unwrap();
    }

    #[test]
    fn dial_refused_reports_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Transport::dial("127.0.0.1", port, TransportConfig::default()).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert!(err.code().is_some());
    }

    #[test]
    fn receive_reports_end_of_stream_mid_transfer() {
        let (mut transport, mut server) = pair(TransportConfig::default());
        server.write_all(b"abc").unwrap();
        drop(server);

        let mut buf = [0u8; 8];
        let transfer = transport.receive_bytes(&mut buf, NO_FLAGS).unwrap();
        assert_eq!(transfer, Transfer::closed(3));
        assert_eq!(&buf[..3], b"abc");

        let again = transport.receive_bytes(&mut buf, NO_FLAGS).unwrap();
        assert_eq!(again, Transfer::closed(0));
    }

    #[test]
    fn receive_times_out() {
        let config = TransportConfig::default().with_timeout(Duration::from_millis(50));
        let (mut transport, _server) = pair(config);

        let mut buf = [0u8; 4];
        let err = transport.receive_bytes(&mut buf, NO_FLAGS).unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {err}");
        assert!(matches!(err, TransportError::Receive { transferred: 0, .. }));
    }

    #[test]
    fn receive_blocks_until_data_arrives() {
        let (mut transport, mut server) = pair(TransportConfig::default());

        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            server.write_all(b"late").unwrap();
            server
        });

        let mut buf = [0u8; 4];
        let transfer = transport.receive_bytes(&mut buf, NO_FLAGS).unwrap();
        assert_eq!(transfer, Transfer::complete(4));
        assert_eq!(&buf, b"late");
        writer.join().unwrap();
    }

    #[test]
    fn lookahead_is_drained_before_socket() {
        let (mut transport, mut server) = pair(TransportConfig::default());
        transport.add_receive_buffer(Bytes::from_static(b"ab"));
        transport.add_receive_buffer(b"".to_vec());
        transport.add_receive_buffer(b"cd".to_vec());
        assert_eq!(transport.lookahead_len(), 4);
        server.write_all(b"ef").unwrap();

        let mut first = [0u8; 1];
        transport.receive_bytes(&mut first, NO_FLAGS).unwrap();
        assert_eq!(&first, b"a");

        let mut rest = [0u8; 5];
        let transfer = transport.receive_bytes(&mut rest, NO_FLAGS).unwrap();
        assert_eq!(transfer, Transfer::complete(5));
        assert_eq!(&rest, b"bcdef");
        assert_eq!(transport.lookahead_len(), 0);
    }

    #[test]
    fn liveness_peek_does_not_consume() {
        let (mut transport, mut server) = pair(TransportConfig::default());

        let idle = transport.is_data_available().unwrap();
        assert!(idle.connected);
        assert!(!idle.has_data);
        assert_eq!(idle.available_bytes, 0);

        server.write_all(b"xyz").unwrap();
        let ready = wait_for(&transport, |l| l.available_bytes == 3);
        assert!(ready.connected);
        assert!(ready.has_data);
        assert_eq!(ready.available_bytes, 3);
        assert!(!transport.socket().is_nonblocking().unwrap());

        let mut buf = [0u8; 3];
        transport.receive_bytes(&mut buf, NO_FLAGS).unwrap();
        assert_eq!(&buf, b"xyz");
    }

    #[test]
    fn liveness_reports_closed_peer() {
        let (transport, server) = pair(TransportConfig::default());
        drop(server);

        let closed = wait_for(&transport, |l| !l.connected);
        assert!(!closed.connected);
        assert!(!closed.has_data);
        assert!(!transport.socket().is_nonblocking().unwrap());
    }

    #[test]
    fn set_timeout_updates_config() {
        let (mut transport, _server) = pair(TransportConfig::default());
        transport.set_timeout(Duration::ZERO).unwrap();
        assert_eq!(transport.timeout(), Duration::ZERO);

        transport.set_receive_mode(ReceiveMode::FixedCapacity);
        assert_eq!(transport.config().receive_mode, ReceiveMode::FixedCapacity);
        assert_eq!(
            transport.peer_addr().unwrap(),
            transport.socket().peer_addr().unwrap()
        );
    }

    #[test]
    fn adopt_puts_socket_in_blocking_mode() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (_server, _) = listener.accept().unwrap();
        client.set_nonblocking(true).unwrap();

        let transport = Transport::adopt(client, TransportConfig::default()).unwrap();
        assert!(!transport.socket().is_nonblocking().unwrap());
    }

    #[test]
    fn connection_closes_when_last_owner_drops() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut server, _) = listener.accept().unwrap();
        server
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();

        let shared = Arc::new(Connection::new(client));
        let transport = Transport::with_socket(shared.clone(), TransportConfig::default()).unwrap();
        assert_eq!(Arc::strong_count(&shared), 2);
        drop(transport);

        let mut buf = [0u8; 1];
        let err = server.read(&mut buf).unwrap_err();
        assert!(
            matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut),
            "connection closed early: {err}"
        );

        drop(shared);
        server
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(server.read(&mut buf).unwrap(), 0);
    }

    /// Replays scripted OS results; falls back to "everything succeeds".
    #[derive(Debug, Default)]
    struct Scripted {
        sends: Mutex<VecDeque<io::Result<usize>>>,
        sent: Mutex<Vec<u8>>,
        recvs: Mutex<VecDeque<io::Result<Vec<u8>>>>,
        peeks: Mutex<VecDeque<io::Result<usize>>>,
        nonblocking: AtomicBool,
        queued: usize,
    }

    impl RawSocket for Scripted {
        fn send_some(&self, buf: &[u8], _flags: MsgFlags) -> io::Result<usize> {
            let step = self.sends.lock().unwrap().pop_front();
            let n = match step {
                Some(Ok(n)) => n.min(buf.len()),
                Some(Err(err)) => return Err(err),
                None => buf.len(),
            };
            self.sent.lock().unwrap().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn recv_some(&self, buf: &mut [u8], _flags: MsgFlags) -> io::Result<usize> {
            match self.recvs.lock().unwrap().pop_front() {
                Some(Ok(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(Err(err)) => Err(err),
                None => Ok(0),
            }
        }

        fn peek_some(&self, _buf: &mut [u8]) -> io::Result<usize> {
            self.peeks
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(io::Error::from(ErrorKind::WouldBlock)))
        }

        fn is_nonblocking(&self) -> io::Result<bool> {
            Ok(self.nonblocking.load(Ordering::SeqCst))
        }

        fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
            self.nonblocking.store(nonblocking, Ordering::SeqCst);
            Ok(())
        }

        fn bytes_queued(&self) -> io::Result<usize> {
            Ok(self.queued)
        }

        fn set_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
    }

    fn scripted(socket: Scripted) -> (Transport, Arc<Scripted>) {
        let socket = Arc::new(socket);
        let transport = Transport::with_socket(socket.clone(), TransportConfig::default()).unwrap();
        (transport, socket)
    }

    #[test]
    fn partial_sends_are_summed() {
        let (mut transport, socket) = scripted(Scripted {
            sends: Mutex::new(VecDeque::from([
                Ok(2),
                Err(io::Error::from(ErrorKind::Interrupted)),
                Ok(1),
            ])),
            ..Scripted::default()
        });

        let transfer = transport.send_bytes(b"hello", NO_FLAGS).unwrap();
        assert_eq!(transfer, Transfer::complete(5));
        assert_eq!(socket.sent.lock().unwrap().as_slice(), b"hello");
    }

    #[test]
    fn zero_progress_send_is_stalled() {
        let (mut transport, _socket) = scripted(Scripted {
            sends: Mutex::new(VecDeque::from([Ok(2), Ok(0)])),
            ..Scripted::default()
        });

        let err = transport.send_bytes(b"hello", NO_FLAGS).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Stalled {
                operation: "send",
                transferred: 2,
                ..
            }
        ));
        assert_eq!(err.location().unwrap().file(), file!());
    }

    #[test]
    fn broken_pipe_reports_end_of_stream() {
        let (mut transport, _socket) = scripted(Scripted {
            sends: Mutex::new(VecDeque::from([
                Ok(1),
                Err(io::Error::from(ErrorKind::BrokenPipe)),
            ])),
            ..Scripted::default()
        });

        let transfer = transport.send_bytes(b"hello", NO_FLAGS).unwrap();
        assert_eq!(transfer, Transfer::closed(1));
    }

    #[test]
    fn send_error_carries_progress_and_code() {
        let (mut transport, _socket) = scripted(Scripted {
            sends: Mutex::new(VecDeque::from([
                Ok(3),
                Err(io::Error::from_raw_os_error(104)),
            ])),
            ..Scripted::default()
        });

        let err = transport.send_bytes(b"hello", NO_FLAGS).unwrap_err();
        assert_eq!(err.transferred(), 3);
        assert_eq!(err.code(), Some(104));
    }

    #[test]
    fn interrupted_receive_retries() {
        let (mut transport, _socket) = scripted(Scripted {
            recvs: Mutex::new(VecDeque::from([
                Err(io::Error::from(ErrorKind::Interrupted)),
                Ok(b"ab".to_vec()),
                Ok(b"c".to_vec()),
            ])),
            ..Scripted::default()
        });

        let mut buf = [0u8; 3];
        let transfer = transport.receive_bytes(&mut buf, NO_FLAGS).unwrap();
        assert_eq!(transfer, Transfer::complete(3));
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn empty_receive_never_touches_socket() {
        let (mut transport, _socket) = scripted(Scripted::default());
        let transfer = transport.receive_bytes(&mut [], NO_FLAGS).unwrap();
        assert_eq!(transfer, Transfer::complete(0));
    }

    #[test]
    fn probe_error_restores_blocking_mode() {
        let (transport, socket) = scripted(Scripted {
            peeks: Mutex::new(VecDeque::from([Err(io::Error::from(
                ErrorKind::PermissionDenied,
            ))])),
            ..Scripted::default()
        });

        let err = transport.is_data_available().unwrap_err();
        assert!(matches!(err, TransportError::Probe { .. }));
        assert!(!socket.is_nonblocking().unwrap());
    }

    #[test]
    fn probe_leaves_nonblocking_socket_nonblocking() {
        let (transport, socket) = scripted(Scripted::default());
        socket.set_nonblocking(true).unwrap();

        transport.is_data_available().unwrap();
        assert!(socket.is_nonblocking().unwrap());
    }

    #[test]
    fn probe_reset_reports_disconnected() {
        let (transport, _socket) = scripted(Scripted {
            peeks: Mutex::new(VecDeque::from([Err(io::Error::from(
                ErrorKind::ConnectionReset,
            ))])),
            ..Scripted::default()
        });

        let liveness = transport.is_data_available().unwrap();
        assert!(!liveness.connected);
        assert!(!liveness.has_data);
    }

    #[test]
    fn probe_counts_lookahead_bytes() {
        let (mut transport, _socket) = scripted(Scripted {
            peeks: Mutex::new(VecDeque::from([Ok(1)])),
            queued: 5,
            ..Scripted::default()
        });
        transport.add_receive_buffer(b"xyz".to_vec());

        let liveness = transport.is_data_available().unwrap();
        assert_eq!(
            liveness,
            Liveness {
                has_data: true,
                available_bytes: 8,
                connected: true,
            }
        );

        let idle = transport.is_data_available().unwrap();
        assert!(idle.has_data);
        assert_eq!(idle.available_bytes, 3);
    }
}
