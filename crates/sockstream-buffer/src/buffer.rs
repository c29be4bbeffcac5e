use std::io::{self, BufRead, Read, Write};

use sockstream_frame::Framed;
use sockstream_transport::{ContainerView, ReceiveMode, Transfer, Transport};
use tracing::{debug, trace};

use crate::arena::{page_size, Arena};
use crate::error::{Result, StreamError};

/// Cursor triple over one arena: `base <= current <= limit`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Region {
    base: usize,
    current: usize,
    limit: usize,
}

impl Region {
    fn new(limit: usize) -> Self {
        Self {
            base: 0,
            current: 0,
            limit,
        }
    }

    fn remaining(&self) -> usize {
        self.limit - self.current
    }

    fn filled(&self) -> usize {
        self.current - self.base
    }
}

/// A framed socket exposed through `std::io::{Read, BufRead, Write}`.
///
/// Writes collect in an output arena and leave as one frame when the region
/// fills or on [`flush`](Write::flush). Reads pull one frame at a time into
/// an input arena and hand it out until it is exhausted.
///
/// In grow-to-fit mode the output arena grows so a single `write` always
/// becomes part of one frame. With [`with_capacity`](Self::with_capacity)
/// both arenas stay at the given size: longer writes are split into
/// capacity-sized frames and longer incoming frames are truncated.
///
/// The buffer picks the receive mode for its own input frames; changing the
/// transport's mode through [`transport_mut`](Self::transport_mut) does not
/// affect it.
///
/// Pending output is not flushed on drop.
#[derive(Debug)]
pub struct SocketBuffer {
    transport: Transport,
    output: Arena,
    input: Arena,
    put: Region,
    get: Region,
    capacity: Option<usize>,
    last_packet_size: usize,
    end_of_stream: bool,
}

impl SocketBuffer {
    /// Buffer a transport in grow-to-fit mode, starting with one page per
    /// direction.
    pub fn new(mut transport: Transport) -> Result<Self> {
        transport.set_receive_mode(ReceiveMode::GrowToFit);
        Self::build(transport, None)
    }

    /// Buffer a transport with fixed `capacity` bytes per direction.
    ///
    /// Switches the transport to [`ReceiveMode::FixedCapacity`].
    pub fn with_capacity(mut transport: Transport, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(StreamError::Arena(io::Error::new(
                io::ErrorKind::InvalidInput,
                "buffer capacity must be nonzero",
            )));
        }
        transport.set_receive_mode(ReceiveMode::FixedCapacity);
        Self::build(transport, Some(capacity))
    }

    fn build(transport: Transport, capacity: Option<usize>) -> Result<Self> {
        let size = capacity.unwrap_or_else(page_size);
        let output = Arena::with_capacity(size).map_err(StreamError::Arena)?;
        let input = Arena::with_capacity(size).map_err(StreamError::Arena)?;
        let limit = capacity.unwrap_or(output.capacity());

        Ok(Self {
            transport,
            output,
            input,
            put: Region::new(limit),
            get: Region::default(),
            capacity,
            last_packet_size: 0,
            end_of_stream: false,
        })
    }

    /// Append as much of `buf` as the output region admits.
    ///
    /// A full region is flushed first. In grow-to-fit mode the arena grows
    /// so all of `buf` is taken at once.
    #[track_caller]
    pub fn put(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.capacity.is_none() && self.put.remaining() < buf.len() {
            let required = self.put.current + buf.len();
            self.output.reserve(required).map_err(StreamError::Arena)?;
            self.put.limit = self.output.capacity();
        }

        if self.put.remaining() == 0 {
            self.overflow()?;
        }

        let n = self.put.remaining().min(buf.len());
        let start = self.put.current;
        self.output.mapped_mut()[start..start + n].copy_from_slice(&buf[..n]);
        self.put.current += n;
        Ok(n)
    }

    /// Append all of `buf`, flushing full regions along the way.
    #[track_caller]
    pub fn put_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.put(buf)?;
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Send pending output as one frame. Does nothing if nothing is pending.
    #[track_caller]
    pub fn sync(&mut self) -> Result<()> {
        let pending = self.put.filled();
        if pending == 0 {
            return Ok(());
        }

        let span = self.put.base..self.put.current;
        let transfer = self.transport.send_raw(&self.output.mapped()[span])?;
        self.put.current = self.put.base;
        self.record(transfer);

        if transfer.end_of_stream {
            debug!(pending, sent = transfer.bytes, "peer closed before flush completed");
            return Err(StreamError::Closed);
        }
        trace!(len = pending, "flushed frame");
        Ok(())
    }

    #[track_caller]
    fn overflow(&mut self) -> Result<()> {
        trace!(capacity = self.put.limit, "output region full");
        self.sync()
    }

    /// The unread part of the current input frame, receiving the next frame
    /// first if the current one is used up.
    ///
    /// Returns an empty slice when the peer has closed the connection, or
    /// when the frame just received was empty.
    #[track_caller]
    pub fn underflow(&mut self) -> Result<&[u8]> {
        if self.get.remaining() == 0 {
            let transfer = match self.capacity {
                None => self.transport.receive_frame_with(
                    &mut ContainerView::new(&mut self.input),
                    ReceiveMode::GrowToFit,
                )?,
                Some(capacity) => {
                    self.input.resize(capacity).map_err(StreamError::Arena)?;
                    self.transport.receive_raw(self.input.as_mut_slice())?
                }
            };
            self.record(transfer);

            if transfer.end_of_stream {
                debug!(received = transfer.bytes, "input reached end of stream");
                self.get = Region::default();
                return Ok(&[][..]);
            }
            self.get = Region::new(transfer.bytes);
            trace!(len = transfer.bytes, "refilled input");
        }

        Ok(self.input())
    }

    /// The unread part of the current input frame, without receiving.
    pub fn input(&self) -> &[u8] {
        &self.input.mapped()[self.get.current..self.get.limit]
    }

    /// Mark `amt` bytes of the current input frame as read.
    pub fn consume_input(&mut self, amt: usize) {
        self.get.current = (self.get.current + amt).min(self.get.limit);
    }

    fn record(&mut self, transfer: Transfer) {
        self.last_packet_size = transfer.bytes;
        self.end_of_stream = transfer.end_of_stream;
    }

    /// Payload size of the most recent frame sent or received.
    pub fn last_packet_size(&self) -> usize {
        self.last_packet_size
    }

    /// Whether the most recent frame transfer hit an orderly close.
    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Bytes written but not yet flushed.
    pub fn pending_output(&self) -> usize {
        self.put.filled()
    }

    /// Bytes of the current input frame not yet read.
    pub fn buffered_input(&self) -> usize {
        self.get.remaining()
    }

    /// Fixed per-direction capacity, if any.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    /// Drop the buffers and return the transport. Pending output is lost.
    pub fn into_transport(self) -> Transport {
        self.transport
    }
}

impl Write for SocketBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.put(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.sync()?)
    }
}

impl Read for SocketBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for SocketBuffer {
    /// Empty only at end of stream; empty frames are skipped.
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.get.remaining() == 0 {
            self.underflow()?;
            if self.end_of_stream {
                break;
            }
        }
        Ok(self.input())
    }

    fn consume(&mut self, amt: usize) {
        self.consume_input(amt);
    }
}

#[cfg(test)]
mod tests {
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    use sockstream_frame::{decode_length, LENGTH_PREFIX_SIZE};
    use sockstream_transport::TransportConfig;

    use super::*;

    fn pair() -> (Transport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        (Transport::adopt(client, TransportConfig::default()).unwrap(), server)
    }

    fn read_frame(server: &mut TcpStream) -> Vec<u8> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        server.read_exact(&mut prefix).unwrap();
        let mut payload = vec![0u8; decode_length(prefix).unwrap()];
        server.read_exact(&mut payload).unwrap();
        payload
    }

    fn write_frame(server: &mut TcpStream, payload: &[u8]) {
        server
            .write_all(&(payload.len() as i32).to_ne_bytes())
            .unwrap();
        server.write_all(payload).unwrap();
    }

    #[test]
    fn fixed_capacity_splits_writes_into_frames() {
        let (transport, mut server) = pair();
        let mut buffer = SocketBuffer::with_capacity(transport, 4).unwrap();
        assert_eq!(
            buffer.transport().receive_mode(),
            ReceiveMode::FixedCapacity
        );

        buffer.write_all(b"0123456789").unwrap();
        assert_eq!(buffer.pending_output(), 2);
        buffer.flush().unwrap();
        assert_eq!(buffer.last_packet_size(), 2);

        assert_eq!(read_frame(&mut server), b"0123");
        assert_eq!(read_frame(&mut server), b"4567");
        assert_eq!(read_frame(&mut server), b"89");
    }

    #[test]
    fn grow_to_fit_sends_one_frame_per_flush() {
        let (transport, mut server) = pair();
        let mut buffer = SocketBuffer::new(transport).unwrap();

        let big = vec![b'x'; page_size() * 2 + 7];
        assert_eq!(buffer.write(&big).unwrap(), big.len());
        buffer.write_all(b"tail").unwrap();
        buffer.flush().unwrap();

        let frame = read_frame(&mut server);
        assert_eq!(frame.len(), big.len() + 4);
        assert!(frame.ends_with(b"tail"));
    }

    #[test]
    fn flush_with_nothing_pending_sends_nothing() {
        let (transport, mut server) = pair();
        let mut buffer = SocketBuffer::new(transport).unwrap();
        buffer.flush().unwrap();
        buffer.write_all(b"x").unwrap();
        buffer.flush().unwrap();

        assert_eq!(read_frame(&mut server), b"x");
    }

    #[test]
    fn reads_hand_out_one_frame_at_a_time() {
        let (transport, mut server) = pair();
        let mut buffer = SocketBuffer::new(transport).unwrap();
        write_frame(&mut server, b"some data");
        write_frame(&mut server, b"");
        write_frame(&mut server, b"another data");

        let mut head = [0u8; 4];
        buffer.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"some");
        assert_eq!(buffer.buffered_input(), 5);
        assert_eq!(buffer.last_packet_size(), 9);

        let mut rest = [0u8; 32];
        let n = buffer.read(&mut rest).unwrap();
        assert_eq!(&rest[..n], b" data");

        let n = buffer.read(&mut rest).unwrap();
        assert_eq!(&rest[..n], b"another data");
    }

    #[test]
    fn fixed_capacity_reads_truncate_oversized_frames() {
        let (transport, mut server) = pair();
        let mut buffer = SocketBuffer::with_capacity(transport, 4).unwrap();
        write_frame(&mut server, b"0123456789");
        write_frame(&mut server, b"ab");

        assert_eq!(buffer.underflow().unwrap(), b"0123");
        buffer.consume_input(4);
        assert_eq!(buffer.underflow().unwrap(), b"ab");
    }

    #[test]
    fn end_of_stream_reads_as_zero() {
        let (transport, mut server) = pair();
        let mut buffer = SocketBuffer::new(transport).unwrap();
        write_frame(&mut server, b"last");
        drop(server);

        let mut all = Vec::new();
        buffer.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"last");
        assert!(buffer.end_of_stream());
        assert_eq!(buffer.last_packet_size(), 0);

        assert_eq!(buffer.read(&mut [0u8; 8]).unwrap(), 0);
    }

    #[test]
    fn lines_can_be_read_through_bufread() {
        let (transport, mut server) = pair();
        let mut buffer = SocketBuffer::new(transport).unwrap();
        write_frame(&mut server, b"first\nsec");
        write_frame(&mut server, b"ond\n");

        let mut line = String::new();
        buffer.read_line(&mut line).unwrap();
        assert_eq!(line, "first\n");
        line.clear();
        buffer.read_line(&mut line).unwrap();
        assert_eq!(line, "second\n");
    }

    #[test]
    fn grow_to_fit_input_survives_transport_mode_change() {
        let (transport, mut server) = pair();
        let mut buffer = SocketBuffer::new(transport).unwrap();
        buffer
            .transport_mut()
            .set_receive_mode(ReceiveMode::FixedCapacity);
        write_frame(&mut server, b"hello");
        drop(server);

        let mut all = Vec::new();
        assert_eq!(buffer.read_to_end(&mut all).unwrap(), 5);
        assert_eq!(all, b"hello");
    }

    #[test]
    fn oversized_declared_frame_fails_without_mapping_it() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut server, _) = listener.accept().unwrap();
        let config = TransportConfig::default().with_max_payload(1 << 20);
        let transport = Transport::adopt(client, config).unwrap();
        let mut buffer = SocketBuffer::new(transport).unwrap();

        server.write_all(&(256i32 << 20).to_ne_bytes()).unwrap();
        drop(server);

        let err = buffer.underflow().unwrap_err();
        assert!(matches!(
            err,
            StreamError::Frame(sockstream_frame::FrameError::PayloadTooLarge { .. })
        ));
        assert_eq!(buffer.input.capacity(), page_size());
    }

    #[test]
    fn receive_failure_reports_the_calling_line() {
        let (mut transport, _server) = pair();
        transport.set_timeout(Duration::from_millis(50)).unwrap();
        let mut buffer = SocketBuffer::new(transport).unwrap();

        let line = line!() + 1;
        let err = buffer.underflow().unwrap_err();
        assert!(err.is_timeout());
        let StreamError::Frame(sockstream_frame::FrameError::Transport(err)) = err else {
            panic!("expected a transport error");
        };
        let location = err.location().unwrap();
        assert_eq!(location.file(), file!());
        assert_eq!(location.line(), line);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let (transport, _server) = pair();
        let err = SocketBuffer::with_capacity(transport, 0).unwrap_err();
        assert!(matches!(err, StreamError::Arena(ref e) if e.kind() == io::ErrorKind::InvalidInput));
    }
}
