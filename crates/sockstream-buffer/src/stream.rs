use std::io::{self, BufRead, Read, Write};
use std::net::TcpStream;

use sockstream_frame::{Framed, Scalar};
use sockstream_transport::{Transport, TransportConfig};
use tracing::warn;

use crate::buffer::SocketBuffer;
use crate::error::{Result, StreamError};

/// A message stream over one connection.
///
/// Each [`write_bytes`](Self::write_bytes) or [`write_str`](Self::write_str)
/// sends one frame; each [`read_bytes`](Self::read_bytes) or
/// [`read_string`](Self::read_string) yields the unread rest of the current
/// frame, or the next frame. Scalars travel unframed.
///
/// The stream tracks two state bits. `eof` is set when the peer closes the
/// connection. `failed` is set by any error; while it is set every operation
/// returns [`StreamError::Failed`] without touching the socket, until
/// [`clear`](Self::clear) is called.
///
/// ```no_run
/// use sockstream_buffer::SocketStream;
/// use sockstream_transport::TransportConfig;
///
/// # fn main() -> sockstream_buffer::Result<()> {
/// let mut stream = SocketStream::connect("127.0.0.1", 8080, TransportConfig::default())?;
/// stream.write_str("some data")?.write_scalar(42u32)?;
///
/// let mut reply = String::new();
/// stream.read_string(&mut reply)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SocketStream {
    buffer: SocketBuffer,
    eof: bool,
    failed: bool,
}

impl SocketStream {
    /// Dial `host:port` and buffer the connection in grow-to-fit mode.
    pub fn connect(host: &str, port: u16, config: TransportConfig) -> Result<Self> {
        Self::from_transport(Transport::dial(host, port, config)?)
    }

    /// Dial `host:port` with fixed per-direction buffer capacity.
    pub fn connect_with_capacity(
        host: &str,
        port: u16,
        config: TransportConfig,
        capacity: usize,
    ) -> Result<Self> {
        Self::with_capacity(Transport::dial(host, port, config)?, capacity)
    }

    /// Wrap an accepted connection in grow-to-fit mode.
    pub fn adopt(stream: TcpStream, config: TransportConfig) -> Result<Self> {
        Self::from_transport(Transport::adopt(stream, config)?)
    }

    pub fn from_transport(transport: Transport) -> Result<Self> {
        SocketBuffer::new(transport).map(Self::from_buffer)
    }

    pub fn with_capacity(transport: Transport, capacity: usize) -> Result<Self> {
        SocketBuffer::with_capacity(transport, capacity).map(Self::from_buffer)
    }

    pub fn from_buffer(buffer: SocketBuffer) -> Self {
        Self {
            buffer,
            eof: false,
            failed: false,
        }
    }

    /// Send `data` as one frame (or capacity-sized frames in fixed mode).
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<&mut Self> {
        self.ensure_usable()?;
        let result = self.buffer.put_all(data).and_then(|()| self.buffer.sync());
        self.settle(result)?;
        Ok(self)
    }

    /// Send the UTF-8 bytes of `text` as one frame.
    pub fn write_str(&mut self, text: &str) -> Result<&mut Self> {
        self.write_bytes(text.as_bytes())
    }

    /// Replace `dst` with the next frame, or the unread rest of the current
    /// one. At end of stream `dst` is left empty and `eof` is set.
    pub fn read_bytes(&mut self, dst: &mut Vec<u8>) -> Result<&mut Self> {
        self.ensure_usable()?;
        dst.clear();

        let result = self.buffer.underflow().map(|chunk| {
            dst.extend_from_slice(chunk);
            chunk.len()
        });
        let taken = self.settle(result)?;
        self.buffer.consume_input(taken);

        if taken == 0 && self.buffer.end_of_stream() {
            self.eof = true;
        }
        Ok(self)
    }

    /// Like [`read_bytes`](Self::read_bytes), decoding the frame as UTF-8.
    ///
    /// Invalid UTF-8 fails the stream; the frame is consumed either way.
    pub fn read_string(&mut self, dst: &mut String) -> Result<&mut Self> {
        let mut bytes = Vec::new();
        self.read_bytes(&mut bytes)?;
        let text = String::from_utf8(bytes).map_err(StreamError::from);
        *dst = self.settle(text)?;
        Ok(self)
    }

    /// Send a scalar's raw bytes after flushing any pending output.
    pub fn write_scalar<T: Scalar>(&mut self, value: T) -> Result<&mut Self> {
        self.ensure_usable()?;
        let result = self.buffer.sync().and_then(|()| {
            let transfer = self.buffer.transport_mut().send_scalar(value)?;
            if transfer.end_of_stream {
                return Err(StreamError::Closed);
            }
            Ok(())
        });
        self.settle(result)?;
        Ok(self)
    }

    /// Receive a scalar straight from the transport.
    ///
    /// Bytes still buffered from an earlier frame are not consulted. At end of
    /// stream `value` is left untouched and `eof` is set.
    pub fn read_scalar<T: Scalar>(&mut self, value: &mut T) -> Result<&mut Self> {
        self.ensure_usable()?;
        let received = self.buffer.transport_mut().receive_scalar::<T>();
        match self.settle(received.map_err(StreamError::from))? {
            Some(received) => *value = received,
            None => self.eof = true,
        }
        Ok(self)
    }

    /// Flush pending output as one frame.
    pub fn sync(&mut self) -> Result<&mut Self> {
        self.ensure_usable()?;
        let result = self.buffer.sync();
        self.settle(result)?;
        Ok(self)
    }

    /// The peer has closed the connection.
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// An operation failed; see [`clear`](Self::clear).
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Neither `eof` nor `failed` is set.
    pub fn good(&self) -> bool {
        !self.eof && !self.failed
    }

    /// Reset both state bits.
    pub fn clear(&mut self) {
        self.eof = false;
        self.failed = false;
    }

    pub fn buffer(&self) -> &SocketBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut SocketBuffer {
        &mut self.buffer
    }

    pub fn transport(&self) -> &Transport {
        self.buffer.transport()
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        self.buffer.transport_mut()
    }

    pub fn into_buffer(self) -> SocketBuffer {
        self.buffer
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.failed {
            return Err(StreamError::Failed);
        }
        Ok(())
    }

    /// Fold an operation's outcome into the state bits.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if matches!(err, StreamError::Closed) {
                self.eof = true;
            }
            self.failed = true;
            warn!(error = %err, "stream failed");
        }
        result
    }
}

impl Write for SocketStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_usable()?;
        let result = self.buffer.put(buf);
        Ok(self.settle(result)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sync()?;
        Ok(())
    }
}

impl Read for SocketStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for SocketStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.ensure_usable()?;
        if self.buffer.buffered_input() == 0 {
            if let Err(err) = self.buffer.fill_buf().map(|_| ()) {
                self.failed = true;
                warn!(error = %err, "stream failed");
                return Err(err);
            }
            if self.buffer.buffered_input() == 0 {
                self.eof = true;
            }
        }
        Ok(self.buffer.input())
    }

    fn consume(&mut self, amt: usize) {
        self.buffer.consume_input(amt);
    }
}
