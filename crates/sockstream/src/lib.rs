//! Framed, buffered message streams over blocking TCP sockets.
//!
//! sockstream lets an application exchange variable-length messages and
//! fixed-size scalars over one TCP connection using ordinary `std::io`
//! idioms instead of raw socket calls.
//!
//! # Crate Structure
//!
//! - [`transport`]: dial or adopt connections, exact-count transfers,
//!   liveness probing, lookahead bytes
//! - [`frame`]: the length-prefixed wire format and scalar transfers
//! - [`buffer`]: `Read`/`BufRead`/`Write` adapters, the message stream and
//!   the page-backed arena
//!
//! ```no_run
//! use sockstream::{SocketStream, TransportConfig};
//!
//! # fn main() -> Result<(), sockstream::buffer::StreamError> {
//! let mut stream = SocketStream::connect("127.0.0.1", 8080, TransportConfig::default())?;
//! stream.write_str("some data")?;
//!
//! let mut echo = String::new();
//! stream.read_string(&mut echo)?;
//! assert_eq!(echo, "some data");
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use sockstream_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use sockstream_frame::*;
}

/// Re-export buffered stream types.
pub mod buffer {
    pub use sockstream_buffer::*;
}

pub use sockstream_buffer::{SocketBuffer, SocketStream};
pub use sockstream_frame::Framed;
pub use sockstream_transport::{ReceiveMode, Transport, TransportConfig};
