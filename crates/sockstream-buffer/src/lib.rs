//! Buffered stream adapters for sockstream.
//!
//! - [`SocketBuffer`]: a framed transport behind `std::io::{Read, BufRead,
//!   Write}`, with separate input and output arenas
//! - [`SocketStream`]: message-at-a-time reads and writes with `eof` and
//!   `failed` state
//! - [`Arena`]: page-backed storage that grows by remapping

pub mod arena;
pub mod buffer;
pub mod error;
pub mod stream;

pub use arena::{page_size, Arena};
pub use buffer::SocketBuffer;
pub use error::{Result, StreamError};
pub use stream::SocketStream;
