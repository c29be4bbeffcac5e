//! Blocking TCP transport for sockstream.
//!
//! Provides the lowest layer of sockstream:
//! - [`Transport`]: dial or adopt a TCP connection, move exact byte counts
//!   with partial-transfer retry, probe liveness, splice lookahead bytes
//! - [`RawSocket`]: the capability trait a transport is built over
//! - [`ContainerView`]: a type-erased view over any resizable byte container
//!
//! Everything else (framing, buffered streams) builds on [`Transport`].

pub mod config;
pub mod connection;
pub mod container;
pub mod error;
pub mod traits;
pub mod transport;

pub use config::{ReceiveMode, TransportConfig, DEFAULT_MAX_PAYLOAD, DEFAULT_TIMEOUT};
pub use connection::Connection;
pub use container::{ByteContainer, ContainerView};
pub use error::{Result, TransportError};
pub use traits::{Liveness, MsgFlags, RawSocket, Transfer, NO_FLAGS};
pub use transport::Transport;
