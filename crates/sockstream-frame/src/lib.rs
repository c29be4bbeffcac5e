//! Length-prefixed framing over a [`Transport`](sockstream_transport::Transport).
//!
//! Every message is framed with a 4-byte signed length in host byte order,
//! followed by exactly that many payload bytes. Scalars bypass framing and
//! travel as their raw in-memory representation.
//!
//! The operations live on the [`Framed`] extension trait, implemented for
//! `Transport`.

pub mod codec;
pub mod error;
pub mod framed;
pub mod scalar;

pub use codec::{
    decode_frame, decode_length, encode_frame, encode_length, LENGTH_PREFIX_SIZE, MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use framed::Framed;
pub use scalar::Scalar;
