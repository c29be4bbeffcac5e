use sockstream_transport::{
    ByteContainer, ContainerView, ReceiveMode, Transfer, Transport, NO_FLAGS,
};
use tracing::{trace, warn};

use crate::codec::{decode_length, encode_length, LENGTH_PREFIX_SIZE};
use crate::error::{FrameError, Result};
use crate::scalar::Scalar;

const DISCARD_CHUNK: usize = 4096;

/// Framed and scalar transfers over a [`Transport`].
///
/// Every returned [`Transfer`] counts payload bytes only; the length prefix
/// is never included. A frame whose length prefix could not be transferred
/// completely is reported as `Transfer::closed(0)`. A declared length above
/// the transport's `max_payload` fails with [`FrameError::PayloadTooLarge`]
/// before anything is resized or read.
///
/// Transport failures carry the location of the call into this trait.
pub trait Framed {
    /// Send the whole container as one frame.
    fn send_data<C: ByteContainer + ?Sized>(&mut self, data: &C) -> Result<Transfer>;

    /// Receive one frame into `data`, resizing it first in grow-to-fit mode.
    fn receive_data<C: ByteContainer>(&mut self, data: &mut C) -> Result<Transfer>;

    /// Send the view's current contents as one frame.
    fn send_frame(&mut self, view: &ContainerView<'_>) -> Result<Transfer>;

    /// Receive one frame into a view.
    ///
    /// In [`ReceiveMode::GrowToFit`] the view is resized to the declared
    /// length before the payload is read. In [`ReceiveMode::FixedCapacity`]
    /// the view keeps its size; a longer frame is truncated and the rest of
    /// its payload discarded so the next receive starts on a frame boundary.
    fn receive_frame(&mut self, view: &mut ContainerView<'_>) -> Result<Transfer>;

    /// Receive one frame into a view under `mode`, ignoring the transport's
    /// configured receive mode.
    fn receive_frame_with(
        &mut self,
        view: &mut ContainerView<'_>,
        mode: ReceiveMode,
    ) -> Result<Transfer>;

    /// Send a byte span as one frame.
    fn send_raw(&mut self, payload: &[u8]) -> Result<Transfer>;

    /// Receive one frame into a fixed span, whatever the receive mode.
    /// Bytes beyond `buf.len()` are discarded.
    fn receive_raw(&mut self, buf: &mut [u8]) -> Result<Transfer>;

    /// Send a scalar's raw bytes with no length prefix.
    fn send_scalar<T: Scalar>(&mut self, value: T) -> Result<Transfer>;

    /// Receive a scalar sent by [`send_scalar`](Self::send_scalar).
    /// Returns `None` if the peer closed before a whole value arrived.
    fn receive_scalar<T: Scalar>(&mut self) -> Result<Option<T>>;
}

impl Framed for Transport {
    #[track_caller]
    fn send_data<C: ByteContainer + ?Sized>(&mut self, data: &C) -> Result<Transfer> {
        self.send_raw(data.as_bytes())
    }

    #[track_caller]
    fn receive_data<C: ByteContainer>(&mut self, data: &mut C) -> Result<Transfer> {
        self.receive_frame(&mut ContainerView::new(data))
    }

    #[track_caller]
    fn send_frame(&mut self, view: &ContainerView<'_>) -> Result<Transfer> {
        self.send_raw(view.data())
    }

    #[track_caller]
    fn receive_frame(&mut self, view: &mut ContainerView<'_>) -> Result<Transfer> {
        let mode = self.receive_mode();
        self.receive_frame_with(view, mode)
    }

    #[track_caller]
    fn receive_frame_with(
        &mut self,
        view: &mut ContainerView<'_>,
        mode: ReceiveMode,
    ) -> Result<Transfer> {
        let Some(declared) = receive_length(self)? else {
            return Ok(Transfer::closed(0));
        };

        if mode == ReceiveMode::GrowToFit {
            view.resize(declared).map_err(|source| {
                warn!(len = declared, error = %source, "receive buffer resize failed");
                FrameError::Resize {
                    len: declared,
                    source,
                }
            })?;
        }

        receive_payload(self, declared, view.data_mut())
    }

    #[track_caller]
    fn send_raw(&mut self, payload: &[u8]) -> Result<Transfer> {
        let prefix = encode_length(payload.len())?;

        let header = self.send_bytes(&prefix, NO_FLAGS)?;
        if header.end_of_stream {
            return Ok(Transfer::closed(0));
        }

        let transfer = self.send_bytes(payload, NO_FLAGS)?;
        trace!(
            len = payload.len(),
            sent = transfer.bytes,
            end_of_stream = transfer.end_of_stream,
            "sent frame"
        );
        Ok(transfer)
    }

    #[track_caller]
    fn receive_raw(&mut self, buf: &mut [u8]) -> Result<Transfer> {
        let Some(declared) = receive_length(self)? else {
            return Ok(Transfer::closed(0));
        };
        receive_payload(self, declared, buf)
    }

    #[track_caller]
    fn send_scalar<T: Scalar>(&mut self, value: T) -> Result<Transfer> {
        Ok(self.send_bytes(value.to_wire().as_ref(), NO_FLAGS)?)
    }

    #[track_caller]
    fn receive_scalar<T: Scalar>(&mut self) -> Result<Option<T>> {
        let mut bytes = T::Bytes::default();
        let transfer = self.receive_bytes(bytes.as_mut(), NO_FLAGS)?;
        if transfer.end_of_stream {
            return Ok(None);
        }
        Ok(Some(T::from_wire(bytes)))
    }
}

/// Read a length prefix; `None` if the peer closed first.
#[track_caller]
fn receive_length(transport: &mut Transport) -> Result<Option<usize>> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let header = transport.receive_bytes(&mut prefix, NO_FLAGS)?;
    if header.end_of_stream {
        return Ok(None);
    }
    let declared =
        decode_length(prefix).inspect_err(|err| warn!(error = %err, "bad length prefix"))?;

    let max = transport.config().max_payload;
    if declared > max {
        warn!(declared, max, "declared frame length over limit");
        return Err(FrameError::PayloadTooLarge {
            size: declared,
            max,
        });
    }
    Ok(Some(declared))
}

/// Read a `declared`-byte payload into `buf`, discarding whatever does not fit.
#[track_caller]
fn receive_payload(transport: &mut Transport, declared: usize, buf: &mut [u8]) -> Result<Transfer> {
    let stored = declared.min(buf.len());
    let transfer = transport.receive_bytes(&mut buf[..stored], NO_FLAGS)?;
    if transfer.end_of_stream {
        return Ok(transfer);
    }

    if stored < declared {
        warn!(
            declared,
            capacity = buf.len(),
            "frame larger than receive buffer, discarding excess"
        );
        if discard(transport, declared - stored)? {
            return Ok(Transfer::closed(stored));
        }
    }

    trace!(len = stored, "received frame");
    Ok(Transfer::complete(stored))
}

/// Consume and drop `remaining` bytes. Returns true if the peer closed first.
#[track_caller]
fn discard(transport: &mut Transport, mut remaining: usize) -> Result<bool> {
    let mut scratch = [0u8; DISCARD_CHUNK];
    while remaining > 0 {
        let chunk = remaining.min(DISCARD_CHUNK);
        let transfer = transport.receive_bytes(&mut scratch[..chunk], NO_FLAGS)?;
        if transfer.end_of_stream {
            return Ok(true);
        }
        remaining -= chunk;
    }
    Ok(false)
}
