use std::time::Duration;

/// Default send/receive timeout applied at construction.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on a received frame: the largest length the `i32` prefix
/// can declare.
pub const DEFAULT_MAX_PAYLOAD: usize = i32::MAX as usize;

/// How a receive treats a destination smaller than the declared frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveMode {
    /// Resize the destination to the declared payload length.
    #[default]
    GrowToFit,
    /// Never resize; the destination size is fixed by the caller.
    FixedCapacity,
}

/// Configuration applied when a transport is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Send and receive timeout. `Duration::ZERO` blocks indefinitely.
    pub timeout: Duration,
    /// Receive resize policy.
    pub receive_mode: ReceiveMode,
    /// Largest declared frame length a receive accepts.
    pub max_payload: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            receive_mode: ReceiveMode::default(),
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl TransportConfig {
    /// Override the send/receive timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the receive resize policy.
    pub fn with_receive_mode(mut self, receive_mode: ReceiveMode) -> Self {
        self.receive_mode = receive_mode;
        self
    }

    /// Override the received frame size cap.
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Timeout in the form the socket layer expects (`None` = no timeout).
    pub(crate) fn socket_timeout(&self) -> Option<Duration> {
        to_socket_timeout(self.timeout)
    }
}

pub(crate) fn to_socket_timeout(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() {
        None
    } else {
        Some(timeout)
    }
}
