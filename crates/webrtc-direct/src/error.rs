//! Error types for dialing, listening and channel operations

use thiserror::Error;

/// Errors raised by a WebRTC channel implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("ICE connection failed")]
    IceConnectionFailed,
    #[error("Data channel error: {0}")]
    DataChannel(String),
    #[error("Signaling failed: {0}")]
    Signaling(String),
    #[error("Channel destroyed")]
    Destroyed,
    #[error("Channel timed out")]
    Timeout,
}

impl ChannelError {
    /// Stable error code, carried into `TransportError::DialFailed`
    pub fn code(&self) -> &'static str {
        match self {
            ChannelError::ConnectionFailed(_) => "ERR_CONNECTION_FAILURE",
            ChannelError::IceConnectionFailed => "ERR_ICE_CONNECTION_FAILURE",
            ChannelError::DataChannel(_) => "ERR_DATA_CHANNEL",
            ChannelError::Signaling(_) => "ERR_SIGNALING",
            ChannelError::Destroyed => "ERR_DESTROYED",
            ChannelError::Timeout => "ERR_TIMEOUT",
        }
    }
}

/// Errors surfaced to callers of the transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("The operation was aborted")]
    Cancelled,

    #[error("Error dialing {target}: {message}")]
    DialFailed {
        target: String,
        code: String,
        message: String,
    },

    #[error("Error dialing {target}: Timeout after {elapsed_ms}ms")]
    Timeout { target: String, elapsed_ms: u64 },

    #[error("Can't listen: channel factory cannot accept inbound connections")]
    CannotListen,

    #[error("Malformed signal: {0}")]
    MalformedSignal(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Listener is already listening")]
    AlreadyListening,

    #[error("Listener is closed")]
    ListenerClosed,

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Dial failure caused by the channel
    pub(crate) fn channel_failed(target: impl ToString, err: ChannelError) -> Self {
        TransportError::DialFailed {
            target: target.to_string(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Dial failure caused by the signaling HTTP exchange
    pub(crate) fn signaling_failed(target: impl ToString, message: impl Into<String>) -> Self {
        TransportError::DialFailed {
            target: target.to_string(),
            code: "ERR_HTTP".to_string(),
            message: message.into(),
        }
    }

    /// Stable error code for this error
    pub fn code(&self) -> &str {
        match self {
            TransportError::Cancelled => "ABORT_ERR",
            TransportError::DialFailed { code, .. } => code,
            TransportError::Timeout { .. } => "ETIMEDOUT",
            TransportError::CannotListen => "ERR_CANNOT_LISTEN_FROM_BROWSER",
            TransportError::MalformedSignal(_) => "ERR_MALFORMED_SIGNAL",
            TransportError::Bind { .. } => "ERR_BIND",
            TransportError::InvalidAddress(_) => "ERR_INVALID_MULTIADDR",
            TransportError::AlreadyListening => "ERR_ALREADY_LISTENING",
            TransportError::ListenerClosed => "ERR_LISTENER_CLOSED",
            TransportError::Channel(e) => e.code(),
            TransportError::Io(_) => "ERR_IO",
        }
    }
}
