//! Error types for the WebSocket engine.
//!
//! Every failure after the handshake is fatal to its connection. The
//! variants are grouped the way the close handshake needs them: each one
//! knows which close code (if any) the engine sends before tearing down
//! the transport.

use http::StatusCode;
use thiserror::Error;

use crate::message::{CloseCode, CloseFrame};

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A rejected upgrade request.
///
/// The connection is never taken over when this is produced; the HTTP layer
/// has already been sent an error response carrying `status`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("websocket: {reason}")]
pub struct HandshakeError {
    /// HTTP status written back to the client.
    pub status: StatusCode,
    /// Human-readable reason.
    pub reason: String,
}

impl HandshakeError {
    /// Create a handshake error with the given status and reason.
    pub fn new(status: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    pub(crate) fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, reason)
    }
}

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The upgrade request was rejected.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Malformed frame or frame sequence.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Reserved bits set without a negotiated extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Control frame fragmented.
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload larger than 125 bytes.
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Server received an unmasked frame.
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Client received a masked frame.
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Close frame carried a code that may not appear on the wire.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Invalid UTF-8 in a text message or close reason.
    #[error("Invalid UTF-8 in text payload")]
    InvalidUtf8,

    /// Message (or single frame) exceeds the configured read limit.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Size seen so far.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Announced payload length cannot be addressed on this platform.
    #[error("Payload length {size} exceeds platform maximum {max}")]
    PayloadTooLargeForPlatform {
        /// Announced length.
        size: u64,
        /// Platform maximum.
        max: u64,
    },

    /// Corrupt permessage-deflate stream.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Deadline elapsed before the operation completed.
    #[error("Operation timed out")]
    Timeout,

    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(String),

    /// The peer closed the connection. `None` means the transport ended
    /// without a close frame.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<CloseFrame>),

    /// The connection was already torn down by an earlier call.
    #[error("Connection already closed")]
    AlreadyClosed,
}

impl Error {
    /// Close code sent to the peer when this error ends a connection.
    ///
    /// Returns `None` for transport failures, where no close frame can be
    /// delivered.
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Error::ProtocolViolation(_)
            | Error::ReservedOpcode(_)
            | Error::ReservedBitsSet
            | Error::FragmentedControlFrame
            | Error::ControlFrameTooLarge(_)
            | Error::UnmaskedClientFrame
            | Error::MaskedServerFrame
            | Error::InvalidCloseCode(_) => Some(CloseCode::ProtocolError),
            Error::InvalidUtf8 | Error::Compression(_) => Some(CloseCode::InvalidPayload),
            Error::MessageTooLarge { .. } | Error::PayloadTooLargeForPlatform { .. } => {
                Some(CloseCode::MessageTooBig)
            }
            Error::Handshake(_)
            | Error::Timeout
            | Error::Io(_)
            | Error::ConnectionClosed(_)
            | Error::AlreadyClosed => None,
        }
    }

    /// Returns `true` if this is a peer close carrying one of `codes`.
    #[must_use]
    pub fn is_close_error(&self, codes: &[CloseCode]) -> bool {
        match self {
            Error::ConnectionClosed(Some(frame)) => codes.contains(&frame.code),
            _ => false,
        }
    }

    /// Returns `true` if this is a peer close whose code is not in
    /// `expected`, or a transport that ended without any close frame.
    #[must_use]
    pub fn is_unexpected_close_error(&self, expected: &[CloseCode]) -> bool {
        match self {
            Error::ConnectionClosed(Some(frame)) => !expected.contains(&frame.code),
            Error::ConnectionClosed(None) => true,
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Error::Timeout,
            _ => Error::Io(err.to_string()),
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_: std::string::FromUtf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}
