//! WebSocket message types and close codes as defined in RFC 6455.

use crate::error::{Error, Result};

/// Longest close reason that fits in a control frame after the status code.
pub const MAX_CLOSE_REASON: usize = 123;

/// WebSocket close status code per RFC 6455 Section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000). The connection successfully completed.
    #[default]
    Normal,
    /// Going away (1001). Endpoint is going away (e.g., server shutdown, browser navigating away).
    GoingAway,
    /// Protocol error (1002). Endpoint received a malformed frame or protocol violation.
    ProtocolError,
    /// Unsupported data (1003). Endpoint received data type it cannot handle.
    UnsupportedData,
    /// No status received (1005). Never sent on the wire; an empty close
    /// payload is reported with this code.
    NoStatusReceived,
    /// Abnormal closure (1006). Never sent on the wire.
    Abnormal,
    /// Invalid payload (1007). Endpoint received a message with invalid data (e.g., non-UTF-8 in text).
    InvalidPayload,
    /// Policy violation (1008). Endpoint received a message that violates its policy.
    PolicyViolation,
    /// Message too big (1009). Endpoint received a message too large to process.
    MessageTooBig,
    /// Mandatory extension (1010). Client expected server to negotiate an extension.
    MandatoryExtension,
    /// Internal error (1011). Server encountered an unexpected condition.
    InternalError,
    /// Custom close code (3000-4999 for applications, 1012-1014 for registered codes).
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatusReceived,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    /// Get the numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatusReceived => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => *code,
        }
    }

    /// Check if this close code may appear in a close frame per RFC 6455 Section 7.4.1.
    ///
    /// Valid codes:
    /// - 1000-1003
    /// - 1007-1014
    /// - 3000-4999: Reserved for libraries/frameworks and applications
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        let code = self.as_u16();
        matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }

    /// Check if this close code is reserved and MUST NOT be sent in a Close frame.
    ///
    /// Reserved codes per RFC 6455 Section 7.4.1:
    /// - 1004: Reserved
    /// - 1005: No Status Received (MUST NOT be set by endpoint)
    /// - 1006: Abnormal Closure (MUST NOT be set by endpoint)
    /// - 1015: TLS Handshake (MUST NOT be set by endpoint)
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        let code = self.as_u16();
        matches!(code, 1004..=1006 | 1015)
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Close frame containing status code and optional reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close status code.
    pub code: CloseCode,
    /// Human-readable reason for closing (UTF-8, max 123 bytes).
    pub reason: String,
}

impl CloseFrame {
    /// Create a new close frame with the given code and reason.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Parse the payload of a received close frame.
    ///
    /// An empty payload carries no status and yields `None`.
    ///
    /// # Errors
    ///
    /// - [`Error::ProtocolViolation`] for a 1-byte payload.
    /// - [`Error::InvalidCloseCode`] for codes that may not be sent.
    /// - [`Error::InvalidUtf8`] if the reason is not UTF-8.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>> {
        match payload.len() {
            0 => Ok(None),
            1 => Err(Error::ProtocolViolation(
                "close frame payload of 1 byte".into(),
            )),
            _ => {
                let raw = u16::from_be_bytes([payload[0], payload[1]]);
                let code = CloseCode::from_u16(raw);
                if !code.is_valid() {
                    return Err(Error::InvalidCloseCode(raw));
                }
                let reason = std::str::from_utf8(&payload[2..])?;
                Ok(Some(Self::new(code, reason)))
            }
        }
    }

    /// Encode this close frame as a control-frame payload.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        format_close_message(self.code, &self.reason)
    }
}

/// Build a close frame payload from a status code and reason.
///
/// `NoStatusReceived` produces an empty payload. The reason is cut to
/// [`MAX_CLOSE_REASON`] bytes on a character boundary.
#[must_use]
pub fn format_close_message(code: CloseCode, reason: &str) -> Vec<u8> {
    if code == CloseCode::NoStatusReceived {
        return Vec::new();
    }
    let mut end = reason.len().min(MAX_CLOSE_REASON);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    let mut payload = Vec::with_capacity(2 + end);
    payload.extend_from_slice(&code.as_u16().to_be_bytes());
    payload.extend_from_slice(&reason.as_bytes()[..end]);
    payload
}

/// A message delivered to or sent by the application.
///
/// Ping and pong frames never surface here; they are routed to the
/// connection's control handler.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Message {
    /// A text message (UTF-8 encoded).
    Text(String),
    /// A binary message (arbitrary bytes).
    Binary(Vec<u8>),
    /// The peer's close frame, if it carried a status.
    Close(Option<CloseFrame>),
}

impl Message {
    /// Create a text message.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(s.into())
    }

    /// Create a binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Message::Binary(data.into())
    }

    /// Create a close message with status code and reason.
    #[must_use]
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        Message::Close(Some(CloseFrame::new(code, reason)))
    }

    /// Returns `true` if this is a text message.
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Returns `true` if this is a binary message.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// Returns `true` if this is a close message.
    #[must_use]
    pub const fn is_close(&self) -> bool {
        matches!(self, Message::Close(_))
    }

    /// Consume and return the text content, if this is a text message.
    #[must_use]
    pub fn into_text(self) -> Option<String> {
        match self {
            Message::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Consume and return the payload bytes of a data message.
    #[must_use]
    pub fn into_data(self) -> Option<Vec<u8>> {
        match self {
            Message::Text(s) => Some(s.into_bytes()),
            Message::Binary(data) => Some(data),
            Message::Close(_) => None,
        }
    }

    /// Borrow the text content, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the binary content, if this is a binary message.
    #[must_use]
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Message::Binary(data) => Some(data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        assert!(matches!(Message::text("hello"), Message::Text(s) if s == "hello"));
        assert!(matches!(Message::binary([4, 5, 6]), Message::Binary(ref d) if d == &[4, 5, 6]));

        match Message::close(CloseCode::Normal, "goodbye") {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Normal);
                assert_eq!(frame.reason, "goodbye");
            }
            _ => panic!("Expected Close message with frame"),
        }
    }

    #[test]
    fn test_message_accessors() {
        assert_eq!(Message::text("hi").as_text(), Some("hi"));
        assert_eq!(Message::binary(vec![1]).as_text(), None);
        assert_eq!(Message::binary(vec![1, 2]).as_binary(), Some([1, 2].as_slice()));
        assert_eq!(Message::text("hi").into_data(), Some(b"hi".to_vec()));
        assert_eq!(Message::Close(None).into_data(), None);
        assert!(Message::Close(None).is_close());
    }

    #[test]
    fn test_close_code_round_trip_numbers() {
        for raw in [1000, 1001, 1002, 1003, 1005, 1006, 1007, 1008, 1009, 1010, 1011, 3000] {
            assert_eq!(CloseCode::from_u16(raw).as_u16(), raw);
        }
        assert_eq!(CloseCode::from_u16(4999), CloseCode::Other(4999));
    }

    #[test]
    fn test_close_code_validity() {
        assert!(CloseCode::Normal.is_valid());
        assert!(CloseCode::InternalError.is_valid());

        // RFC 6455 registered codes 1012-1014
        assert!(CloseCode::Other(1012).is_valid());
        assert!(CloseCode::Other(1014).is_valid());

        assert!(CloseCode::Other(3000).is_valid());
        assert!(CloseCode::Other(4999).is_valid());

        assert!(!CloseCode::Other(999).is_valid());
        assert!(!CloseCode::Other(1004).is_valid());
        assert!(!CloseCode::NoStatusReceived.is_valid());
        assert!(!CloseCode::Abnormal.is_valid());
        assert!(!CloseCode::Other(1015).is_valid());
        assert!(!CloseCode::Other(2999).is_valid());
        assert!(!CloseCode::Other(5000).is_valid());
    }

    #[test]
    fn test_close_code_reserved() {
        assert!(CloseCode::Other(1004).is_reserved());
        assert!(CloseCode::NoStatusReceived.is_reserved());
        assert!(CloseCode::Abnormal.is_reserved());
        assert!(CloseCode::Other(1015).is_reserved());
        assert!(!CloseCode::Normal.is_reserved());
    }

    #[test]
    fn test_parse_close_payload() {
        assert_eq!(CloseFrame::parse(&[]).unwrap(), None);

        let parsed = CloseFrame::parse(&[0x03, 0xE8, b'b', b'y', b'e']).unwrap();
        assert_eq!(parsed, Some(CloseFrame::new(CloseCode::Normal, "bye")));
    }

    #[test]
    fn test_parse_close_one_byte_is_protocol_error() {
        let err = CloseFrame::parse(&[0x03]).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert_eq!(err.close_code(), Some(CloseCode::ProtocolError));
    }

    #[test]
    fn test_parse_close_rejects_reserved_code() {
        let err = CloseFrame::parse(&1005u16.to_be_bytes()).unwrap_err();
        assert_eq!(err, Error::InvalidCloseCode(1005));
    }

    #[test]
    fn test_parse_close_rejects_bad_utf8() {
        let err = CloseFrame::parse(&[0x03, 0xE8, 0xFF, 0xFE]).unwrap_err();
        assert_eq!(err, Error::InvalidUtf8);
        assert_eq!(err.close_code(), Some(CloseCode::InvalidPayload));
    }

    #[test]
    fn test_format_close_message() {
        assert_eq!(
            format_close_message(CloseCode::GoingAway, "bye"),
            vec![0x03, 0xE9, b'b', b'y', b'e']
        );
        assert!(format_close_message(CloseCode::NoStatusReceived, "ignored").is_empty());
    }

    #[test]
    fn test_format_close_message_truncates_on_char_boundary() {
        // 62 two-byte characters = 124 bytes; one must be dropped.
        let reason = "é".repeat(62);
        let payload = format_close_message(CloseCode::Normal, &reason);
        assert_eq!(payload.len(), 2 + 122);
        assert!(std::str::from_utf8(&payload[2..]).is_ok());
    }
}
