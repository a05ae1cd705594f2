//! `Sec-WebSocket-Extensions` parsing and the permessage-deflate extension.
//!
//! Only permessage-deflate without context takeover is ever accepted. Any
//! parameters the client offers are ignored and the server always answers
//! with [`PERMESSAGE_DEFLATE_RESPONSE`].

pub mod deflate;

pub use deflate::{MessageCompressor, compress, decompress};

/// Extension token for per-message DEFLATE compression (RFC 7692).
pub const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

/// Response value sent when compression is accepted.
pub const PERMESSAGE_DEFLATE_RESPONSE: &str =
    "permessage-deflate; server_no_context_takeover; client_no_context_takeover";

/// A single extension parameter, `name` or `name=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParam {
    /// Parameter name (e.g., "client_max_window_bits").
    pub name: String,
    /// Optional parameter value. None for boolean parameters.
    pub value: Option<String>,
}

impl ExtensionParam {
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Parse `param=value` or `param`; quoted values are unquoted.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if let Some((name, value)) = s.split_once('=') {
            Self {
                name: name.trim().to_string(),
                value: Some(value.trim().trim_matches('"').to_string()),
            }
        } else {
            Self::flag(s)
        }
    }
}

/// One extension from an offer list: `name; param; param=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOffer {
    /// Extension name (e.g., "permessage-deflate").
    pub name: String,
    /// Extension parameters.
    pub params: Vec<ExtensionParam>,
}

impl ExtensionOffer {
    /// Parse a single extension. Returns `None` when the name is empty.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split(';');
        let name = parts.next()?.trim();
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            params: parts
                .filter(|p| !p.trim().is_empty())
                .map(ExtensionParam::parse)
                .collect(),
        })
    }

    /// Parse a comma separated header value, skipping empty entries.
    pub fn parse_header(header: &str) -> Vec<Self> {
        header.split(',').filter_map(Self::parse).collect()
    }
}

/// Returns `true` if any of the given header values offers permessage-deflate.
///
/// Parameters are ignored: the engine always answers without context
/// takeover, which every conforming client must accept.
pub fn offers_permessage_deflate<'a>(values: impl IntoIterator<Item = &'a str>) -> bool {
    values
        .into_iter()
        .flat_map(ExtensionOffer::parse_header)
        .any(|offer| offer.name.eq_ignore_ascii_case(PERMESSAGE_DEFLATE))
}
