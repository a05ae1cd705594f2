//! HTTP/1.1 upgrade wire helpers (RFC 6455 Section 4).
//!
//! Header inspection works on `http` types so the negotiator can run against
//! any host server. The raw request parser and response writer are only
//! needed when the engine owns the socket from the first byte.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, Request, StatusCode, Version};
use sha1::{Digest, Sha1};

use crate::error::HandshakeError;

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Header names the request may carry only once.
const SINGLE_VALUED: [&str; 4] = [
    "host",
    "upgrade",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// ```
/// use wsgate::protocol::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Split a comma separated header value into trimmed, non-empty tokens.
pub fn tokens(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|t| !t.is_empty())
}

/// All values of `name` that are valid strings.
pub fn header_values<'a>(
    headers: &'a HeaderMap,
    name: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
}

/// Returns `true` if any value of `name` lists `token` (ASCII case-insensitive).
pub fn header_contains_token(headers: &HeaderMap, name: &str, token: &str) -> bool {
    header_values(headers, name)
        .flat_map(tokens)
        .any(|t| t.eq_ignore_ascii_case(token))
}

/// First value of `name`, trimmed; `None` when absent or not a string.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok().map(str::trim)
}

/// Parse a raw HTTP/1.1 request head into a header-only request.
///
/// # Errors
///
/// Returns a `400` [`HandshakeError`] for anything that is not a well-formed
/// HTTP/1.1 request head, including repeated single-valued headers.
pub fn parse_request(head: &[u8]) -> Result<Request<()>, HandshakeError> {
    let text = std::str::from_utf8(head)
        .map_err(|_| HandshakeError::bad_request("request head is not valid UTF-8"))?;
    let mut lines = text.split("\r\n");

    let request_line = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| HandshakeError::bad_request("empty request"))?;
    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HandshakeError::bad_request("malformed request line"));
    };
    if version != "HTTP/1.1" {
        return Err(HandshakeError::bad_request(format!(
            "unsupported HTTP version {version}"
        )));
    }
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| HandshakeError::bad_request("invalid request method"))?;

    let mut builder = Request::builder()
        .method(method)
        .uri(target)
        .version(Version::HTTP_11);

    let mut headers = HeaderMap::new();
    for line in lines.take_while(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HandshakeError::bad_request("malformed header line"))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| HandshakeError::bad_request("invalid header name"))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| HandshakeError::bad_request("invalid header value"))?;
        if SINGLE_VALUED.contains(&name.as_str()) && headers.contains_key(&name) {
            return Err(HandshakeError::bad_request(format!(
                "duplicate header: {name}"
            )));
        }
        headers.append(name, value);
    }

    if let Some(h) = builder.headers_mut() {
        *h = headers;
    }
    builder
        .body(())
        .map_err(|_| HandshakeError::bad_request("invalid request target"))
}

/// Serialize a response status line and headers, ending with the blank line.
pub fn write_response_head(status: StatusCode, headers: &HeaderMap, dst: &mut Vec<u8>) {
    dst.extend_from_slice(b"HTTP/1.1 ");
    dst.extend_from_slice(status.as_str().as_bytes());
    dst.push(b' ');
    dst.extend_from_slice(status.canonical_reason().unwrap_or("Unknown").as_bytes());
    dst.extend_from_slice(b"\r\n");
    for (name, value) in headers {
        dst.extend_from_slice(name.as_str().as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(value.as_bytes());
        dst.extend_from_slice(b"\r\n");
    }
    dst.extend_from_slice(b"\r\n");
}
