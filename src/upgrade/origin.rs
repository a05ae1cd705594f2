//! Origin checks and handshake error responses.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, HeaderValue, ORIGIN};
use http::{Request, Response, Uri};

use crate::error::HandshakeError;

/// Decides whether a request's `Origin` is acceptable.
///
/// Any `Fn(&Request<()>) -> bool` is an origin check.
pub trait OriginCheck: Send + Sync {
    fn check(&self, request: &Request<()>) -> bool;
}

impl<F> OriginCheck for F
where
    F: Fn(&Request<()>) -> bool + Send + Sync,
{
    fn check(&self, request: &Request<()>) -> bool {
        self(request)
    }
}

/// Accept requests without an `Origin` header, or whose origin host equals
/// the `Host` header (ASCII case-insensitive).
///
/// This is the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameOrigin;

impl OriginCheck for SameOrigin {
    fn check(&self, request: &Request<()>) -> bool {
        let headers = request.headers();
        let Some(origin) = headers.get(ORIGIN) else {
            return true;
        };
        let Some(origin_host) = origin_authority(origin) else {
            return false;
        };
        let host = headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| request.uri().authority().map(|a| a.as_str()))
            .unwrap_or_default();
        origin_host.eq_ignore_ascii_case(host.trim())
    }
}

fn origin_authority(origin: &HeaderValue) -> Option<String> {
    let uri: Uri = origin.to_str().ok()?.trim().parse().ok()?;
    uri.scheme()?;
    uri.authority().map(|a| a.as_str().to_owned())
}

/// Accept every origin. Only appropriate when the endpoint carries no
/// ambient credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAnyOrigin;

impl OriginCheck for AllowAnyOrigin {
    fn check(&self, _request: &Request<()>) -> bool {
        true
    }
}

/// Accept only the listed origins, compared as whole `scheme://host[:port]`
/// strings (ASCII case-insensitive). Requests without `Origin` pass.
#[derive(Debug, Clone, Default)]
pub struct AllowedOrigins {
    origins: Vec<String>,
}

impl AllowedOrigins {
    pub fn new<I, T>(origins: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            origins: origins.into_iter().map(Into::into).collect(),
        }
    }
}

impl OriginCheck for AllowedOrigins {
    fn check(&self, request: &Request<()>) -> bool {
        match request.headers().get(ORIGIN).map(HeaderValue::to_str) {
            None => true,
            Some(Ok(origin)) => self
                .origins
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(origin.trim())),
            Some(Err(_)) => false,
        }
    }
}

/// Builds the HTTP response written when a handshake is rejected.
pub trait ErrorResponder: Send + Sync {
    fn respond(&self, request: &Request<()>, error: &HandshakeError) -> Response<Bytes>;
}

impl<F> ErrorResponder for F
where
    F: Fn(&Request<()>, &HandshakeError) -> Response<Bytes> + Send + Sync,
{
    fn respond(&self, request: &Request<()>, error: &HandshakeError) -> Response<Bytes> {
        self(request, error)
    }
}

/// The status's canonical reason as a plain-text body, plus
/// `Sec-WebSocket-Version: 13` so clients learn the supported version.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainErrorResponder;

impl ErrorResponder for PlainErrorResponder {
    fn respond(&self, _request: &Request<()>, error: &HandshakeError) -> Response<Bytes> {
        let body = error.status.canonical_reason().unwrap_or("Error");
        let mut response = Response::new(Bytes::from(body));
        *response.status_mut() = error.status;
        let headers = response.headers_mut();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert("sec-websocket-version", HeaderValue::from_static("13"));
        response
    }
}
