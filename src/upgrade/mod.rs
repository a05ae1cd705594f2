//! Server side of the opening handshake (RFC 6455 Section 4.2).
//!
//! An [`Upgrader`] validates an upgrade request against an immutable
//! [`HandshakePolicy`], negotiates the subprotocol and permessage-deflate,
//! answers through a [`HostTransport`] and returns the resulting
//! [`Connection`].
//!
//! ```rust,ignore
//! use wsgate::upgrade::{HandshakePolicy, RawTransport, Upgrader};
//!
//! let upgrader = Upgrader::new(
//!     HandshakePolicy::new()
//!         .with_subprotocols(["chat", "superchat"])
//!         .with_compression(true),
//! );
//! let (request, transport) = RawTransport::read_request(tcp, 8192).await?;
//! let mut conn = upgrader.upgrade(&request, HeaderMap::new(), transport).await?;
//! ```

mod origin;
mod transport;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::header::{CONNECTION, HeaderMap, HeaderValue, UPGRADE};
use http::{Method, Request, Response, StatusCode};
use tracing::debug;

use crate::config::Config;
use crate::connection::{Connection, Role};
use crate::error::{Error, HandshakeError, Result};
use crate::extensions::{PERMESSAGE_DEFLATE_RESPONSE, offers_permessage_deflate};
use crate::protocol::handshake::{
    compute_accept_key, header_contains_token, header_str, header_values, tokens,
};

pub use origin::{
    AllowAnyOrigin, AllowedOrigins, ErrorResponder, OriginCheck, PlainErrorResponder, SameOrigin,
};
pub use transport::{HostTransport, RawTransport};

const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";
const SEC_WEBSOCKET_VERSION: &str = "sec-websocket-version";
const SEC_WEBSOCKET_PROTOCOL: &str = "sec-websocket-protocol";
const SEC_WEBSOCKET_EXTENSIONS: &str = "sec-websocket-extensions";
const SEC_WEBSOCKET_ACCEPT: &str = "sec-websocket-accept";

const BAD_HANDSHAKE: &str = "the client is not using the websocket protocol:";

/// Everything the server decides about an upgrade, fixed at construction.
#[derive(Clone)]
pub struct HandshakePolicy {
    subprotocols: Vec<String>,
    compression: bool,
    origin_check: Arc<dyn OriginCheck>,
    error_responder: Arc<dyn ErrorResponder>,
    handshake_timeout: Duration,
    config: Config,
}

impl Default for HandshakePolicy {
    fn default() -> Self {
        let config = Config::server();
        Self {
            subprotocols: Vec::new(),
            compression: false,
            origin_check: Arc::new(SameOrigin),
            error_responder: Arc::new(PlainErrorResponder),
            handshake_timeout: config.timeouts.handshake,
            config,
        }
    }
}

impl HandshakePolicy {
    /// No subprotocols, no compression, same-origin check.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Supported subprotocols, most preferred first.
    ///
    /// When empty, a `Sec-WebSocket-Protocol` header the application put on
    /// the response is used as is. Otherwise that header is ignored, and it
    /// is left off the response when the client offers none of these.
    #[must_use]
    pub fn with_subprotocols<I, T>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.subprotocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Offer permessage-deflate (no context takeover) when the client asks.
    #[must_use]
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    #[must_use]
    pub fn with_origin_check(mut self, check: impl OriginCheck + 'static) -> Self {
        self.origin_check = Arc::new(check);
        self
    }

    #[must_use]
    pub fn with_error_responder(mut self, responder: impl ErrorResponder + 'static) -> Self {
        self.error_responder = Arc::new(responder);
        self
    }

    /// Time allowed to write the response and take over the stream.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Configuration for the connections this policy produces.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn subprotocols(&self) -> &[String] {
        &self.subprotocols
    }

    #[must_use]
    pub fn compression(&self) -> bool {
        self.compression
    }

    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl fmt::Debug for HandshakePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakePolicy")
            .field("subprotocols", &self.subprotocols)
            .field("compression", &self.compression)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// The outcome of a successful negotiation.
#[derive(Debug)]
pub struct Negotiation {
    /// The `101 Switching Protocols` response, application headers included.
    pub response: Response<()>,
    pub subprotocol: Option<String>,
    pub compression: bool,
}

/// Performs server handshakes under one [`HandshakePolicy`].
#[derive(Debug, Clone, Default)]
pub struct Upgrader {
    policy: Arc<HandshakePolicy>,
}

impl Upgrader {
    #[must_use]
    pub fn new(policy: HandshakePolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &HandshakePolicy {
        &self.policy
    }

    /// Validate `request` and build the switching-protocols response.
    ///
    /// `response_headers` are headers the application wants on the response
    /// (cookies, a pre-chosen subprotocol). They must not include
    /// `Sec-WebSocket-Extensions`. The response's `Sec-WebSocket-Protocol`
    /// always matches [`Negotiation::subprotocol`], so an application header
    /// is dropped when a server list is configured and nothing matched.
    ///
    /// # Errors
    ///
    /// A [`HandshakeError`] carrying the status to answer with: 405 for a
    /// non-GET request, 400 for missing or wrong upgrade headers, 500 for an
    /// application `Sec-WebSocket-Extensions` header and 403 for a rejected
    /// origin.
    pub fn negotiate(
        &self,
        request: &Request<()>,
        response_headers: &HeaderMap,
    ) -> std::result::Result<Negotiation, HandshakeError> {
        let headers = request.headers();

        if request.method() != Method::GET {
            return Err(HandshakeError::new(
                StatusCode::METHOD_NOT_ALLOWED,
                format!("{BAD_HANDSHAKE} request method is not GET"),
            ));
        }
        if !header_contains_token(headers, CONNECTION.as_str(), "upgrade") {
            return Err(HandshakeError::bad_request(format!(
                "{BAD_HANDSHAKE} 'upgrade' token not found in 'Connection' header"
            )));
        }
        if !header_contains_token(headers, UPGRADE.as_str(), "websocket") {
            return Err(HandshakeError::bad_request(format!(
                "{BAD_HANDSHAKE} 'websocket' token not found in 'Upgrade' header"
            )));
        }
        if header_str(headers, SEC_WEBSOCKET_VERSION) != Some("13") {
            return Err(HandshakeError::bad_request(
                "unsupported version: 13 not found in 'Sec-Websocket-Version' header",
            ));
        }
        let key = header_str(headers, SEC_WEBSOCKET_KEY)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                HandshakeError::bad_request(
                    "not a websocket handshake: `Sec-WebSocket-Key' header is missing or blank",
                )
            })?;
        if response_headers.contains_key(SEC_WEBSOCKET_EXTENSIONS) {
            return Err(HandshakeError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "application specific 'Sec-WebSocket-Extensions' headers are unsupported",
            ));
        }
        if !self.policy.origin_check.check(request) {
            return Err(HandshakeError::new(
                StatusCode::FORBIDDEN,
                "request origin not allowed by Upgrader.CheckOrigin",
            ));
        }

        let subprotocol = self.select_subprotocol(request, response_headers);
        let compression = self.policy.compression
            && offers_permessage_deflate(header_values(headers, SEC_WEBSOCKET_EXTENSIONS));

        let mut response = Response::new(());
        *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        let out = response.headers_mut();
        out.extend(response_headers.clone());
        out.insert(UPGRADE, HeaderValue::from_static("websocket"));
        out.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        out.insert(SEC_WEBSOCKET_ACCEPT, header_value(&compute_accept_key(key))?);
        if compression {
            out.insert(
                SEC_WEBSOCKET_EXTENSIONS,
                HeaderValue::from_static(PERMESSAGE_DEFLATE_RESPONSE),
            );
        }
        match &subprotocol {
            Some(protocol) => {
                out.insert(SEC_WEBSOCKET_PROTOCOL, header_value(protocol)?);
            }
            None => {
                out.remove(SEC_WEBSOCKET_PROTOCOL);
            }
        }

        Ok(Negotiation {
            response,
            subprotocol,
            compression,
        })
    }

    /// The first server-preferred subprotocol the client also offered.
    ///
    /// With no server list, the application's own `Sec-WebSocket-Protocol`
    /// response header wins.
    #[must_use]
    pub fn select_subprotocol(
        &self,
        request: &Request<()>,
        response_headers: &HeaderMap,
    ) -> Option<String> {
        if self.policy.subprotocols.is_empty() {
            return header_str(response_headers, SEC_WEBSOCKET_PROTOCOL)
                .filter(|p| !p.is_empty())
                .map(str::to_owned);
        }
        let offered = requested_subprotocols(request);
        self.policy
            .subprotocols
            .iter()
            .find(|server| offered.iter().any(|client| client == *server))
            .cloned()
    }

    /// Run the handshake and take over the transport.
    ///
    /// On failure the error responder's response is written through
    /// `transport` and the stream is never taken over.
    ///
    /// # Errors
    ///
    /// - [`Error::Handshake`] when negotiation fails.
    /// - [`Error::Timeout`] or [`Error::Io`] while writing the response.
    pub async fn upgrade<T: HostTransport>(
        &self,
        request: &Request<()>,
        response_headers: HeaderMap,
        transport: T,
    ) -> Result<Connection<T::Io>> {
        let negotiation = match self.negotiate(request, &response_headers) {
            Ok(negotiation) => negotiation,
            Err(err) => {
                debug!(
                    status = err.status.as_u16(),
                    reason = %err.reason,
                    "websocket handshake rejected"
                );
                let response = self.policy.error_responder.respond(request, &err);
                let rejected = transport.reject(response);
                match tokio::time::timeout(self.policy.handshake_timeout, rejected).await {
                    Ok(Ok(())) => {}
                    Ok(Err(io)) => debug!(error = %io, "failed to write handshake rejection"),
                    Err(_) => debug!("timed out writing handshake rejection"),
                }
                return Err(Error::Handshake(err));
            }
        };

        let Negotiation {
            response,
            subprotocol,
            compression,
        } = negotiation;
        let io = tokio::time::timeout(self.policy.handshake_timeout, transport.hijack(response))
            .await??;
        debug!(
            subprotocol = subprotocol.as_deref(),
            compression, "websocket upgrade completed"
        );

        Ok(Connection::negotiated(
            io,
            Role::Server,
            self.policy.config.clone(),
            subprotocol,
            compression,
        ))
    }
}

fn header_value(value: &str) -> std::result::Result<HeaderValue, HandshakeError> {
    HeaderValue::from_str(value).map_err(|_| {
        HandshakeError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("invalid response header value {value:?}"),
        )
    })
}

/// Returns `true` if `request` asks to be upgraded to a WebSocket.
pub fn is_websocket_upgrade<B>(request: &Request<B>) -> bool {
    header_contains_token(request.headers(), CONNECTION.as_str(), "upgrade")
        && header_contains_token(request.headers(), UPGRADE.as_str(), "websocket")
}

/// The subprotocols the client offered, in its order.
pub fn requested_subprotocols<B>(request: &Request<B>) -> Vec<String> {
    header_values(request.headers(), SEC_WEBSOCKET_PROTOCOL)
        .flat_map(tokens)
        .map(String::from)
        .collect()
}
