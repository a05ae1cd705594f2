//! The boundary to the HTTP server that received the upgrade request.

use std::future::Future;
use std::io;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HeaderValue};
use http::{Request, Response, StatusCode};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::error::{Error, HandshakeError, Result};
use crate::protocol::handshake::{parse_request, write_response_head};

/// A host server connection that can answer the upgrade request and then
/// give up the underlying stream.
///
/// Implement this for whatever HTTP server fronts the engine. Deadlines the
/// server placed on the stream must be cleared before it is handed over.
pub trait HostTransport: Send {
    type Io: AsyncRead + AsyncWrite + Send + 'static;

    /// Write an error response and end the exchange.
    fn reject(self, response: Response<Bytes>) -> impl Future<Output = io::Result<()>> + Send;

    /// Write the `101 Switching Protocols` response and surrender the stream.
    fn hijack(self, response: Response<()>) -> impl Future<Output = io::Result<Self::Io>> + Send;
}

/// A plain byte stream on which the engine speaks HTTP/1.1 itself.
///
/// Bytes the client sent after the request head stay buffered and are the
/// first bytes the connection reads.
#[derive(Debug)]
pub struct RawTransport<S> {
    stream: BufReader<S>,
}

impl<S> RawTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Read an upgrade request head of at most `max_head_size` bytes.
    ///
    /// Malformed or oversized heads are answered with `400` or `431` here.
    ///
    /// # Errors
    ///
    /// - [`Error::Handshake`] for a bad request head.
    /// - [`Error::Io`] or [`Error::ConnectionClosed`] if the stream fails or
    ///   ends first.
    pub async fn read_request(stream: S, max_head_size: usize) -> Result<(Request<()>, Self)> {
        let mut transport = Self {
            stream: BufReader::new(stream),
        };

        let mut head = Vec::new();
        loop {
            let remaining = max_head_size.saturating_sub(head.len()) as u64;
            if remaining == 0 {
                let err = HandshakeError::new(
                    StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
                    "request head too large",
                );
                return Err(transport.refuse(err).await);
            }
            let read = (&mut transport.stream)
                .take(remaining)
                .read_until(b'\n', &mut head)
                .await?;
            if read == 0 {
                return Err(Error::ConnectionClosed(None));
            }
            if head == b"\r\n" {
                head.clear();
                continue;
            }
            if head.ends_with(b"\r\n\r\n") {
                break;
            }
        }

        match parse_request(&head) {
            Ok(request) => Ok((request, transport)),
            Err(err) => Err(transport.refuse(err).await),
        }
    }

    async fn refuse(self, err: HandshakeError) -> Error {
        debug!(status = err.status.as_u16(), reason = %err.reason, "unreadable upgrade request");
        let body = Bytes::from(err.status.canonical_reason().unwrap_or("Error"));
        let mut response = Response::new(body);
        *response.status_mut() = err.status;
        if let Err(io) = self.reject(response).await {
            debug!(error = %io, "failed to write error response");
        }
        Error::Handshake(err)
    }
}

impl<S> HostTransport for RawTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Io = BufReader<S>;

    async fn reject(mut self, mut response: Response<Bytes>) -> io::Result<()> {
        let len = HeaderValue::from(response.body().len());
        response.headers_mut().insert(CONTENT_LENGTH, len);
        let mut out = Vec::new();
        write_response_head(response.status(), response.headers(), &mut out);
        out.extend_from_slice(response.body());
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        self.stream.shutdown().await
    }

    async fn hijack(mut self, response: Response<()>) -> io::Result<Self::Io> {
        let mut out = Vec::new();
        write_response_head(response.status(), response.headers(), &mut out);
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(self.stream)
    }
}
