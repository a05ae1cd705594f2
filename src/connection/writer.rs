//! The write half: frame serialization, message writes and streaming
//! fragment writers.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::{BufferPool, Config};
use crate::connection::fragmenter::MessageFragmenter;
use crate::connection::lifecycle::{Shared, with_deadline};
use crate::connection::{CloseState, Role};
use crate::error::{Error, Result};
use crate::extensions::{MessageCompressor, compress};
use crate::message::{CloseCode, Message, format_close_message};
use crate::protocol::OpCode;
use crate::protocol::frame::{MAX_CONTROL_FRAME_PAYLOAD, encode_frame};
use crate::protocol::mask::MaskGenerator;

/// Serializes frames onto the transport's write half.
pub(crate) struct FrameSink<S> {
    io: WriteHalf<S>,
    buf: BytesMut,
    pool: Option<BufferPool>,
    masks: Option<MaskGenerator>,
}

impl<S> FrameSink<S> {
    pub(crate) fn new(io: WriteHalf<S>, role: Role, config: &Config) -> Self {
        let pool = config.write_buffer_pool.clone();
        let buf = match pool {
            Some(_) => BytesMut::new(),
            None => BytesMut::with_capacity(config.write_buffer_size),
        };
        Self {
            io,
            buf,
            pool,
            masks: role.masks_outgoing().then(MaskGenerator::new),
        }
    }
}

impl<S: AsyncWrite> FrameSink<S> {
    /// Encode one frame and flush it to the transport.
    pub(crate) async fn write_frame(
        &mut self,
        fin: bool,
        rsv1: bool,
        opcode: OpCode,
        payload: &[u8],
    ) -> Result<()> {
        let mut buf = match &self.pool {
            Some(pool) => pool.acquire(),
            None => std::mem::take(&mut self.buf),
        };
        buf.clear();
        let mask = self.masks.as_mut().map(MaskGenerator::next_mask);
        encode_frame(&mut buf, fin, rsv1, opcode, mask, payload);

        let written = self.io.write_all(&buf).await;
        match &self.pool {
            Some(pool) => pool.release(buf),
            None => self.buf = buf,
        }
        written?;
        self.io.flush().await?;
        trace!(%opcode, fin, rsv1, len = payload.len(), "frame written");
        Ok(())
    }

    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}

/// Cloneable handle to a connection's write side.
///
/// Any number of tasks may hold a writer; whole messages are written one at
/// a time in the order their calls acquire the connection. Control frames
/// may be written between the fragments of a message but never inside one.
pub struct MessageWriter<S> {
    pub(crate) shared: Arc<Shared<S>>,
}

impl<S> Clone for MessageWriter<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> std::fmt::Debug for MessageWriter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageWriter")
            .field("role", &self.shared.role)
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

impl<S> MessageWriter<S> {
    /// Deadline applied to subsequent message writes. `None` waits forever.
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.shared.set_write_deadline(deadline);
    }

    /// Toggle compression of outgoing messages. Ignored unless
    /// permessage-deflate was negotiated.
    pub fn enable_write_compression(&self, enabled: bool) {
        self.shared.enable_write_compression(enabled);
    }

    /// DEFLATE level for subsequent messages, clamped to 9.
    pub fn set_compression_level(&self, level: u32) {
        self.shared.set_compression_level(level);
    }

    #[must_use]
    pub fn state(&self) -> CloseState {
        self.shared.state()
    }

    /// Resolves once the connection is fully closed.
    pub async fn closed(&self) {
        self.shared.closed().await;
    }
}

impl<S: AsyncRead + AsyncWrite> MessageWriter<S> {
    /// Write a complete message, fragmenting and compressing as configured.
    ///
    /// `Message::Close` is written as a close frame, see [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyClosed`] or [`Error::ConnectionClosed`] once the close
    ///   handshake has started.
    /// - [`Error::Timeout`] when the write deadline passes. The connection is
    ///   closed afterwards, as it is for [`Error::Io`] and [`Error::Compression`].
    pub async fn write_message(&self, message: Message) -> Result<()> {
        let (opcode, payload) = match message {
            Message::Text(text) => (OpCode::Text, Bytes::from(text)),
            Message::Binary(data) => (OpCode::Binary, Bytes::from(data)),
            Message::Close(Some(frame)) => return self.close(frame.code, &frame.reason).await,
            Message::Close(None) => {
                let payload = format_close_message(CloseCode::NoStatusReceived, "");
                return self
                    .write_control(OpCode::Close, &payload, self.shared.write_deadline())
                    .await;
            }
        };

        let shared = &self.shared;
        let result = with_deadline(shared.write_deadline(), async {
            let _gate = shared.gate.lock().await;
            shared.ensure_open()?;

            let compressed = shared.compress_writes();
            let payload = if compressed {
                Bytes::from(compress(&payload, shared.compression_level())?)
            } else {
                payload
            };
            let fragments = MessageFragmenter::new(payload, opcode, shared.fragment_size)
                .compressed(compressed);
            for frame in fragments {
                shared.ensure_open()?;
                let mut sink = shared.sink.lock().await;
                sink.write_frame(frame.fin, frame.rsv1, frame.opcode, frame.payload())
                    .await?;
            }
            Ok::<_, Error>(())
        })
        .await;
        shared.check(result).await
    }

    /// Write a single control frame, bounded by its own `deadline`
    /// instead of the connection's write deadline.
    ///
    /// A close frame moves the connection into [`CloseState::CloseSent`].
    ///
    /// # Errors
    ///
    /// - [`Error::ProtocolViolation`] if `opcode` is not a control opcode.
    /// - [`Error::ControlFrameTooLarge`] for payloads over 125 bytes.
    /// - [`Error::AlreadyClosed`] once a close frame was sent, or the
    ///   connection is closed.
    pub async fn write_control(
        &self,
        opcode: OpCode,
        payload: &[u8],
        deadline: Option<Instant>,
    ) -> Result<()> {
        if !opcode.is_control() {
            return Err(Error::ProtocolViolation(format!(
                "{opcode} is not a control opcode"
            )));
        }
        if payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(payload.len()));
        }

        let shared = &self.shared;
        let result = with_deadline(deadline, async {
            let mut sink = shared.sink.lock().await;
            if opcode == OpCode::Close {
                let before = shared.transition(|s| match s {
                    CloseState::Open => CloseState::CloseSent,
                    other => other,
                });
                if before != CloseState::Open {
                    return Err(Error::AlreadyClosed);
                }
                debug!(role = %shared.role, "sending close frame");
            } else {
                shared.ensure_open()?;
            }
            sink.write_frame(true, false, opcode, payload).await
        })
        .await;
        shared.check(result).await
    }

    /// Start the close handshake with `code` and `reason`.
    ///
    /// The reason is cut to 123 bytes. Reading continues until the peer's
    /// close frame arrives; see [`close_and_wait`](Self::close_and_wait).
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidCloseCode`] for codes that may not be sent.
    /// - Any error of [`write_control`](Self::write_control).
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        if !code.is_valid() {
            return Err(Error::InvalidCloseCode(code.as_u16()));
        }
        let payload = format_close_message(code, reason);
        self.write_control(OpCode::Close, &payload, self.shared.write_deadline())
            .await
    }

    /// Send a close frame, then give the reading task `grace` to see the
    /// peer's close frame before the transport is shut down.
    ///
    /// # Errors
    ///
    /// Same as [`close`](Self::close).
    pub async fn close_and_wait(
        &self,
        code: CloseCode,
        reason: &str,
        grace: std::time::Duration,
    ) -> Result<()> {
        self.close(code, reason).await?;
        if tokio::time::timeout(grace, self.shared.closed()).await.is_err() {
            debug!(role = %self.shared.role, "peer did not answer close in time");
        }
        self.shared.teardown().await;
        Ok(())
    }

    /// Start a message whose payload is supplied piece by piece.
    ///
    /// Other messages wait until the returned writer is finished or dropped.
    ///
    /// # Errors
    ///
    /// - [`Error::ProtocolViolation`] unless `opcode` is text or binary.
    /// - [`Error::AlreadyClosed`] once the close handshake has started.
    /// - [`Error::Timeout`] if the write deadline passes while waiting.
    pub async fn begin(&self, opcode: OpCode) -> Result<FragmentWriter<S>> {
        if !opcode.starts_message() {
            return Err(Error::ProtocolViolation(format!(
                "{opcode} cannot start a data message"
            )));
        }
        let gate = with_deadline(self.shared.write_deadline(), async {
            Ok(Arc::clone(&self.shared.gate).lock_owned().await)
        })
        .await;
        let gate = self.shared.check(gate).await?;
        self.shared.ensure_open()?;

        let compressed = self.shared.compress_writes();
        Ok(FragmentWriter {
            shared: Arc::clone(&self.shared),
            _gate: gate,
            opcode,
            compressed,
            compressor: compressed
                .then(|| MessageCompressor::new(self.shared.compression_level())),
            pending: BytesMut::new(),
            started: false,
            finished: false,
        })
    }
}

/// Writes one data message as a sequence of fragments.
///
/// Data is sent whenever more than a fragment's worth has accumulated;
/// [`finish`](Self::finish) sends the final frame. Dropping the writer after
/// a fragment went out leaves the message unterminated, so the connection is
/// marked closed.
pub struct FragmentWriter<S> {
    shared: Arc<Shared<S>>,
    _gate: OwnedMutexGuard<()>,
    opcode: OpCode,
    compressed: bool,
    compressor: Option<MessageCompressor>,
    pending: BytesMut,
    started: bool,
    finished: bool,
}

impl<S: AsyncRead + AsyncWrite> FragmentWriter<S> {
    /// Append `data` to the message.
    ///
    /// # Errors
    ///
    /// Any error of [`MessageWriter::write_message`].
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        match self.compressor.as_mut() {
            Some(compressor) => compressor.write(data)?,
            None => self.pending.extend_from_slice(data),
        }
        while let Some(chunk) = self.next_chunk() {
            self.emit(false, chunk).await?;
        }
        Ok(())
    }

    /// Send the final fragment.
    ///
    /// # Errors
    ///
    /// Any error of [`MessageWriter::write_message`].
    pub async fn finish(mut self) -> Result<()> {
        let tail = match self.compressor.take() {
            Some(compressor) => Bytes::from(compressor.finish()?),
            None => std::mem::take(&mut self.pending).freeze(),
        };
        self.emit(true, tail).await?;
        self.finished = true;
        Ok(())
    }

    fn next_chunk(&mut self) -> Option<Bytes> {
        let size = self.shared.fragment_size;
        match self.compressor.as_mut() {
            Some(compressor) if compressor.buffered() > size => {
                Some(Bytes::from(compressor.take(size)))
            }
            Some(_) => None,
            None if self.pending.len() > size => Some(self.pending.split_to(size).freeze()),
            None => None,
        }
    }

    async fn emit(&mut self, fin: bool, chunk: Bytes) -> Result<()> {
        let opcode = if self.started {
            OpCode::Continuation
        } else {
            self.opcode
        };
        let rsv1 = self.compressed && !self.started;
        self.started = true;

        let shared = &self.shared;
        let result = with_deadline(shared.write_deadline(), async {
            shared.ensure_open()?;
            let mut sink = shared.sink.lock().await;
            sink.write_frame(fin, rsv1, opcode, &chunk).await
        })
        .await;
        shared.check(result).await
    }
}

impl<S> Drop for FragmentWriter<S> {
    fn drop(&mut self) {
        if self.started && !self.finished {
            debug!(role = %self.shared.role, "fragmented message abandoned, closing connection");
            self.shared.mark_closed();
        }
    }
}

impl<S> std::fmt::Debug for FragmentWriter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentWriter")
            .field("opcode", &self.opcode)
            .field("compressed", &self.compressed)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}
