//! The read half: frame decoding, reassembly and control frame dispatch.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::connection::CloseState;
use crate::connection::control::{
    ControlContext, ControlHandler, DefaultControlHandler, PingReply,
};
use crate::connection::lifecycle::{Shared, with_deadline};
use crate::error::{Error, Result};
use crate::message::{CloseFrame, Message, format_close_message};
use crate::protocol::frame::FrameCodec;
use crate::protocol::{Frame, MessageAssembler, OpCode};

/// The read side of a connection.
///
/// Only one task may read. Control frames are handled here as they arrive,
/// so a connection whose reader is idle will not answer pings or closes.
pub struct MessageReader<S> {
    io: ReadHalf<S>,
    buf: BytesMut,
    read_buffer_size: usize,
    codec: FrameCodec,
    assembler: MessageAssembler,
    max_message_size: usize,
    max_frame_size: usize,
    read_deadline: Option<Instant>,
    handler: Box<dyn ControlHandler>,
    shared: Arc<Shared<S>>,
    closed_rx: watch::Receiver<CloseState>,
    failure: Option<Error>,
    close_seen: bool,
}

impl<S> MessageReader<S> {
    pub(crate) fn new(
        io: ReadHalf<S>,
        shared: Arc<Shared<S>>,
        config: &Config,
        compression: bool,
    ) -> Self {
        let max_message_size = config.limits.max_message_size;
        let max_frame_size = config.limits.max_frame_size;
        let max_frame = max_frame_size.min(max_message_size);
        Self {
            io,
            buf: BytesMut::with_capacity(config.read_buffer_size),
            read_buffer_size: config.read_buffer_size.max(1),
            codec: FrameCodec::new(shared.role, max_frame).with_compression(compression),
            assembler: MessageAssembler::new(max_message_size),
            max_message_size,
            max_frame_size,
            read_deadline: None,
            handler: Box::new(DefaultControlHandler),
            closed_rx: shared.subscribe(),
            shared,
            failure: None,
            close_seen: false,
        }
    }

    /// Deadline for subsequent reads. `None` waits forever.
    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.read_deadline = deadline;
    }

    #[must_use]
    pub fn read_deadline(&self) -> Option<Instant> {
        self.read_deadline
    }

    /// Largest message (after decompression) the reader accepts. Single
    /// frames stay capped at [`Limits::max_frame_size`](crate::config::Limits).
    pub fn set_read_limit(&mut self, limit: usize) {
        self.max_message_size = limit;
        self.codec.set_max_payload(limit.min(self.max_frame_size));
        self.assembler.set_max_size(limit);
    }

    pub fn set_control_handler(&mut self, handler: impl ControlHandler + 'static) {
        self.handler = Box::new(handler);
    }
}

impl<S: AsyncRead + AsyncWrite> MessageReader<S> {
    /// Read the next data message.
    ///
    /// Returns `Message::Close` when the peer's close frame arrives (the
    /// close is echoed and the transport shut down), and `Ok(None)` on every
    /// call after that.
    ///
    /// # Errors
    ///
    /// Every error is fatal. Protocol and payload errors send a close frame
    /// with [`Error::close_code`] first; the same error is returned by all
    /// later calls.
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        if self.close_seen {
            return Ok(None);
        }
        match self.next_message().await {
            Ok(message) => Ok(Some(message)),
            Err(err) => Err(self.fail(err).await),
        }
    }

    async fn next_message(&mut self) -> Result<Message> {
        loop {
            let frame = self.next_frame().await?;
            match frame.opcode {
                OpCode::Ping => self.handle_ping(&frame).await?,
                OpCode::Pong => {
                    trace!(len = frame.payload().len(), "pong received");
                    let mut ctx = ControlContext::new(&mut self.read_deadline);
                    self.handler.on_pong(frame.payload(), &mut ctx);
                }
                OpCode::Close => return self.handle_close(&frame).await,
                _ => {
                    if let Some(assembled) = self.assembler.push(frame)? {
                        return assembled.into_message(self.max_message_size);
                    }
                }
            }
        }
    }

    async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buf)? {
                trace!(
                    opcode = %frame.opcode,
                    fin = frame.fin,
                    len = frame.payload().len(),
                    "frame received"
                );
                return Ok(frame);
            }
            self.fill().await?;
        }
    }

    async fn fill(&mut self) -> Result<()> {
        self.buf.reserve(self.read_buffer_size);
        let deadline = self.read_deadline;
        let (io, buf, closed_rx) = (&mut self.io, &mut self.buf, &mut self.closed_rx);

        let read = tokio::select! {
            res = with_deadline(deadline, async { Ok::<_, Error>(io.read_buf(buf).await?) }) => {
                res?
            }
            _ = closed_rx.wait_for(CloseState::is_closed) => return Err(Error::AlreadyClosed),
        };
        if read == 0 {
            return Err(Error::ConnectionClosed(None));
        }
        Ok(())
    }

    async fn handle_ping(&mut self, frame: &Frame) -> Result<()> {
        trace!(len = frame.payload().len(), "ping received");
        let reply = {
            let mut ctx = ControlContext::new(&mut self.read_deadline);
            self.handler.on_ping(frame.payload(), &mut ctx)
        };
        if let PingReply::Pong(payload) = reply {
            self.shared.try_reply(OpCode::Pong, &payload).await?;
        }
        Ok(())
    }

    async fn handle_close(&mut self, frame: &Frame) -> Result<Message> {
        let close = CloseFrame::parse(frame.payload())?;
        self.close_seen = true;
        self.shared.record_peer_close(close.clone());

        let before = self.shared.transition(CloseState::after_receive);
        debug!(
            role = %self.shared.role,
            code = close.as_ref().map(|c| c.code.as_u16()),
            "close frame received"
        );
        if before == CloseState::Open {
            let reply = {
                let mut ctx = ControlContext::new(&mut self.read_deadline);
                self.handler.on_close(close.as_ref(), &mut ctx)
            };
            let payload = reply.map(|f| f.to_payload()).unwrap_or_default();
            self.shared.reply_close(&payload).await;
        } else {
            self.shared.teardown().await;
        }
        Ok(Message::Close(close))
    }

    /// Close the connection after `err` and remember it for later calls.
    async fn fail(&mut self, err: Error) -> Error {
        match err.close_code() {
            Some(code) if self.shared.state() == CloseState::Open => {
                warn!(
                    role = %self.shared.role,
                    code = code.as_u16(),
                    error = %err,
                    "closing connection on protocol error"
                );
                self.shared.transition(CloseState::after_send);
                let payload = format_close_message(code, &err.to_string());
                self.shared.reply_close(&payload).await;
            }
            _ => {
                debug!(role = %self.shared.role, error = %err, "read failed, closing connection");
                self.shared.teardown().await;
            }
        }
        self.assembler.reset();
        self.failure = Some(err.clone());
        err
    }
}

impl<S> std::fmt::Debug for MessageReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReader")
            .field("role", &self.shared.role)
            .field("buffered", &self.buf.len())
            .field("assembling", &self.assembler.is_assembling())
            .field("max_message_size", &self.max_message_size)
            .field("read_deadline", &self.read_deadline)
            .finish_non_exhaustive()
    }
}
