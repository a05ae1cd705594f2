//! Deadlines, close state and teardown shared by the read and write halves.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, trace};

use crate::config::{Config, Timeouts};
use crate::connection::control::{ControlContext, ControlHandler};
use crate::connection::writer::{FrameSink, MessageWriter};
use crate::connection::{CloseState, Role};
use crate::error::{Error, Result};
use crate::message::CloseFrame;
use crate::protocol::OpCode;
use crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD;

/// Run `fut` until `deadline`, failing with [`Error::Timeout`] once it passes.
pub(crate) async fn with_deadline<T, F>(deadline: Option<Instant>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(at) => timeout_at(at, fut).await?,
        None => fut.await,
    }
}

/// State owned jointly by a connection's reader and writers.
///
/// `sink` serializes single frames on the wire; `gate` serializes whole data
/// messages so fragments of two messages never interleave. Control replies
/// only take `sink`, which lets them slip in between fragments.
pub(crate) struct Shared<S> {
    pub(crate) sink: tokio::sync::Mutex<FrameSink<S>>,
    pub(crate) gate: Arc<tokio::sync::Mutex<()>>,
    state: watch::Sender<CloseState>,
    peer_close: OnceLock<Option<CloseFrame>>,
    write_deadline: Mutex<Option<Instant>>,
    compress_writes: AtomicBool,
    compression_level: AtomicU32,
    pub(crate) negotiated_compression: bool,
    pub(crate) fragment_size: usize,
    pub(crate) timeouts: Timeouts,
    pub(crate) role: Role,
    pub(crate) subprotocol: Option<String>,
}

impl<S> Shared<S> {
    pub(crate) fn new(
        sink: FrameSink<S>,
        role: Role,
        config: &Config,
        subprotocol: Option<String>,
        compression: bool,
    ) -> Self {
        let (state, _) = watch::channel(CloseState::Open);
        Self {
            sink: tokio::sync::Mutex::new(sink),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            state,
            peer_close: OnceLock::new(),
            write_deadline: Mutex::new(None),
            compress_writes: AtomicBool::new(compression),
            compression_level: AtomicU32::new(config.compression_level),
            negotiated_compression: compression,
            fragment_size: config.fragment_size.max(1),
            timeouts: config.timeouts,
            role,
            subprotocol,
        }
    }

    pub(crate) fn state(&self) -> CloseState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<CloseState> {
        self.state.subscribe()
    }

    /// Apply `next` atomically and return the state it replaced.
    pub(crate) fn transition(&self, next: impl FnOnce(CloseState) -> CloseState) -> CloseState {
        let mut before = CloseState::Closed;
        self.state.send_if_modified(|state| {
            before = *state;
            *state = next(*state);
            *state != before
        });
        if before != self.state() {
            trace!(role = %self.role, from = %before, to = %self.state(), "close state changed");
        }
        before
    }

    pub(crate) fn mark_closed(&self) {
        self.transition(|_| CloseState::Closed);
    }

    /// Resolves once the connection reaches [`CloseState::Closed`].
    pub(crate) async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(CloseState::is_closed).await;
    }

    pub(crate) fn record_peer_close(&self, frame: Option<CloseFrame>) {
        let _ = self.peer_close.set(frame);
    }

    /// Fail unless data messages may still be written.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.state().can_send_data() {
            return Ok(());
        }
        match self.peer_close.get() {
            Some(frame) => Err(Error::ConnectionClosed(frame.clone())),
            None => Err(Error::AlreadyClosed),
        }
    }

    pub(crate) fn write_deadline(&self) -> Option<Instant> {
        *self
            .write_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_write_deadline(&self, deadline: Option<Instant>) {
        *self
            .write_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = deadline;
    }

    pub(crate) fn compress_writes(&self) -> bool {
        self.compress_writes.load(Ordering::Relaxed)
    }

    /// Has no effect unless compression was negotiated.
    pub(crate) fn enable_write_compression(&self, enabled: bool) {
        self.compress_writes
            .store(enabled && self.negotiated_compression, Ordering::Relaxed);
    }

    pub(crate) fn compression_level(&self) -> u32 {
        self.compression_level.load(Ordering::Relaxed)
    }

    pub(crate) fn set_compression_level(&self, level: u32) {
        self.compression_level.store(level.min(9), Ordering::Relaxed);
    }
}

impl<S: AsyncRead + AsyncWrite> Shared<S> {
    /// Tear down after a fatal error: transport failures close for good,
    /// other errors are handed back untouched.
    pub(crate) async fn check<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err @ (Error::Io(_) | Error::Timeout | Error::Compression(_))) = &result {
            debug!(role = %self.role, error = %err, "write failed, closing connection");
            self.teardown().await;
        }
        result
    }

    /// Mark the connection closed and shut the transport's write side.
    pub(crate) async fn teardown(&self) {
        self.mark_closed();
        let shutdown = async {
            let mut sink = self.sink.lock().await;
            sink.shutdown().await
        };
        match timeout(self.timeouts.control_reply, shutdown).await {
            Ok(Ok(())) => trace!(role = %self.role, "transport shut down"),
            Ok(Err(err)) => trace!(role = %self.role, error = %err, "transport shutdown failed"),
            Err(_) => debug!(role = %self.role, "transport shutdown timed out"),
        }
    }

    /// Write a close frame with a bounded wait for the frame writer, then
    /// shut the transport. The connection ends up closed either way.
    pub(crate) async fn reply_close(&self, payload: &[u8]) {
        let echo = async {
            let mut sink = self.sink.lock().await;
            sink.write_frame(true, false, OpCode::Close, payload).await?;
            sink.shutdown().await
        };
        match timeout(self.timeouts.control_reply, echo).await {
            Ok(Ok(())) => {
                debug!(role = %self.role, "close frame sent, transport shut down");
                self.mark_closed();
            }
            Ok(Err(err)) => {
                debug!(role = %self.role, error = %err, "close frame not delivered");
                self.mark_closed();
            }
            Err(_) => {
                debug!(role = %self.role, "frame writer busy, close frame dropped");
                self.teardown().await;
            }
        }
    }

    /// Write a control reply only if the frame writer is free right now.
    ///
    /// Returns `Ok(false)` when the reply was dropped.
    pub(crate) async fn try_reply(&self, opcode: OpCode, payload: &[u8]) -> Result<bool> {
        if payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(payload.len()));
        }
        let Ok(mut sink) = self.sink.try_lock() else {
            debug!(role = %self.role, %opcode, "frame writer busy, reply dropped");
            return Ok(false);
        };
        if !self.state().can_send_data() {
            return Ok(false);
        }
        timeout(
            self.timeouts.control_reply,
            sink.write_frame(true, false, opcode, payload),
        )
        .await??;
        Ok(true)
    }
}

/// Keepalive control handler: every pong pushes the read deadline out by
/// `pong_wait`.
///
/// Pair it with [`run_pinger`] on the write side, pinging every
/// [`ping_period`](Self::ping_period).
///
/// ```rust,ignore
/// let keepalive = KeepAlive::new(Duration::from_secs(60));
/// conn.set_read_deadline(Some(keepalive.next_deadline()));
/// let period = keepalive.ping_period();
/// conn.set_control_handler(keepalive);
/// let (mut reader, writer) = conn.split();
/// tokio::spawn(run_pinger(writer.clone(), period, Duration::from_secs(10)));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct KeepAlive {
    pong_wait: Duration,
}

impl KeepAlive {
    #[must_use]
    pub const fn new(pong_wait: Duration) -> Self {
        Self { pong_wait }
    }

    #[must_use]
    pub const fn pong_wait(&self) -> Duration {
        self.pong_wait
    }

    /// Pings go out at nine tenths of the pong wait.
    #[must_use]
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }

    /// Read deadline to install now.
    #[must_use]
    pub fn next_deadline(&self) -> Instant {
        Instant::now() + self.pong_wait
    }
}

impl ControlHandler for KeepAlive {
    fn on_pong(&mut self, _payload: &[u8], ctx: &mut ControlContext<'_>) {
        ctx.set_read_deadline(Some(self.next_deadline()));
    }
}

/// Send a ping every `period` until the connection closes.
///
/// Each ping must be written within `write_wait`.
///
/// # Errors
///
/// Returns the first write failure; the connection is torn down by then.
pub async fn run_pinger<S>(
    writer: MessageWriter<S>,
    period: Duration,
    write_wait: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match writer
                    .write_control(OpCode::Ping, &[], Some(Instant::now() + write_wait))
                    .await
                {
                    Ok(()) => trace!("keepalive ping sent"),
                    Err(Error::AlreadyClosed | Error::ConnectionClosed(_)) => return Ok(()),
                    Err(err) => return Err(err),
                }
            }
            () = writer.closed() => return Ok(()),
        }
    }
}
