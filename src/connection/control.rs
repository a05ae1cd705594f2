//! Application hooks for ping, pong and close frames.

use bytes::Bytes;
use tokio::time::Instant;

use crate::message::CloseFrame;

/// What to send back for a received ping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingReply {
    /// Send a pong carrying this payload (at most 125 bytes).
    Pong(Bytes),
    /// Send nothing.
    Ignore,
}

/// Read-side state a control handler may adjust.
#[derive(Debug)]
pub struct ControlContext<'a> {
    read_deadline: &'a mut Option<Instant>,
}

impl<'a> ControlContext<'a> {
    pub(crate) fn new(read_deadline: &'a mut Option<Instant>) -> Self {
        Self { read_deadline }
    }

    /// Replace the deadline that bounds subsequent reads.
    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        *self.read_deadline = deadline;
    }

    #[must_use]
    pub fn read_deadline(&self) -> Option<Instant> {
        *self.read_deadline
    }
}

/// Reacts to control frames as the reader encounters them.
///
/// Handlers run on the read path, between fragments of a data message if
/// necessary, and must not block. Every method has a default matching
/// RFC 6455 behavior.
pub trait ControlHandler: Send + Sync {
    /// Default: echo the payload in a pong.
    fn on_ping(&mut self, payload: &[u8], _ctx: &mut ControlContext<'_>) -> PingReply {
        PingReply::Pong(Bytes::copy_from_slice(payload))
    }

    /// Default: nothing.
    fn on_pong(&mut self, _payload: &[u8], _ctx: &mut ControlContext<'_>) {}

    /// Close frame to echo when the peer closes first. `None` sends an empty
    /// close payload.
    ///
    /// Default: echo the peer's status code without a reason.
    fn on_close(
        &mut self,
        frame: Option<&CloseFrame>,
        _ctx: &mut ControlContext<'_>,
    ) -> Option<CloseFrame> {
        frame.map(|f| CloseFrame::new(f.code, ""))
    }
}

/// The RFC 6455 defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultControlHandler;

impl ControlHandler for DefaultControlHandler {}
