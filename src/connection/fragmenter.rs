//! Message fragmentation for outgoing data messages (RFC 6455 Section 5.4).

use bytes::Bytes;

use crate::protocol::{Frame, OpCode};

/// Iterator that produces frames from a message payload.
///
/// The first frame carries the message opcode (and rsv1 when the payload is
/// compressed); the rest are continuations. Payload slices share the
/// original buffer.
#[derive(Debug)]
pub struct MessageFragmenter {
    payload: Bytes,
    opcode: OpCode,
    fragment_size: usize,
    compressed: bool,
    is_first: bool,
}

impl MessageFragmenter {
    #[must_use]
    pub fn new(payload: impl Into<Bytes>, opcode: OpCode, fragment_size: usize) -> Self {
        Self {
            payload: payload.into(),
            opcode,
            fragment_size: fragment_size.max(1),
            compressed: false,
            is_first: true,
        }
    }

    /// Mark the payload as permessage-deflate output.
    #[must_use]
    pub fn compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }
}

impl Iterator for MessageFragmenter {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.payload.is_empty() && !self.is_first {
            return None;
        }

        let chunk = self.payload.split_to(self.payload.len().min(self.fragment_size));
        let fin = self.payload.is_empty();

        let frame = if self.is_first {
            self.is_first = false;
            Frame::new(fin, self.opcode, chunk).with_rsv1(self.compressed)
        } else {
            Frame::new(fin, OpCode::Continuation, chunk)
        };
        Some(frame)
    }
}
