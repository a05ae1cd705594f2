//! Reassembly of fragmented data messages (RFC 6455 Section 5.4).

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::extensions::decompress;
use crate::message::Message;
use crate::protocol::{Frame, OpCode};

/// Accumulates the frames of one data message.
///
/// Control frames are never pushed here; the reader handles them between
/// fragments so the accumulation state is untouched.
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    opcode: Option<OpCode>,
    compressed: bool,
    max_size: usize,
}

impl MessageAssembler {
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            opcode: None,
            compressed: false,
            max_size,
        }
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
    }

    /// Add a data frame. Returns the message once its final frame arrives.
    ///
    /// # Errors
    ///
    /// - [`Error::ProtocolViolation`] for a continuation with nothing in flight,
    ///   or a new message starting before the previous one finished.
    /// - [`Error::MessageTooLarge`] when the accumulated payload exceeds the limit.
    pub fn push(&mut self, frame: Frame) -> Result<Option<AssembledMessage>> {
        if frame.opcode.is_control() {
            return Ok(None);
        }

        if frame.opcode == OpCode::Continuation {
            if self.opcode.is_none() {
                return Err(Error::ProtocolViolation(
                    "continuation frame without a message in flight".into(),
                ));
            }
        } else {
            if self.opcode.is_some() {
                return Err(Error::ProtocolViolation(
                    "new data frame while a fragmented message is in flight".into(),
                ));
            }
            self.opcode = Some(frame.opcode);
            self.compressed = frame.rsv1;
        }

        let size = self.buffer.len() + frame.payload().len();
        if size > self.max_size {
            self.reset();
            return Err(Error::MessageTooLarge {
                size,
                max: self.max_size,
            });
        }
        self.buffer.extend_from_slice(frame.payload());

        if !frame.fin {
            return Ok(None);
        }
        match self.opcode.take() {
            Some(opcode) => Ok(Some(AssembledMessage {
                opcode,
                compressed: std::mem::take(&mut self.compressed),
                payload: self.buffer.split().freeze(),
            })),
            None => Ok(None),
        }
    }

    #[must_use]
    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.opcode = None;
        self.compressed = false;
    }
}

/// A complete data message as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    pub opcode: OpCode,
    /// The first frame had rsv1 set.
    pub compressed: bool,
    pub payload: Bytes,
}

impl AssembledMessage {
    /// Inflate (if compressed) and validate into an application message.
    ///
    /// # Errors
    ///
    /// - [`Error::Compression`] or [`Error::MessageTooLarge`] from inflation.
    /// - [`Error::InvalidUtf8`] for a text message that is not UTF-8.
    pub fn into_message(self, max_size: usize) -> Result<Message> {
        let payload = if self.compressed {
            decompress(&self.payload, max_size)?
        } else {
            self.payload.to_vec()
        };
        match self.opcode {
            OpCode::Text => Ok(Message::Text(String::from_utf8(payload)?)),
            _ => Ok(Message::Binary(payload)),
        }
    }
}
