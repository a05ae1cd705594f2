//! WebSocket frame encoding and decoding (RFC 6455 Section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                 Masking key (if MASK set)                     |
//! +---------------------------------------------------------------+
//! |                     Payload data                              |
//! +---------------------------------------------------------------+
//! ```
//!
//! [`FrameCodec`] decodes frames out of a read buffer and rejects anything the
//! connection's role and negotiated extensions do not allow, before the
//! payload has even arrived.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::connection::Role;
use crate::error::{Error, Result};
use crate::message::{CloseCode, format_close_message};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// A single WebSocket frame.
///
/// Decoded frames keep the mask key they arrived with; the payload is always
/// stored unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Per-message compression marker (permessage-deflate).
    pub rsv1: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Mask key applied on the wire, if any.
    pub mask: Option<[u8; 4]>,
    payload: Bytes,
}

impl Frame {
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            rsv1: false,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, data)
    }

    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, data)
    }

    #[must_use]
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, data)
    }

    #[must_use]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, data)
    }

    /// Close frame carrying `code` and `reason` (reason cut to 123 bytes).
    #[must_use]
    pub fn close(code: CloseCode, reason: &str) -> Self {
        Self::new(true, OpCode::Close, format_close_message(code, reason))
    }

    #[must_use]
    pub fn with_rsv1(mut self, rsv1: bool) -> Self {
        self.rsv1 = rsv1;
        self
    }

    #[must_use]
    pub fn with_mask(mut self, mask: Option<[u8; 4]>) -> Self {
        self.mask = mask;
        self
    }

    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Total encoded size of this frame.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        header_len(self.payload.len(), self.mask.is_some()) + self.payload.len()
    }

    /// Append the wire form of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        encode_frame(dst, self.fin, self.rsv1, self.opcode, self.mask, &self.payload);
    }
}

/// Size of the header for a payload of `payload_len` bytes.
#[inline]
#[must_use]
pub const fn header_len(payload_len: usize, masked: bool) -> usize {
    let base = if payload_len <= 125 {
        2
    } else if payload_len <= 0xFFFF {
        4
    } else {
        10
    };
    if masked { base + 4 } else { base }
}

/// Write one frame into `dst`, masking the payload in place when a key is
/// given.
pub fn encode_frame(
    dst: &mut BytesMut,
    fin: bool,
    rsv1: bool,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    payload: &[u8],
) {
    let len = payload.len();
    dst.reserve(header_len(len, mask.is_some()) + len);

    let mut byte0 = opcode.as_u8();
    if fin {
        byte0 |= 0x80;
    }
    if rsv1 {
        byte0 |= 0x40;
    }
    dst.put_u8(byte0);

    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    if len <= 125 {
        dst.put_u8(mask_bit | len as u8);
    } else if len <= 0xFFFF {
        dst.put_u8(mask_bit | 126);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(mask_bit | 127);
        dst.put_u64(len as u64);
    }

    let start = dst.len();
    match mask {
        Some(key) => {
            dst.put_slice(&key);
            dst.put_slice(payload);
            apply_mask(&mut dst[start + 4..], key);
        }
        None => dst.put_slice(payload),
    }
}

#[derive(Debug, Clone, Copy)]
struct Header {
    fin: bool,
    rsv1: bool,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    payload_len: usize,
    header_len: usize,
}

/// Parse a header from `buf`, returning `None` until enough bytes arrived.
fn parse_header(buf: &[u8]) -> Result<Option<Header>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let byte0 = buf[0];
    let byte1 = buf[1];

    if byte0 & 0x30 != 0 {
        return Err(Error::ReservedBitsSet);
    }
    let opcode = OpCode::from_u8(byte0 & 0x0F)?;
    let masked = byte1 & 0x80 != 0;

    let (payload_len, mut len) = match byte1 & 0x7F {
        126 => {
            if buf.len() < 4 {
                return Ok(None);
            }
            (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
        }
        127 => {
            if buf.len() < 10 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            let value = u64::from_be_bytes(raw);
            if value & (1 << 63) != 0 {
                return Err(Error::ProtocolViolation(
                    "most significant bit of 64-bit length set".into(),
                ));
            }
            (value, 10)
        }
        short => (u64::from(short), 2),
    };

    let payload_len = usize::try_from(payload_len).map_err(|_| Error::PayloadTooLargeForPlatform {
        size: payload_len,
        max: usize::MAX as u64,
    })?;

    let mask = if masked {
        if buf.len() < len + 4 {
            return Ok(None);
        }
        let key = [buf[len], buf[len + 1], buf[len + 2], buf[len + 3]];
        len += 4;
        Some(key)
    } else {
        None
    };

    Ok(Some(Header {
        fin: byte0 & 0x80 != 0,
        rsv1: byte0 & 0x40 != 0,
        opcode,
        mask,
        payload_len,
        header_len: len,
    }))
}

/// Role-aware frame decoder.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    role: Role,
    max_payload: usize,
    compression: bool,
}

impl FrameCodec {
    /// Decoder for a connection acting as `role`, accepting payloads of at
    /// most `max_payload` bytes per frame.
    #[must_use]
    pub fn new(role: Role, max_payload: usize) -> Self {
        Self {
            role,
            max_payload,
            compression: false,
        }
    }

    /// Accept rsv1 on the first frame of data messages.
    #[must_use]
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn set_max_payload(&mut self, max: usize) {
        self.max_payload = max;
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    fn validate(&self, header: &Header) -> Result<()> {
        if header.opcode.is_control() {
            if !header.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if header.payload_len > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(header.payload_len));
            }
        }
        if header.rsv1 && (!self.compression || !header.opcode.starts_message()) {
            return Err(Error::ReservedBitsSet);
        }
        match (self.role, header.mask.is_some()) {
            (Role::Server, false) => return Err(Error::UnmaskedClientFrame),
            (Role::Client, true) => return Err(Error::MaskedServerFrame),
            _ => {}
        }
        if header.payload_len > self.max_payload {
            return Err(Error::MessageTooLarge {
                size: header.payload_len,
                max: self.max_payload,
            });
        }
        Ok(())
    }

    /// Decode the next frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Header violations are
    /// reported as soon as the header is complete, without waiting for the
    /// payload.
    ///
    /// # Errors
    ///
    /// Any protocol violation in the header, see [`Error::close_code`] for the
    /// resulting close code.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        let Some(header) = parse_header(buf)? else {
            return Ok(None);
        };
        self.validate(&header)?;

        if buf.len() - header.header_len < header.payload_len {
            buf.reserve(header.payload_len.saturating_add(header.header_len) - buf.len());
            return Ok(None);
        }

        buf.advance(header.header_len);
        let mut payload = buf.split_to(header.payload_len);
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame {
            fin: header.fin,
            rsv1: header.rsv1,
            opcode: header.opcode,
            mask: header.mask,
            payload: payload.freeze(),
        }))
    }
}
