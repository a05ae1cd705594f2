//! Wire-level pieces of RFC 6455: opcodes, masking, frame codec, message
//! reassembly and the opening handshake.

pub mod assembler;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;

pub use assembler::{AssembledMessage, MessageAssembler};
pub use frame::{Frame, FrameCodec, MAX_CONTROL_FRAME_PAYLOAD};
pub use handshake::{WS_GUID, compute_accept_key};
pub use mask::{MaskGenerator, apply_mask};
pub use opcode::OpCode;
