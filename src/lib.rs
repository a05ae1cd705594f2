//! # wsgate - RFC 6455 WebSocket engine
//!
//! `wsgate` runs the WebSocket protocol over a byte stream taken over from
//! an HTTP server after a successful upgrade handshake.
//!
//! ## Features
//!
//! - **Server handshake** with subprotocol selection, origin checks and
//!   permessage-deflate negotiation (RFC 7692, no context takeover)
//! - **Frame codec** enforcing masking, reserved bits and size limits
//! - **Fragmentation** with control frames interleaved between fragments
//! - **Close handshake** with deadlines and a single teardown path
//! - **Split reader/writer** for one reading and many writing tasks
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use http::HeaderMap;
//! use wsgate::{HandshakePolicy, Message, RawTransport, Upgrader};
//!
//! let upgrader = Upgrader::new(HandshakePolicy::new().with_compression(true));
//! let (request, transport) = RawTransport::read_request(tcp, 8192).await?;
//! let mut conn = upgrader.upgrade(&request, HeaderMap::new(), transport).await?;
//!
//! while let Some(msg) = conn.read_message().await? {
//!     if msg.is_close() {
//!         break;
//!     }
//!     conn.write_message(msg).await?;
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod message;
pub mod protocol;
pub mod upgrade;

pub use config::{BufferPool, Config, Limits, Timeouts};
pub use connection::{
    CloseState, Connection, ControlContext, ControlHandler, DefaultControlHandler, FragmentWriter,
    KeepAlive, MessageReader, MessageWriter, PingReply, Role, run_pinger,
};
pub use error::{Error, HandshakeError, Result};
pub use message::{CloseCode, CloseFrame, Message};
pub use protocol::{Frame, OpCode, WS_GUID, compute_accept_key};
pub use upgrade::{
    AllowAnyOrigin, AllowedOrigins, ErrorResponder, HandshakePolicy, HostTransport, OriginCheck,
    PlainErrorResponder, RawTransport, SameOrigin, Upgrader,
};
