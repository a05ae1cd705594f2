//! WebSocket connections after the handshake.
//!
//! A [`Connection`] owns the transport. Internally it is a
//! [`MessageReader`] and a cloneable [`MessageWriter`] sharing one close
//! state; [`Connection::split`] hands them out so reading and writing can
//! happen on different tasks.
//!
//! ## Close handshake
//!
//! 1. **Open**: data flows both ways.
//! 2. **CloseSent** / **CloseReceived**: one close frame has crossed the wire.
//! 3. **Closed**: both close frames seen, or a fatal error or deadline ended
//!    the connection. The transport is shut down.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wsgate::{CloseCode, Config, Connection, Message, Role};
//!
//! let conn = Connection::new(stream, Role::Server, Config::server());
//! let (mut reader, writer) = conn.split();
//!
//! tokio::spawn(async move {
//!     while let Ok(Some(msg)) = reader.read_message().await {
//!         println!("received: {msg:?}");
//!     }
//! });
//! writer.write_message(Message::text("hello")).await?;
//! writer.close(CloseCode::Normal, "done").await?;
//! ```

mod control;
mod fragmenter;
mod lifecycle;
mod reader;
mod role;
mod state;
mod writer;

#[allow(clippy::module_inception)]
mod connection;

pub use connection::Connection;
pub use control::{ControlContext, ControlHandler, DefaultControlHandler, PingReply};
pub use fragmenter::MessageFragmenter;
pub use lifecycle::{KeepAlive, run_pinger};
pub use reader::MessageReader;
pub use role::Role;
pub use state::CloseState;
pub use writer::{FragmentWriter, MessageWriter};
