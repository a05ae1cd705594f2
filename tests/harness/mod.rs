//! Test harness utilities for end-to-end WebSocket testing.
//!
//! A [`TestServer`] accepts TCP connections, upgrades them with an
//! [`Upgrader`](wsgate::Upgrader) and echoes every data message. A
//! [`TestClient`] performs the opening handshake by hand and then speaks
//! through a client-role [`Connection`](wsgate::Connection).

#![allow(dead_code)]

mod client;
mod server;

pub use client::{TestClient, raw_handshake};
pub use server::TestServer;
