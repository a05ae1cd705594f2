//! Close handshake state machine (RFC 6455 Section 7).

/// Where the connection stands in the close handshake.
///
/// ```text
/// Open ──send close──▶ CloseSent ──receive close──▶ Closed
///  │                                                  ▲
///  └──receive close──▶ CloseReceived ──send close─────┘
/// ```
///
/// Any fatal error or transport teardown jumps straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CloseState {
    #[default]
    Open,
    CloseSent,
    CloseReceived,
    Closed,
}

impl CloseState {
    /// State after this side writes a close frame.
    #[must_use]
    pub const fn after_send(self) -> Self {
        match self {
            CloseState::Open => CloseState::CloseSent,
            _ => CloseState::Closed,
        }
    }

    /// State after the peer's close frame arrives.
    #[must_use]
    pub const fn after_receive(self) -> Self {
        match self {
            CloseState::Open => CloseState::CloseReceived,
            _ => CloseState::Closed,
        }
    }

    /// Data frames may only be written while fully open.
    #[must_use]
    #[inline]
    pub const fn can_send_data(&self) -> bool {
        matches!(self, CloseState::Open)
    }

    #[must_use]
    #[inline]
    pub const fn is_closed(&self) -> bool {
        matches!(self, CloseState::Closed)
    }
}

impl std::fmt::Display for CloseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CloseState::Open => "open",
            CloseState::CloseSent => "close-sent",
            CloseState::CloseReceived => "close-received",
            CloseState::Closed => "closed",
        };
        f.write_str(name)
    }
}
