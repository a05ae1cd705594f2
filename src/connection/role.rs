//! Which end of the connection this engine plays.

/// Connection role.
///
/// Determines masking behavior per RFC 6455.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Masks every outgoing frame; rejects masked incoming frames.
    Client,
    /// Never masks; rejects unmasked incoming frames.
    Server,
}

impl Role {
    /// Check if this role must mask outgoing frames.
    #[inline]
    #[must_use]
    pub const fn masks_outgoing(&self) -> bool {
        matches!(self, Role::Client)
    }

    /// Check if this role expects incoming frames to be masked.
    #[inline]
    #[must_use]
    pub const fn expects_masked(&self) -> bool {
        matches!(self, Role::Server)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masking_rules() {
        assert!(Role::Client.masks_outgoing());
        assert!(!Role::Client.expects_masked());
        assert!(!Role::Server.masks_outgoing());
        assert!(Role::Server.expects_masked());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Client.to_string(), "client");
        assert_eq!(Role::Server.to_string(), "server");
    }
}
