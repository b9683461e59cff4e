//! Key namespace shared by all replicas
//!
//! | Key | Value | TTL |
//! |---|---|---|
//! | `heartbeat:<instanceId>` | versioned `HeartbeatRecord` JSON | 60s |
//! | `server:<serverId>` | versioned `ServerRecord` JSON | 300s |
//! | `blacklist:<tokenHash>` | sentinel | token's remaining lifetime |

/// Prefix families stored in the shared store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpace {
    Heartbeat,
    Server,
    Blacklist,
}

impl KeySpace {
    pub fn prefix(self) -> &'static str {
        match self {
            KeySpace::Heartbeat => "heartbeat:",
            KeySpace::Server => "server:",
            KeySpace::Blacklist => "blacklist:",
        }
    }

    /// Full key for an id in this namespace
    pub fn key(self, id: &str) -> String {
        format!("{}{}", self.prefix(), id)
    }

    /// Scan pattern matching every key in this namespace
    pub fn pattern(self) -> String {
        format!("{}*", self.prefix())
    }

    /// Strip the namespace prefix, returning the id.
    ///
    /// Returns `None` for keys outside the namespace or with an empty id.
    pub fn id_of(self, key: &str) -> Option<&str> {
        key.strip_prefix(self.prefix()).filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_and_patterns() {
        assert_eq!(KeySpace::Server.key("eu-1"), "server:eu-1");
        assert_eq!(KeySpace::Heartbeat.pattern(), "heartbeat:*");
        assert_eq!(KeySpace::Blacklist.key("abc"), "blacklist:abc");
    }

    #[test]
    fn test_id_of() {
        assert_eq!(KeySpace::Server.id_of("server:eu-1"), Some("eu-1"));
        assert_eq!(KeySpace::Server.id_of("heartbeat:eu-1"), None);
        assert_eq!(KeySpace::Server.id_of("server:"), None);
    }
}
