//! Write attribution

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a registry write came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
    /// Direct client registration on this node
    Local,
    /// Replicated from a peer node
    Replication,
    /// Initial load at startup
    Bootstrap,
}

/// Attribution of a write to its origin and the party that made it
///
/// `name` is the client instance id for `Local` writes and the peer node id
/// for `Replication` writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Source {
    pub origin: Origin,
    pub name: String,
}

impl Source {
    /// Create a new source
    pub fn new(origin: Origin, name: impl Into<String>) -> Self {
        Self {
            origin,
            name: name.into(),
        }
    }

    /// Source for a direct client write
    pub fn local(name: impl Into<String>) -> Self {
        Self::new(Origin::Local, name)
    }

    /// Source for a write replicated from `peer`
    pub fn replication(peer: impl Into<String>) -> Self {
        Self::new(Origin::Replication, peer)
    }

    /// Source for an initial load
    pub fn bootstrap(name: impl Into<String>) -> Self {
        Self::new(Origin::Bootstrap, name)
    }

    /// Whether this is a direct client write
    pub fn is_local(&self) -> bool {
        self.origin == Origin::Local
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = match self.origin {
            Origin::Local => "LOCAL",
            Origin::Replication => "REPLICATION",
            Origin::Bootstrap => "BOOTSTRAP",
        };
        write!(f, "{}:{}", origin, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_display() {
        assert_eq!(Source::local("i-1").to_string(), "LOCAL:i-1");
        assert_eq!(
            Source::replication("node-b").to_string(),
            "REPLICATION:node-b"
        );
    }

    #[test]
    fn test_source_equality_includes_name() {
        assert_ne!(Source::replication("a"), Source::replication("b"));
        assert!(Source::local("x").is_local());
        assert!(!Source::bootstrap("x").is_local());
    }
}
