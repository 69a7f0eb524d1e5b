use std::{fmt, net::SocketAddr};

/// A peer's identity: its gossip address and the display name it announced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    /// The address the peer's gossip service listens on.
    pub address: SocketAddr,
    /// A human readable name, only used for display.
    pub name: String,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.address)
    }
}
