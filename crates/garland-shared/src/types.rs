use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Addressable identity of a peer on the local network.
///
/// `id` is the transport-level identifier (base58-encoded peer id) and is the
/// only field that matters for equality; `name` is the user-chosen display
/// name carried along for presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRef {
    pub id: String,
    pub name: String,
}

impl PeerRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Shortened id for log output.
    pub fn short(&self) -> &str {
        let end = self.id.len().min(8);
        &self.id[..end]
    }
}

impl PartialEq for PeerRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerRef {}

impl Hash for PeerRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.short())
        } else {
            write!(f, "{} ({})", self.name, self.short())
        }
    }
}

/// The two record kinds exchanged during sync. Recipients always sync before
/// gifts because gift records reference recipient ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Recipient,
    Gift,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Recipient => write!(f, "recipient"),
            RecordKind::Gift => write!(f, "gift"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_ref_equality_ignores_name() {
        let a = PeerRef::new("12D3KooWabc", "Alice's phone");
        let b = PeerRef::new("12D3KooWabc", "renamed");
        let c = PeerRef::new("12D3KooWxyz", "Alice's phone");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn peer_ref_short_handles_tiny_ids() {
        let p = PeerRef::new("abc", "x");
        assert_eq!(p.short(), "abc");
    }
}
