//! Peer connection tracking.
//!
//! Maintains an in-memory map of connected peers, their addresses, and when
//! the connection was established.

use std::collections::HashMap;

use libp2p::{Multiaddr, PeerId};
use tracing::debug;

/// Information about a connected peer.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// The peer's libp2p ID.
    pub peer_id: PeerId,
    /// The multiaddr through which we are connected.
    pub address: Multiaddr,
    /// Timestamp of when the connection was established (Unix epoch millis).
    pub connected_at: u64,
}

/// Tracks all currently connected peers.
#[derive(Debug, Clone, Default)]
pub struct PeerTracker {
    peers: HashMap<PeerId, ConnectionInfo>,
}

impl PeerTracker {
    /// Create a new, empty peer tracker.
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Record a newly connected peer.
    pub fn on_connected(&mut self, peer_id: PeerId, address: Multiaddr) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let info = ConnectionInfo {
            peer_id,
            address: address.clone(),
            connected_at: now,
        };

        debug!(peer = %peer_id, addr = %address, "Tracking new peer connection");

        self.peers.insert(peer_id, info);
    }

    /// Remove a peer that has fully disconnected.
    pub fn on_disconnected(&mut self, peer_id: &PeerId) {
        if self.peers.remove(peer_id).is_some() {
            debug!(peer = %peer_id, "Removed peer from tracker");
        }
    }

    /// Get connection info for a specific peer.
    pub fn get(&self, peer_id: &PeerId) -> Option<&ConnectionInfo> {
        self.peers.get(peer_id)
    }

    /// Return a list of all connected peer IDs.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    /// Return the number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Check whether we are connected to a given peer.
    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_peer_id() -> PeerId {
        PeerId::random()
    }

    fn test_addr() -> Multiaddr {
        "/ip4/127.0.0.1/udp/4815/quic-v1".parse().unwrap()
    }

    #[test]
    fn test_connect_disconnect() {
        let mut tracker = PeerTracker::new();
        let peer = test_peer_id();
        let addr = test_addr();

        assert!(!tracker.is_connected(&peer));
        assert_eq!(tracker.peer_count(), 0);

        tracker.on_connected(peer, addr);
        assert!(tracker.is_connected(&peer));
        assert_eq!(tracker.peer_count(), 1);

        tracker.on_disconnected(&peer);
        assert!(!tracker.is_connected(&peer));
        assert_eq!(tracker.peer_count(), 0);
    }

    #[test]
    fn test_connected_peers_list() {
        let mut tracker = PeerTracker::new();
        let p1 = test_peer_id();
        let p2 = test_peer_id();
        let addr = test_addr();

        tracker.on_connected(p1, addr.clone());
        tracker.on_connected(p2, addr);

        let peers = tracker.connected_peers();
        assert_eq!(peers.len(), 2);
        assert!(peers.contains(&p1));
        assert!(peers.contains(&p2));
    }
}
