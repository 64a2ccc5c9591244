//! Composed libp2p `NetworkBehaviour` for Garland nodes.
//!
//! Combines mDNS (same-network peer discovery) with a request-response
//! protocol used as a reliable directed frame channel. A frame is an opaque
//! byte payload; the receiver acks it at this layer and the payload is
//! interpreted by the envelope codec above.

use libp2p::{
    mdns, request_response,
    swarm::NetworkBehaviour,
};
use serde::{Deserialize, Serialize};

/// One directed message between two peers: an already-encoded envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame(pub Vec<u8>);

/// Transport-level delivery acknowledgement. Carries no data; request
/// correlation lives in the envelope layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameAck;

/// Composed network behaviour for Garland nodes.
///
/// All sub-behaviours are driven by the single swarm event loop.
/// Construction is handled by [`super::transport::build_swarm`] via
/// `SwarmBuilder`.
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "GarlandEvent")]
pub struct GarlandBehaviour {
    /// Same-network peer discovery
    pub mdns: mdns::tokio::Behaviour,
    /// Directed frame delivery with per-frame acks
    pub messaging: request_response::cbor::Behaviour<Frame, FrameAck>,
}

/// Events emitted by the composed behaviour, one variant per sub-behaviour.
#[derive(Debug)]
pub enum GarlandEvent {
    Mdns(mdns::Event),
    Messaging(request_response::Event<Frame, FrameAck>),
}

impl From<mdns::Event> for GarlandEvent {
    fn from(event: mdns::Event) -> Self {
        GarlandEvent::Mdns(event)
    }
}

impl From<request_response::Event<Frame, FrameAck>> for GarlandEvent {
    fn from(event: request_response::Event<Frame, FrameAck>) -> Self {
        GarlandEvent::Messaging(event)
    }
}
