// Local-network peer transport built on libp2p with QUIC transport and mDNS
// discovery. Frame delivery between two named peers rides a request-response
// protocol; correlation happens at the envelope layer above, not here.

pub mod behaviour;
pub mod peers;
pub mod swarm;
pub mod transport;

pub use behaviour::{GarlandBehaviour, GarlandEvent};
pub use peers::{ConnectionInfo, PeerTracker};
pub use swarm::{spawn_swarm, SwarmCommand, SwarmConfig, SwarmNotification};
pub use transport::build_swarm;
