//! Main swarm orchestration with tokio mpsc command/notification pattern.
//!
//! The swarm event loop runs in a dedicated tokio task. External code
//! communicates with it through typed command and notification channels,
//! keeping the networking layer fully asynchronous and decoupled.

use futures::StreamExt;
use libp2p::{mdns, request_response, swarm::SwarmEvent, Multiaddr, PeerId};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use garland_shared::constants::DEFAULT_QUIC_PORT;

use crate::behaviour::{Frame, FrameAck, GarlandEvent};
use crate::peers::PeerTracker;
use crate::transport::build_swarm;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the swarm task.
#[derive(Debug)]
pub enum SwarmCommand {
    /// Dial a remote peer at the given multiaddr.
    Dial(Multiaddr),
    /// Deliver an encoded envelope frame to a connected peer.
    SendFrame { peer: PeerId, data: Vec<u8> },
    /// Request a snapshot of currently connected peers.
    GetPeers(tokio::sync::oneshot::Sender<Vec<PeerId>>),
    /// Gracefully shut down the swarm.
    Shutdown,
}

/// Notifications sent *from* the swarm task to the application.
#[derive(Debug, Clone)]
pub enum SwarmNotification {
    /// mDNS found a peer on the local network.
    PeerDiscovered { peer_id: PeerId, address: Multiaddr },
    /// A new peer connected.
    PeerConnected { peer_id: PeerId, address: Multiaddr },
    /// A peer disconnected.
    PeerDisconnected { peer_id: PeerId },
    /// An envelope frame arrived from a peer.
    FrameReceived { peer_id: PeerId, data: Vec<u8> },
    /// A frame could not be delivered to a peer.
    SendFailed { peer_id: PeerId },
}

/// Configuration for spawning the swarm.
pub struct SwarmConfig {
    /// Port to listen on (defaults to `DEFAULT_QUIC_PORT`).
    pub listen_port: u16,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_QUIC_PORT,
        }
    }
}

/// Spawn the libp2p swarm in a background tokio task.
///
/// Returns channels for sending commands and receiving notifications,
/// plus the local `PeerId`.
pub async fn spawn_swarm(
    keypair: libp2p::identity::Keypair,
    config: SwarmConfig,
) -> anyhow::Result<(
    mpsc::Sender<SwarmCommand>,
    mpsc::Receiver<SwarmNotification>,
    PeerId,
)> {
    let mut swarm = build_swarm(keypair)?;
    let local_peer_id = *swarm.local_peer_id();

    // Listen on QUIC (IPv4 and IPv6)
    let listen_addr_v4: Multiaddr = format!("/ip4/0.0.0.0/udp/{}/quic-v1", config.listen_port)
        .parse()
        .expect("valid multiaddr");
    let listen_addr_v6: Multiaddr = format!("/ip6/::/udp/{}/quic-v1", config.listen_port)
        .parse()
        .expect("valid multiaddr");

    swarm.listen_on(listen_addr_v4)?;
    swarm.listen_on(listen_addr_v6)?;

    info!(peer_id = %local_peer_id, port = config.listen_port, "Swarm listening");

    // Create channels
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SwarmCommand>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<SwarmNotification>(256);

    // Spawn the event loop
    tokio::spawn(async move {
        let mut peer_tracker = PeerTracker::new();

        loop {
            tokio::select! {
                // --- Incoming commands ---
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SwarmCommand::Dial(addr)) => {
                            if let Err(e) = swarm.dial(addr.clone()) {
                                error!(addr = %addr, error = %e, "Dial failed");
                            }
                        }
                        Some(SwarmCommand::SendFrame { peer, data }) => {
                            debug!(peer = %peer, len = data.len(), "Sending frame");
                            swarm
                                .behaviour_mut()
                                .messaging
                                .send_request(&peer, Frame(data));
                        }
                        Some(SwarmCommand::GetPeers(reply)) => {
                            let peers = peer_tracker.connected_peers();
                            let _ = reply.send(peers);
                        }
                        Some(SwarmCommand::Shutdown) => {
                            info!("Swarm shutdown requested");
                            break;
                        }
                        None => {
                            // All senders dropped
                            info!("Command channel closed, shutting down swarm");
                            break;
                        }
                    }
                }

                // --- Swarm events ---
                event = swarm.select_next_some() => {
                    match event {
                        SwarmEvent::Behaviour(GarlandEvent::Mdns(mdns::Event::Discovered(list))) => {
                            for (peer_id, address) in list {
                                if peer_id == local_peer_id {
                                    continue;
                                }
                                debug!(peer = %peer_id, addr = %address, "mDNS discovered peer");
                                // Attach the peer id so the address can be
                                // dialed as-is.
                                let address = address
                                    .with_p2p(peer_id)
                                    .unwrap_or_else(|addr| addr);
                                let _ = notif_tx
                                    .send(SwarmNotification::PeerDiscovered { peer_id, address })
                                    .await;
                            }
                        }

                        SwarmEvent::Behaviour(GarlandEvent::Mdns(mdns::Event::Expired(list))) => {
                            for (peer_id, _) in list {
                                debug!(peer = %peer_id, "mDNS record expired");
                            }
                        }

                        SwarmEvent::Behaviour(GarlandEvent::Messaging(
                            request_response::Event::Message { peer, message, .. },
                        )) => {
                            match message {
                                request_response::Message::Request { request, channel, .. } => {
                                    debug!(peer = %peer, len = request.0.len(), "Frame received");
                                    if swarm
                                        .behaviour_mut()
                                        .messaging
                                        .send_response(channel, FrameAck)
                                        .is_err()
                                    {
                                        debug!(peer = %peer, "Peer went away before frame ack");
                                    }
                                    let _ = notif_tx
                                        .send(SwarmNotification::FrameReceived {
                                            peer_id: peer,
                                            data: request.0,
                                        })
                                        .await;
                                }
                                request_response::Message::Response { .. } => {
                                    // Delivery ack; nothing to surface.
                                }
                            }
                        }

                        SwarmEvent::Behaviour(GarlandEvent::Messaging(
                            request_response::Event::OutboundFailure { peer, error, .. },
                        )) => {
                            warn!(peer = %peer, error = %error, "Frame delivery failed");
                            let _ = notif_tx
                                .send(SwarmNotification::SendFailed { peer_id: peer })
                                .await;
                        }

                        SwarmEvent::Behaviour(GarlandEvent::Messaging(
                            request_response::Event::InboundFailure { peer, error, .. },
                        )) => {
                            warn!(peer = %peer, error = %error, "Inbound frame failure");
                        }

                        SwarmEvent::Behaviour(GarlandEvent::Messaging(
                            request_response::Event::ResponseSent { .. },
                        )) => {}

                        SwarmEvent::ConnectionEstablished {
                            peer_id, endpoint, ..
                        } => {
                            let addr = endpoint.get_remote_address().clone();
                            peer_tracker.on_connected(peer_id, addr.clone());

                            info!(peer = %peer_id, addr = %addr, "Peer connected");
                            let _ = notif_tx
                                .send(SwarmNotification::PeerConnected {
                                    peer_id,
                                    address: addr,
                                })
                                .await;
                        }

                        SwarmEvent::ConnectionClosed {
                            peer_id,
                            num_established,
                            ..
                        } => {
                            if num_established == 0 {
                                peer_tracker.on_disconnected(&peer_id);
                                info!(peer = %peer_id, "Peer disconnected");
                                let _ = notif_tx
                                    .send(SwarmNotification::PeerDisconnected { peer_id })
                                    .await;
                            }
                        }

                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!(addr = %address, "Listening on new address");
                        }

                        SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                            warn!(
                                peer = ?peer_id,
                                error = %error,
                                "Outgoing connection error"
                            );
                        }

                        SwarmEvent::IncomingConnectionError { error, .. } => {
                            warn!(error = %error, "Incoming connection error");
                        }

                        _ => {}
                    }
                }
            }
        }

        info!("Swarm event loop terminated");
    });

    Ok((cmd_tx, notif_rx, local_peer_id))
}
