//! Node glue: transport notifications in, client/router/engine calls out.
//!
//! One [`SyncNode`] owns both halves of the RPC layer plus the merge engine,
//! and runs the single dispatch loop over swarm notifications. Frames are
//! decoded exactly once here; the envelope's kind discriminator routes
//! requests to the router and replies to the client, so a symmetric channel
//! never needs trial decoding.

use std::str::FromStr;
use std::sync::Arc;

use libp2p::PeerId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use garland_net::{SwarmCommand, SwarmNotification};
use garland_shared::{Envelope, PeerRef};
use garland_store::{PhotoStore, StoreHandle};

use crate::client::SyncClient;
use crate::engine::{EngineConfig, SyncEngine};
use crate::events::SyncEvent;
use crate::router::Router;

/// What this device does once a peer connection exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Wait to be dialed and serve requests. Never initiates.
    Host,
    /// Dial a discovered peer and pull its changes (the connecting side
    /// always initiates the sync session).
    Join,
    /// Dial a discovered peer for gift ownership queries only; no sync
    /// session is started.
    Query,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" => Ok(Role::Host),
            "join" => Ok(Role::Join),
            "query" => Ok(Role::Query),
            other => Err(format!("unknown role '{other}' (expected host, join or query)")),
        }
    }
}

/// Explicit node configuration; nothing is read from ambient global state.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// User-facing device name, stamped into outbound requests.
    pub display_name: String,
    pub role: Role,
    pub engine: EngineConfig,
}

/// Ties the transport to the client engine, the router, and sync sessions.
pub struct SyncNode {
    local: PeerRef,
    role: Role,
    client: Arc<SyncClient>,
    router: Arc<Router>,
    engine: Arc<SyncEngine>,
    commands: mpsc::Sender<SwarmCommand>,
    session: Option<JoinHandle<()>>,
}

impl SyncNode {
    pub fn new(
        local_peer_id: PeerId,
        config: NodeConfig,
        store: StoreHandle,
        photos: PhotoStore,
        commands: mpsc::Sender<SwarmCommand>,
        events: mpsc::Sender<SyncEvent>,
    ) -> Self {
        let local = PeerRef::new(local_peer_id.to_string(), config.display_name);

        let client = Arc::new(SyncClient::new(local.clone(), commands.clone()));
        let router = Arc::new(Router::new(
            local.clone(),
            store.clone(),
            photos.clone(),
            commands.clone(),
        ));
        let engine = Arc::new(SyncEngine::new(
            client.clone(),
            store,
            photos,
            events,
            config.engine,
        ));

        Self {
            local,
            role: config.role,
            client,
            router,
            engine,
            commands,
            session: None,
        }
    }

    /// Handle on the client engine, for ad-hoc calls such as gift ownership
    /// queries from the UI layer.
    pub fn client(&self) -> Arc<SyncClient> {
        self.client.clone()
    }

    /// Drive the node until the notification channel closes.
    pub async fn run(mut self, mut notifications: mpsc::Receiver<SwarmNotification>) {
        info!(local = %self.local, role = ?self.role, "Node event loop started");

        while let Some(notification) = notifications.recv().await {
            match notification {
                SwarmNotification::PeerDiscovered { peer_id, address } => {
                    // The host waits to be dialed; everyone else dials the
                    // first peer they find.
                    if self.role != Role::Host && self.client.connected_peer().is_err() {
                        info!(peer = %peer_id, addr = %address, "Dialing discovered peer");
                        if let Err(e) = self.commands.send(SwarmCommand::Dial(address)).await {
                            warn!(error = %e, "Dial command failed");
                        }
                    }
                }

                SwarmNotification::PeerConnected { peer_id, .. } => {
                    info!(peer = %peer_id, "Peer connected");
                    if self.role != Role::Host && self.client.connected_peer().is_err() {
                        self.client
                            .set_peer(PeerRef::new(peer_id.to_string(), String::new()));
                        if self.role == Role::Join {
                            self.start_session();
                        }
                    }
                }

                SwarmNotification::PeerDisconnected { peer_id } => {
                    info!(peer = %peer_id, "Peer disconnected");
                    if let Ok(peer) = self.client.connected_peer() {
                        if peer.id == peer_id.to_string() {
                            self.client.clear_peer();
                            self.cancel_session();
                        }
                    }
                }

                SwarmNotification::FrameReceived { peer_id, data } => {
                    self.route_frame(peer_id, data);
                }

                SwarmNotification::SendFailed { peer_id } => {
                    // The affected request will surface as a timeout on the
                    // caller's side.
                    warn!(peer = %peer_id, "Frame delivery failed");
                }
            }
        }

        info!("Node event loop terminated");
    }

    /// Route one raw frame. Decoded exactly once; the envelope kind decides
    /// the direction. A frame that fails to decode is dropped, and only that
    /// frame.
    fn route_frame(&self, from: PeerId, data: Vec<u8>) {
        match Envelope::from_bytes(&data) {
            Ok(Envelope::Request(request)) => {
                let router = self.router.clone();
                tokio::spawn(async move {
                    router.handle_request(request, from).await;
                });
            }
            Ok(reply) => self.client.handle_reply(reply),
            Err(e) => {
                warn!(peer = %from, error = %e, "Dropping undecodable frame");
            }
        }
    }

    fn start_session(&mut self) {
        self.cancel_session();
        let engine = self.engine.clone();
        self.session = Some(tokio::spawn(async move {
            // Failures are logged and reported through the event channel.
            let _ = engine.run().await;
        }));
    }

    /// Abort any in-flight session. Per-record transactions keep the store
    /// consistent at whatever the last commit was; the next session picks up
    /// from there.
    fn cancel_session(&mut self) {
        if let Some(session) = self.session.take() {
            if !session.is_finished() {
                warn!("Aborting in-flight sync session");
                session.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garland_shared::records::Changelist;
    use garland_shared::{Invocation, Request};
    use garland_store::Database;

    async fn test_node(role: Role) -> (SyncNode, mpsc::Receiver<SwarmCommand>) {
        let store = StoreHandle::spawn(Database::open_in_memory().unwrap());
        let photo_dir = tempfile::tempdir().unwrap();
        let photos = PhotoStore::new(photo_dir.path().to_path_buf())
            .await
            .unwrap();

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, _event_rx) = mpsc::channel(64);

        let node = SyncNode::new(
            PeerId::random(),
            NodeConfig {
                display_name: "Test device".into(),
                role,
                engine: EngineConfig::default(),
            },
            store,
            photos,
            cmd_tx,
            event_tx,
        );
        (node, cmd_rx)
    }

    #[test]
    fn role_parses_from_str() {
        assert_eq!("host".parse::<Role>().unwrap(), Role::Host);
        assert_eq!(" Join ".parse::<Role>().unwrap(), Role::Join);
        assert_eq!("QUERY".parse::<Role>().unwrap(), Role::Query);
        assert!("server".parse::<Role>().is_err());
    }

    #[tokio::test]
    async fn request_frames_are_served_and_garbage_is_dropped() {
        let (node, mut cmd_rx) = test_node(Role::Host).await;
        let (notif_tx, notif_rx) = mpsc::channel(16);
        tokio::spawn(node.run(notif_rx));

        let from = PeerId::random();

        // Garbage first: must not kill the loop.
        notif_tx
            .send(SwarmNotification::FrameReceived {
                peer_id: from,
                data: vec![0xde, 0xad, 0xbe, 0xef],
            })
            .await
            .unwrap();

        // A real request still gets answered afterwards.
        let mut request = Request::new(
            PeerRef::new(PeerId::random().to_string(), "Host"),
            Invocation::list_recipient_ids(),
        );
        request.client = Some(PeerRef::new(from.to_string(), "Guest"));
        let request_id = request.request_id;

        notif_tx
            .send(SwarmNotification::FrameReceived {
                peer_id: from,
                data: Envelope::Request(request).to_bytes().unwrap(),
            })
            .await
            .unwrap();

        match cmd_rx.recv().await.expect("reply expected") {
            SwarmCommand::SendFrame { peer, data } => {
                assert_eq!(peer, from);
                match Envelope::from_bytes(&data).unwrap() {
                    Envelope::Response(response) => {
                        assert_eq!(response.request_id, request_id);
                        let changelist: Changelist = response.decode_body().unwrap();
                        assert!(changelist.is_empty());
                    }
                    other => panic!("expected response, got {other:?}"),
                }
            }
            other => panic!("expected SendFrame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn join_node_dials_and_initiates() {
        let (node, mut cmd_rx) = test_node(Role::Join).await;
        let (notif_tx, notif_rx) = mpsc::channel(16);
        tokio::spawn(node.run(notif_rx));

        let peer = PeerId::random();
        let address: libp2p::Multiaddr = "/ip4/192.168.1.20/udp/4815/quic-v1".parse().unwrap();

        notif_tx
            .send(SwarmNotification::PeerDiscovered {
                peer_id: peer,
                address: address.clone(),
            })
            .await
            .unwrap();

        match cmd_rx.recv().await.expect("dial expected") {
            SwarmCommand::Dial(addr) => assert_eq!(addr, address),
            other => panic!("expected dial, got {other:?}"),
        }

        notif_tx
            .send(SwarmNotification::PeerConnected {
                peer_id: peer,
                address,
            })
            .await
            .unwrap();

        // The connecting side initiates: first session request is the
        // recipient changelist.
        match cmd_rx.recv().await.expect("session request expected") {
            SwarmCommand::SendFrame { peer: target, data } => {
                assert_eq!(target, peer);
                match Envelope::from_bytes(&data).unwrap() {
                    Envelope::Request(request) => {
                        assert_eq!(request.invocation, Invocation::list_recipient_ids());
                    }
                    other => panic!("expected request, got {other:?}"),
                }
            }
            other => panic!("expected SendFrame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn host_node_does_not_dial() {
        let (node, mut cmd_rx) = test_node(Role::Host).await;
        let (notif_tx, notif_rx) = mpsc::channel(16);
        tokio::spawn(node.run(notif_rx));

        notif_tx
            .send(SwarmNotification::PeerDiscovered {
                peer_id: PeerId::random(),
                address: "/ip4/192.168.1.20/udp/4815/quic-v1".parse().unwrap(),
            })
            .await
            .unwrap();

        // Give the loop a beat; no command should appear.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(cmd_rx.try_recv().is_err());
    }
}
