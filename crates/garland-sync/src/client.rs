//! Outbound RPC: typed one-shot calls against the connected peer.
//!
//! Every call stamps a fresh request id, parks a oneshot sender in the
//! pending map, ships the encoded envelope through the swarm command
//! channel, and races the reply against the request's timeout. Replies are
//! correlated purely by request id, so any number of calls may be in flight
//! at once and out-of-order delivery is fine.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use libp2p::PeerId;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use garland_net::SwarmCommand;
use garland_shared::constants::DEFAULT_REQUEST_TIMEOUT_SECS;
use garland_shared::records::{Changelist, GiftOwnership, GiftQuery, GiftRecord, RecipientRecord};
use garland_shared::{Envelope, Invocation, PeerRef, RecordKind, Request, Response};

use crate::error::SyncError;

type ReplyResult = Result<Response, String>;

/// Client half of the RPC layer.
pub struct SyncClient {
    /// Our own identity, stamped into every outbound request.
    local: PeerRef,
    commands: mpsc::Sender<SwarmCommand>,
    /// The single counterpart peer of the current session, if any.
    peer: Mutex<Option<PeerRef>>,
    /// One slot per in-flight request, keyed by request id.
    pending: Mutex<HashMap<Uuid, oneshot::Sender<ReplyResult>>>,
    default_timeout: Duration,
}

impl SyncClient {
    pub fn new(local: PeerRef, commands: mpsc::Sender<SwarmCommand>) -> Self {
        Self::with_timeout(
            local,
            commands,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    /// Like [`new`](Self::new) with an explicit per-request timeout.
    pub fn with_timeout(
        local: PeerRef,
        commands: mpsc::Sender<SwarmCommand>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            local,
            commands,
            peer: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    pub fn local(&self) -> &PeerRef {
        &self.local
    }

    /// Set the counterpart peer for subsequent calls.
    pub fn set_peer(&self, peer: PeerRef) {
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner) = Some(peer);
    }

    /// Forget the counterpart peer (it disconnected).
    pub fn clear_peer(&self) {
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// The counterpart peer, or [`SyncError::NotConnected`]. Checked before
    /// every call so "no peer" never masquerades as a timeout.
    pub fn connected_peer(&self) -> Result<PeerRef, SyncError> {
        self.peer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SyncError::NotConnected)
    }

    /// Feed a reply envelope (response or error frame) back into the client.
    /// Called from the node's dispatch loop.
    pub fn handle_reply(&self, envelope: Envelope) {
        match envelope {
            Envelope::Response(response) => {
                debug!(request_id = %response.request_id, invocation = %response.invocation, "Response received");
                self.resolve(response.request_id, Ok(response));
            }
            Envelope::Error(frame) => {
                debug!(request_id = %frame.request_id, invocation = %frame.invocation, "Error frame received");
                self.resolve(frame.request_id, Err(frame.message));
            }
            Envelope::Request(request) => {
                // Requests belong to the router; reaching here is a wiring bug.
                warn!(invocation = %request.invocation, "Request envelope routed to client, dropping");
            }
        }
    }

    fn resolve(&self, request_id: Uuid, reply: ReplyResult) {
        let slot = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&request_id);

        match slot {
            // The receiver may have timed out between removal and send;
            // dropping the reply is correct either way.
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => {
                // Likely a reply that arrived after our timeout. Not fatal.
                warn!(request_id = %request_id, "No pending slot for reply, discarding");
            }
        }
    }

    /// Send one request and await its reply or timeout.
    pub async fn call(&self, request: Request) -> Result<Response, SyncError> {
        let mut request = request;
        request.client = Some(self.local.clone());

        let request_id = request.request_id;
        let timeout = request.timeout;
        let invocation = request.invocation.clone();

        let target: PeerId = request
            .server
            .id
            .parse()
            .map_err(|_| SyncError::Transport(format!("invalid peer id '{}'", request.server.id)))?;

        let data = Envelope::Request(request).to_bytes()?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id, tx);

        debug!(request_id = %request_id, invocation = %invocation, "Sending request");

        if let Err(e) = self
            .commands
            .send(SwarmCommand::SendFrame { peer: target, data })
            .await
        {
            self.forget(request_id);
            return Err(SyncError::Transport(format!("swarm command channel closed: {e}")));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(response))) => Ok(response),
            Ok(Ok(Err(message))) => Err(SyncError::Remote(message)),
            Ok(Err(_)) => {
                // Sender dropped without a reply; the slot is already gone.
                Err(SyncError::Transport("reply channel closed".into()))
            }
            Err(_) => {
                self.forget(request_id);
                warn!(request_id = %request_id, invocation = %invocation, "Request timed out");
                Err(SyncError::Timeout { request_id })
            }
        }
    }

    fn forget(&self, request_id: Uuid) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&request_id);
    }

    async fn call_expecting<T: serde::de::DeserializeOwned>(
        &self,
        request: Request,
    ) -> Result<T, SyncError> {
        let response = self.call(request).await?;
        Ok(response.decode_body()?)
    }

    fn request(&self, invocation: Invocation) -> Result<Request, SyncError> {
        let server = self.connected_peer()?;
        Ok(Request::new(server, invocation).with_timeout(self.default_timeout))
    }

    // -- Typed operations ---------------------------------------------------

    /// `listRecipientIDs` / `listGiftIDs`: the peer's changelist summary.
    pub async fn fetch_changelist(&self, kind: RecordKind) -> Result<Changelist, SyncError> {
        let invocation = match kind {
            RecordKind::Recipient => Invocation::list_recipient_ids(),
            RecordKind::Gift => Invocation::list_gift_ids(),
        };
        self.call_expecting(self.request(invocation)?).await
    }

    /// `listRecipients`: full snapshots of every recipient, ordered by name.
    pub async fn fetch_recipient_roster(&self) -> Result<Vec<RecipientRecord>, SyncError> {
        self.call_expecting(self.request(Invocation::list_recipients())?)
            .await
    }

    /// `getRecipient/{id}`: one full recipient snapshot.
    pub async fn fetch_recipient(&self, id: Uuid) -> Result<RecipientRecord, SyncError> {
        self.call_expecting(self.request(Invocation::get_recipient(id))?)
            .await
    }

    /// `getGift/{id}`: one full gift snapshot with photo bytes attached when
    /// the peer has them.
    pub async fn fetch_gift(&self, id: Uuid) -> Result<GiftRecord, SyncError> {
        self.call_expecting(self.request(Invocation::get_gift(id))?)
            .await
    }

    /// `giftQuery/{id}`: ask the peer whether the scanned gift belongs to
    /// any of the given recipients.
    pub async fn query_gift_ownership(
        &self,
        gift_id: Uuid,
        candidates: BTreeSet<Uuid>,
    ) -> Result<GiftOwnership, SyncError> {
        let request = self
            .request(Invocation::gift_query(gift_id))?
            .with_body(&GiftQuery { candidates })
            .map_err(SyncError::from)?;
        self.call_expecting(request).await
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
