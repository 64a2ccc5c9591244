//! Inbound RPC: decode, dispatch, answer.
//!
//! The router owns the serving side of a sync exchange. Handlers read from
//! the record store and photo store only; they never mutate. Handler
//! failures are caught at the dispatch boundary and become error frames, so
//! one bad request never takes down the message loop or the connection.

use libp2p::PeerId;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use garland_net::SwarmCommand;
use garland_shared::protocol::{
    VERB_GET_GIFT, VERB_GET_RECIPIENT, VERB_GIFT_QUERY, VERB_LIST_GIFT_IDS,
    VERB_LIST_RECIPIENTS, VERB_LIST_RECIPIENT_IDS,
};
use garland_shared::records::{GiftOwnership, GiftQuery, RecipientRecord};
use garland_shared::{Envelope, ErrorFrame, PeerRef, Request, Response};
use garland_store::{PhotoStore, StoreHandle};

use crate::error::SyncError;

/// Shown to a device whose scanned candidates matched the gift.
const OWNERSHIP_MATCH_MESSAGE: &str = "This gift is for you.";
/// Shown to a non-match. Deliberately reveals nothing about the real
/// recipients.
const OWNERSHIP_MISMATCH_MESSAGE: &str = "This gift is not for any of you. Wrap it back up!";

/// Server half of the RPC layer.
pub struct Router {
    local: PeerRef,
    store: StoreHandle,
    photos: PhotoStore,
    commands: mpsc::Sender<SwarmCommand>,
}

impl Router {
    pub fn new(
        local: PeerRef,
        store: StoreHandle,
        photos: PhotoStore,
        commands: mpsc::Sender<SwarmCommand>,
    ) -> Self {
        Self {
            local,
            store,
            photos,
            commands,
        }
    }

    /// Serve one decoded request and send the reply back to its sender.
    ///
    /// `from` is the transport-level sender, used as the reply address when
    /// the request did not embed a client identity.
    pub async fn handle_request(&self, request: Request, from: PeerId) {
        debug!(
            server = %self.local,
            peer = %from,
            invocation = %request.invocation,
            request_id = %request.request_id,
            "Processing incoming request"
        );

        let envelope = match self.dispatch(&request).await {
            Ok(response) => Envelope::Response(response),
            Err(e) => {
                warn!(
                    invocation = %request.invocation,
                    request_id = %request.request_id,
                    error = %e,
                    "Handler failed, answering with error frame"
                );
                Envelope::Error(ErrorFrame::to_request(&request, e.to_string()))
            }
        };

        let reply_to = request
            .client
            .as_ref()
            .and_then(|client| client.id.parse::<PeerId>().ok())
            .unwrap_or(from);

        if let Err(e) = self.send(envelope, reply_to).await {
            warn!(peer = %reply_to, error = %e, "Failed to send reply");
        }
    }

    async fn send(&self, envelope: Envelope, to: PeerId) -> Result<(), SyncError> {
        let data = envelope.to_bytes()?;
        self.commands
            .send(SwarmCommand::SendFrame { peer: to, data })
            .await
            .map_err(|e| SyncError::Transport(format!("swarm command channel closed: {e}")))
    }

    async fn dispatch(&self, request: &Request) -> Result<Response, SyncError> {
        match request.invocation.verb() {
            VERB_LIST_RECIPIENT_IDS => {
                let changelist = self.store.with(|db| db.recipient_changelist()).await?;
                Ok(Response::to_request(request, &changelist)?)
            }
            VERB_LIST_RECIPIENTS => {
                let roster = self.store.with(|db| db.recipient_records()).await?;
                Ok(Response::to_request(request, &roster)?)
            }
            VERB_LIST_GIFT_IDS => {
                let changelist = self.store.with(|db| db.gift_changelist()).await?;
                Ok(Response::to_request(request, &changelist)?)
            }
            VERB_GET_RECIPIENT => {
                let id = request.invocation.record_id()?;
                let record = self.store.with(move |db| db.recipient_record(id)).await?;
                Ok(Response::to_request(request, &record)?)
            }
            VERB_GET_GIFT => {
                let id = request.invocation.record_id()?;
                let mut record = self.store.with(move |db| db.gift_record(id)).await?;
                // A gift whose photo never made it to disk is still worth
                // sending; the record and the blob are independent.
                record.photo = self.photos.try_read(id).await;
                Ok(Response::to_request(request, &record)?)
            }
            VERB_GIFT_QUERY => {
                let ownership = self.gift_ownership(request).await?;
                Ok(Response::to_request(request, &ownership)?)
            }
            other => {
                // Answer unknown invocations explicitly so the caller fails
                // fast instead of waiting out its timeout.
                Err(SyncError::UnsupportedInvocation(other.to_string()))
            }
        }
    }

    /// `giftQuery/{id}`: does the scanned gift belong to any of the claimed
    /// recipients?
    ///
    /// The privacy contract lives here, not in any UI: when the crossover is
    /// empty the true recipient list is withheld and only a generic message
    /// is returned.
    async fn gift_ownership(&self, request: &Request) -> Result<GiftOwnership, SyncError> {
        let gift_id = request.invocation.record_id()?;
        let query: GiftQuery = request.decode_body()?;

        let true_recipients: Vec<RecipientRecord> = self
            .store
            .with(move |db| {
                // Confirm the gift exists before answering anything about it.
                db.get_gift(gift_id)?;
                let recipients = db.recipients_of_gift(gift_id)?;
                recipients
                    .into_iter()
                    .map(|r| db.recipient_record(r.id))
                    .collect()
            })
            .await?;

        let true_ids: std::collections::BTreeSet<Uuid> =
            true_recipients.iter().map(|r| r.id).collect();
        let matching: std::collections::BTreeSet<Uuid> = query
            .candidates
            .intersection(&true_ids)
            .copied()
            .collect();

        debug!(
            gift = %gift_id,
            candidates = query.candidates.len(),
            matches = matching.len(),
            "Gift ownership query"
        );

        if matching.is_empty() {
            Ok(GiftOwnership {
                matching,
                recipients: None,
                message: Some(OWNERSHIP_MISMATCH_MESSAGE.to_string()),
            })
        } else {
            Ok(GiftOwnership {
                matching,
                recipients: Some(true_recipients),
                message: Some(OWNERSHIP_MATCH_MESSAGE.to_string()),
            })
        }
    }
}
