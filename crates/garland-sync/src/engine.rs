//! The sync session driver.
//!
//! One session pulls a peer's changes into the local store in two strictly
//! ordered phases: recipients, then gifts. Gift records reference recipient
//! ids, so the recipient phase must fully settle before the first gift is
//! written; the ordering is enforced by sequential awaits, not by anything
//! on the wire.
//!
//! Within a phase the engine diffs the remote changelist against local
//! metadata, applies tombstones in place, and pulls stale or missing records
//! with a bounded fan-out. Every record commits in its own transaction, so a
//! failed pull costs exactly one record and an interrupted session is safe
//! to resume by running another one.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use garland_shared::constants::{DEFAULT_MAX_IN_FLIGHT, DEFAULT_TIMEOUT_TRIP};
use garland_shared::RecordKind;
use garland_store::{PhotoStore, StoreHandle};

use crate::client::SyncClient;
use crate::error::SyncError;
use crate::events::{SkipReason, SyncEvent};
use crate::reconcile::{classify, PullAction};

/// Tunables for a sync session. Passed in explicitly at construction; the
/// engine reads no ambient global state.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on concurrent record pulls per phase.
    pub max_in_flight: usize,
    /// Consecutive request timeouts after which the phase gives up on the
    /// peer entirely.
    pub timeout_trip: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            timeout_trip: DEFAULT_TIMEOUT_TRIP,
        }
    }
}

/// Changelist reconciliation and merge engine.
pub struct SyncEngine {
    client: Arc<SyncClient>,
    store: StoreHandle,
    photos: PhotoStore,
    events: mpsc::Sender<SyncEvent>,
    config: EngineConfig,
}

impl SyncEngine {
    pub fn new(
        client: Arc<SyncClient>,
        store: StoreHandle,
        photos: PhotoStore,
        events: mpsc::Sender<SyncEvent>,
        config: EngineConfig,
    ) -> Self {
        Self {
            client,
            store,
            photos,
            events,
            config,
        }
    }

    /// Run one full sync session against the connected peer.
    pub async fn run(&self) -> Result<(), SyncError> {
        info!("Starting sync session");

        match self.run_phases().await {
            Ok(()) => {
                info!("Sync session complete");
                self.emit(SyncEvent::Completed);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Sync session failed");
                self.emit(SyncEvent::Failed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_phases(&self) -> Result<(), SyncError> {
        // Recipients settle first; gift records link to them by id.
        self.sync_phase(RecordKind::Recipient).await?;
        self.sync_phase(RecordKind::Gift).await?;
        Ok(())
    }

    async fn sync_phase(&self, kind: RecordKind) -> Result<(), SyncError> {
        let remote = self.client.fetch_changelist(kind).await?;
        let local = match kind {
            RecordKind::Recipient => self.store.with(|db| db.recipient_sync_meta()).await?,
            RecordKind::Gift => self.store.with(|db| db.gift_sync_meta()).await?,
        };

        let mut to_fetch: Vec<Uuid> = Vec::new();
        let mut to_archive: Vec<(Uuid, DateTime<Utc>)> = Vec::new();
        let mut skipped: Vec<(Uuid, SkipReason)> = Vec::new();

        for (id, summary) in &remote {
            match classify(summary, local.get(id)) {
                PullAction::Fetch => to_fetch.push(*id),
                PullAction::ArchiveLocal => to_archive.push((*id, summary.last_updated)),
                PullAction::Skip(reason) => skipped.push((*id, reason)),
            }
        }

        let pending = to_fetch.len() + to_archive.len();
        info!(
            kind = %kind,
            listed = remote.len(),
            pending,
            "Phase started"
        );
        self.emit(SyncEvent::PhaseStarted { kind, pending });

        for (id, reason) in skipped {
            if reason == SkipReason::OriginMismatch {
                warn!(
                    kind = %kind,
                    id = %id,
                    "Remote id collides with a local record of different origin; not merging"
                );
            }
            self.emit(SyncEvent::RecordSkipped { kind, id, reason });
        }

        let remaining = AtomicUsize::new(pending);

        // Tombstones apply in place; no body transfer, no network round-trip.
        for (id, stamp) in to_archive {
            match self.apply_tombstone(kind, id, stamp).await {
                Ok(()) => self.record_done(kind, id, &remaining),
                Err(e) => {
                    warn!(kind = %kind, id = %id, error = %e, "Tombstone failed");
                    self.emit(SyncEvent::RecordFailed {
                        kind,
                        id,
                        message: e.to_string(),
                    });
                }
            }
        }

        // Bounded fan-out of full-record pulls. Results are collected in
        // completion order; nothing below depends on ordering.
        let consecutive_timeouts = AtomicU32::new(0);
        stream::iter(to_fetch)
            .map(|id| self.pull_record(kind, id, &remaining, &consecutive_timeouts))
            .buffer_unordered(self.config.max_in_flight.max(1))
            .collect::<Vec<()>>()
            .await;

        let timeouts = consecutive_timeouts.load(Ordering::SeqCst);
        if timeouts >= self.config.timeout_trip {
            return Err(SyncError::PeerUnresponsive(timeouts));
        }

        info!(kind = %kind, "Phase complete");
        self.emit(SyncEvent::PhaseCompleted { kind });
        Ok(())
    }

    async fn pull_record(
        &self,
        kind: RecordKind,
        id: Uuid,
        remaining: &AtomicUsize,
        consecutive_timeouts: &AtomicU32,
    ) {
        if consecutive_timeouts.load(Ordering::SeqCst) >= self.config.timeout_trip {
            // The peer has stopped answering; issuing more requests only
            // burns their timeouts.
            return;
        }

        match self.fetch_and_apply(kind, id).await {
            Ok(()) => {
                consecutive_timeouts.store(0, Ordering::SeqCst);
                self.record_done(kind, id, remaining);
            }
            Err(e) => {
                if matches!(e, SyncError::Timeout { .. }) {
                    consecutive_timeouts.fetch_add(1, Ordering::SeqCst);
                }
                warn!(kind = %kind, id = %id, error = %e, "Record pull failed");
                self.emit(SyncEvent::RecordFailed {
                    kind,
                    id,
                    message: e.to_string(),
                });
            }
        }
    }

    async fn fetch_and_apply(&self, kind: RecordKind, id: Uuid) -> Result<(), SyncError> {
        match kind {
            RecordKind::Recipient => {
                let record = self.client.fetch_recipient(id).await?;
                self.store
                    .with(move |db| db.merge_recipient(&record))
                    .await?;
                Ok(())
            }
            RecordKind::Gift => {
                let mut record = self.client.fetch_gift(id).await?;
                let photo = record.photo.take();
                let image_id = record.image_id;

                let written = self.store.with(move |db| db.merge_gift(&record)).await?;

                if written {
                    if let Some(bytes) = photo {
                        // The record is already committed; a failed blob
                        // write leaves a recoverable gap, not a broken sync.
                        if let Err(e) = self.photos.write(image_id, &bytes).await {
                            warn!(id = %image_id, error = %e, "Photo write failed, keeping record");
                        }
                    }
                }
                Ok(())
            }
        }
    }

    async fn apply_tombstone(
        &self,
        kind: RecordKind,
        id: Uuid,
        stamp: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        match kind {
            RecordKind::Gift => {
                self.store
                    .with(move |db| db.archive_gift_at(id, stamp))
                    .await?;
                self.photos.delete(id).await?;
                Ok(())
            }
            RecordKind::Recipient => {
                // Recipients carry no tombstone state; classify never emits
                // this, but a peer running something newer might.
                debug!(id = %id, "Ignoring tombstone for recipient");
                Ok(())
            }
        }
    }

    fn record_done(&self, kind: RecordKind, id: Uuid, remaining: &AtomicUsize) {
        let left = remaining.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        debug!(kind = %kind, id = %id, remaining = left, "Record synced");
        self.emit(SyncEvent::RecordSynced {
            kind,
            id,
            remaining: left,
        });
    }

    fn emit(&self, event: SyncEvent) {
        // Progress events are advisory; a slow or absent subscriber never
        // stalls the session.
        let _ = self.events.try_send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Router;
    use garland_net::SwarmCommand;
    use garland_shared::{Envelope, PeerRef};
    use garland_store::{Database, Gift, PhotoStore, Recipient};
    use libp2p::PeerId;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct TestPeer {
        store: StoreHandle,
        photos: PhotoStore,
        _photo_dir: TempDir,
    }

    async fn test_peer(seed: impl FnOnce(&mut Database)) -> TestPeer {
        let mut db = Database::open_in_memory().unwrap();
        seed(&mut db);
        let store = StoreHandle::spawn(db);

        let photo_dir = TempDir::new().unwrap();
        let photos = PhotoStore::new(photo_dir.path().to_path_buf())
            .await
            .unwrap();

        TestPeer {
            store,
            photos,
            _photo_dir: photo_dir,
        }
    }

    struct Harness {
        engine: SyncEngine,
        client: Arc<SyncClient>,
        events: mpsc::Receiver<SyncEvent>,
        /// Verbs the serving side was actually asked for.
        served: Arc<Mutex<Vec<String>>>,
    }

    /// Wire a client-side engine to a server-side router over in-memory
    /// loopback channels, standing in for the swarm.
    fn connect(puller: &TestPeer, server: &TestPeer, timeout: Duration) -> Harness {
        let client_pid = PeerId::random();
        let server_pid = PeerId::random();

        let (client_cmd_tx, mut client_cmd_rx) = mpsc::channel(64);
        let (server_cmd_tx, mut server_cmd_rx) = mpsc::channel(64);

        let client = Arc::new(SyncClient::with_timeout(
            PeerRef::new(client_pid.to_string(), "Puller"),
            client_cmd_tx,
            timeout,
        ));
        client.set_peer(PeerRef::new(server_pid.to_string(), "Server"));

        let router = Arc::new(Router::new(
            PeerRef::new(server_pid.to_string(), "Server"),
            server.store.clone(),
            server.photos.clone(),
            server_cmd_tx,
        ));

        let served = Arc::new(Mutex::new(Vec::new()));

        // Client -> server frames.
        {
            let router = router.clone();
            let served = served.clone();
            tokio::spawn(async move {
                while let Some(cmd) = client_cmd_rx.recv().await {
                    if let SwarmCommand::SendFrame { data, .. } = cmd {
                        if let Ok(Envelope::Request(request)) = Envelope::from_bytes(&data) {
                            served
                                .lock()
                                .unwrap()
                                .push(request.invocation.verb().to_string());
                            let router = router.clone();
                            tokio::spawn(async move {
                                router.handle_request(request, client_pid).await;
                            });
                        }
                    }
                }
            });
        }

        // Server -> client frames.
        {
            let client = client.clone();
            tokio::spawn(async move {
                while let Some(cmd) = server_cmd_rx.recv().await {
                    if let SwarmCommand::SendFrame { data, .. } = cmd {
                        if let Ok(envelope) = Envelope::from_bytes(&data) {
                            client.handle_reply(envelope);
                        }
                    }
                }
            });
        }

        let (event_tx, events) = mpsc::channel(256);
        let engine = SyncEngine::new(
            client.clone(),
            puller.store.clone(),
            puller.photos.clone(),
            event_tx,
            EngineConfig::default(),
        );

        Harness {
            engine,
            client,
            events,
            served,
        }
    }

    fn drain(events: &mut mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut collected = Vec::new();
        while let Ok(event) = events.try_recv() {
            collected.push(event);
        }
        collected
    }

    #[tokio::test]
    async fn new_recipient_propagates() {
        let alice = Recipient::new("Alice");
        let seed = alice.clone();
        let server = test_peer(move |db| db.insert_recipient(&seed).unwrap()).await;
        let puller = test_peer(|_| {}).await;

        let mut harness = connect(&puller, &server, Duration::from_secs(5));
        harness.engine.run().await.unwrap();

        let id = alice.id;
        let synced = puller
            .store
            .with(move |db| db.get_recipient(id))
            .await
            .unwrap();
        assert_eq!(synced.name, "Alice");
        assert_eq!(synced.origin_id, alice.origin_id);
        assert_eq!(synced.last_updated, alice.last_updated);

        let events = drain(&mut harness.events);
        assert!(events
            .iter()
            .any(|e| matches!(e, SyncEvent::Completed)));
    }

    #[tokio::test]
    async fn newer_remote_gift_wins() {
        let mut ours = Gift::new(Uuid::new_v4(), Some("Unknown".into()));
        ours.last_updated = Utc::now() - chrono::Duration::hours(1);

        let mut theirs = ours.clone();
        theirs.label = Some("Socks".into());
        theirs.last_updated = Utc::now();

        let seed_theirs = theirs.clone();
        let server = test_peer(move |db| db.insert_gift(&seed_theirs).unwrap()).await;
        let seed_ours = ours.clone();
        let puller = test_peer(move |db| db.insert_gift(&seed_ours).unwrap()).await;

        let mut harness = connect(&puller, &server, Duration::from_secs(5));
        harness.engine.run().await.unwrap();

        let id = ours.image_id;
        let merged = puller.store.with(move |db| db.get_gift(id)).await.unwrap();
        assert_eq!(merged.label.as_deref(), Some("Socks"));
        assert_eq!(merged.last_updated, theirs.last_updated);
    }

    #[tokio::test]
    async fn origin_collision_is_never_merged() {
        let mine = Recipient::new("Mine");
        let mut theirs = Recipient::new("Theirs");
        theirs.id = mine.id; // same id, different origin
        theirs.last_updated = mine.last_updated + chrono::Duration::hours(1);

        let seed_theirs = theirs.clone();
        let server = test_peer(move |db| db.insert_recipient(&seed_theirs).unwrap()).await;
        let seed_mine = mine.clone();
        let puller = test_peer(move |db| db.insert_recipient(&seed_mine).unwrap()).await;

        let mut harness = connect(&puller, &server, Duration::from_secs(5));
        harness.engine.run().await.unwrap();

        let id = mine.id;
        let kept = puller
            .store
            .with(move |db| db.get_recipient(id))
            .await
            .unwrap();
        assert_eq!(kept.name, "Mine");
        assert_eq!(kept.origin_id, mine.origin_id);

        let events = drain(&mut harness.events);
        assert!(events.iter().any(|e| matches!(
            e,
            SyncEvent::RecordSkipped {
                reason: SkipReason::OriginMismatch,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn tombstone_archives_without_fetching() {
        let mut ours = Gift::new(Uuid::new_v4(), Some("Train set".into()));
        ours.last_updated = Utc::now() - chrono::Duration::hours(1);

        let mut theirs = ours.clone();
        theirs.is_archived = true;
        theirs.last_updated = Utc::now();

        let seed_theirs = theirs.clone();
        let server = test_peer(move |db| db.insert_gift(&seed_theirs).unwrap()).await;
        let seed_ours = ours.clone();
        let puller = test_peer(move |db| db.insert_gift(&seed_ours).unwrap()).await;
        puller.photos.write(ours.image_id, b"jpeg").await.unwrap();

        let mut harness = connect(&puller, &server, Duration::from_secs(5));
        harness.engine.run().await.unwrap();

        let id = ours.image_id;
        let archived = puller.store.with(move |db| db.get_gift(id)).await.unwrap();
        assert!(archived.is_archived);
        assert_eq!(archived.last_updated, theirs.last_updated);
        assert!(!puller.photos.exists(ours.image_id).await);

        // Deletion propagated from the changelist alone; the body was never
        // requested.
        let served = harness.served.lock().unwrap();
        assert!(!served.iter().any(|verb| verb == "getGift"));
    }

    #[tokio::test]
    async fn second_run_pulls_nothing() {
        let alice = Recipient::new("Alice");
        let gift = Gift::new(Uuid::new_v4(), Some("Socks".into()));
        let (a, g) = (alice.clone(), gift.clone());
        let server = test_peer(move |db| {
            db.insert_recipient(&a).unwrap();
            db.insert_gift(&g).unwrap();
            db.set_gift_recipients(g.image_id, &BTreeSet::from([a.id]))
                .unwrap();
        })
        .await;
        let puller = test_peer(|_| {}).await;

        let mut harness = connect(&puller, &server, Duration::from_secs(5));
        harness.engine.run().await.unwrap();

        let first = drain(&mut harness.events);
        assert!(first
            .iter()
            .any(|e| matches!(e, SyncEvent::RecordSynced { .. })));

        harness.engine.run().await.unwrap();

        let second = drain(&mut harness.events);
        assert!(!second
            .iter()
            .any(|e| matches!(e, SyncEvent::RecordSynced { .. })));
        assert!(second
            .iter()
            .any(|e| matches!(e, SyncEvent::Completed)));

        // And the relationship survived the first merge.
        let gift_id = gift.image_id;
        let linked = puller
            .store
            .with(move |db| db.recipient_ids_of_gift(gift_id))
            .await
            .unwrap();
        assert_eq!(linked, BTreeSet::from([alice.id]));
    }

    #[tokio::test]
    async fn gift_photo_lands_in_blob_store() {
        let gift = Gift::new(Uuid::new_v4(), None);
        let seed = gift.clone();
        let server = test_peer(move |db| db.insert_gift(&seed).unwrap()).await;
        server.photos.write(gift.image_id, b"wrapped").await.unwrap();
        let puller = test_peer(|_| {}).await;

        let mut harness = connect(&puller, &server, Duration::from_secs(5));
        harness.engine.run().await.unwrap();

        assert_eq!(
            puller.photos.read(gift.image_id).await.unwrap(),
            b"wrapped"
        );
    }

    #[tokio::test]
    async fn ownership_query_end_to_end() {
        let alice = Recipient::new("Alice");
        let bob = Recipient::new("Bob");
        let gift = Gift::new(Uuid::new_v4(), Some("Sled".into()));
        let (a, b, g) = (alice.clone(), bob.clone(), gift.clone());
        let server = test_peer(move |db| {
            db.insert_recipient(&a).unwrap();
            db.insert_recipient(&b).unwrap();
            db.insert_gift(&g).unwrap();
            db.set_gift_recipients(g.image_id, &BTreeSet::from([a.id, b.id]))
                .unwrap();
        })
        .await;
        let puller = test_peer(|_| {}).await;

        let harness = connect(&puller, &server, Duration::from_secs(5));

        // A stranger's scan: no crossover, no names revealed.
        let stranger = harness
            .client
            .query_gift_ownership(gift.image_id, BTreeSet::from([Uuid::new_v4()]))
            .await
            .unwrap();
        assert!(stranger.matching.is_empty());
        assert!(stranger.recipients.is_none());

        // Bob's own scan matches and sees the full recipient list.
        let bobs = harness
            .client
            .query_gift_ownership(gift.image_id, BTreeSet::from([bob.id]))
            .await
            .unwrap();
        assert_eq!(bobs.matching, BTreeSet::from([bob.id]));
        assert_eq!(bobs.recipients.map(|r| r.len()), Some(2));
    }

    #[tokio::test]
    async fn unresponsive_peer_trips_the_phase() {
        // A server-side store the pump will never consult: requests for gift
        // bodies are dropped on the floor below.
        let mut gifts = Vec::new();
        for i in 0..4 {
            gifts.push(Gift::new(Uuid::new_v4(), Some(format!("Gift {i}"))));
        }
        let seed = gifts.clone();
        let server = test_peer(move |db| {
            for gift in &seed {
                db.insert_gift(gift).unwrap();
            }
        })
        .await;
        let puller = test_peer(|_| {}).await;

        let client_pid = PeerId::random();
        let server_pid = PeerId::random();

        let (client_cmd_tx, mut client_cmd_rx) = mpsc::channel(64);
        let (server_cmd_tx, mut server_cmd_rx) = mpsc::channel(64);

        let client = Arc::new(SyncClient::with_timeout(
            PeerRef::new(client_pid.to_string(), "Puller"),
            client_cmd_tx,
            Duration::from_millis(100),
        ));
        client.set_peer(PeerRef::new(server_pid.to_string(), "Server"));

        let router = Arc::new(Router::new(
            PeerRef::new(server_pid.to_string(), "Server"),
            server.store.clone(),
            server.photos.clone(),
            server_cmd_tx,
        ));

        // Answer changelists, drop record fetches.
        {
            let router = router.clone();
            tokio::spawn(async move {
                while let Some(cmd) = client_cmd_rx.recv().await {
                    if let SwarmCommand::SendFrame { data, .. } = cmd {
                        if let Ok(Envelope::Request(request)) = Envelope::from_bytes(&data) {
                            if request.invocation.verb().starts_with("list") {
                                let router = router.clone();
                                tokio::spawn(async move {
                                    router.handle_request(request, client_pid).await;
                                });
                            }
                        }
                    }
                }
            });
        }
        {
            let client = client.clone();
            tokio::spawn(async move {
                while let Some(cmd) = server_cmd_rx.recv().await {
                    if let SwarmCommand::SendFrame { data, .. } = cmd {
                        if let Ok(envelope) = Envelope::from_bytes(&data) {
                            client.handle_reply(envelope);
                        }
                    }
                }
            });
        }

        let (event_tx, mut events) = mpsc::channel(256);
        let engine = SyncEngine::new(
            client,
            puller.store.clone(),
            puller.photos.clone(),
            event_tx,
            EngineConfig {
                max_in_flight: 2,
                timeout_trip: 3,
            },
        );

        match engine.run().await {
            Err(SyncError::PeerUnresponsive(n)) => assert!(n >= 3),
            other => panic!("expected unresponsive trip, got {other:?}"),
        }

        let emitted = drain(&mut events);
        assert!(emitted
            .iter()
            .any(|e| matches!(e, SyncEvent::Failed { .. })));
    }
}
