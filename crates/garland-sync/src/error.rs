use thiserror::Error;
use uuid::Uuid;

use garland_shared::ProtocolError;
use garland_store::StoreError;

/// Errors produced by the sync core.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No counterpart peer is set; distinct from a timeout.
    #[error("Not connected to a peer")]
    NotConnected,

    /// The request was sent but no reply arrived in time.
    #[error("Request {request_id} timed out")]
    Timeout { request_id: Uuid },

    /// The peer answered with an error frame.
    #[error("Peer reported failure: {0}")]
    Remote(String),

    /// A request named an invocation this node does not serve.
    #[error("Unsupported invocation: {0}")]
    UnsupportedInvocation(String),

    /// Too many requests in a row expired; the peer is treated as gone.
    #[error("Peer unresponsive after {0} consecutive timeouts")]
    PeerUnresponsive(u32),

    /// The frame could not be handed to the transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Envelope or body codec failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Record store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}
