//! Request/response envelope codec.
//!
//! Every frame on the wire is one [`Envelope`], bincode-encoded. The enum tag
//! is the explicit kind discriminator: a receiver decodes once and knows
//! whether it holds a request, a response, or an error, even though both
//! directions share a single channel.
//!
//! Request bodies and response bodies are opaque byte payloads; the
//! invocation name tells the receiving side which type to decode them as.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::error::ProtocolError;
use crate::types::PeerRef;

/// Names a remote operation. Slash-delimited: `verb` or `verb/argument`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Invocation(String);

/// Invocation verbs, shared by the constructors below and the router's
/// dispatch table.
pub const VERB_LIST_RECIPIENT_IDS: &str = "listRecipientIDs";
pub const VERB_LIST_RECIPIENTS: &str = "listRecipients";
pub const VERB_LIST_GIFT_IDS: &str = "listGiftIDs";
pub const VERB_GET_RECIPIENT: &str = "getRecipient";
pub const VERB_GET_GIFT: &str = "getGift";
pub const VERB_GIFT_QUERY: &str = "giftQuery";

impl Invocation {
    /// Build an invocation from its raw wire string. Prefer the named
    /// constructors below; this exists for forward compatibility with verbs
    /// this build does not know.
    pub fn raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn list_recipient_ids() -> Self {
        Self(VERB_LIST_RECIPIENT_IDS.to_string())
    }

    pub fn list_recipients() -> Self {
        Self(VERB_LIST_RECIPIENTS.to_string())
    }

    pub fn list_gift_ids() -> Self {
        Self(VERB_LIST_GIFT_IDS.to_string())
    }

    pub fn get_recipient(id: Uuid) -> Self {
        Self(format!("{VERB_GET_RECIPIENT}/{id}"))
    }

    pub fn get_gift(id: Uuid) -> Self {
        Self(format!("{VERB_GET_GIFT}/{id}"))
    }

    pub fn gift_query(id: Uuid) -> Self {
        Self(format!("{VERB_GIFT_QUERY}/{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First slash-delimited component; dispatch key on the serving side.
    pub fn verb(&self) -> &str {
        self.0.split('/').next().unwrap_or("")
    }

    /// Everything after the first slash, if present.
    pub fn argument(&self) -> Option<&str> {
        self.0.splitn(2, '/').nth(1)
    }

    /// Parse the argument component as a record id.
    pub fn record_id(&self) -> Result<Uuid, ProtocolError> {
        let arg = self
            .argument()
            .ok_or_else(|| ProtocolError::MissingArgument(self.0.clone()))?;
        Ok(Uuid::parse_str(arg)?)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An outbound call addressed to a serving peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// The peer expected to answer.
    pub server: PeerRef,
    /// Filled in by the sender just before transmission so the server knows
    /// where to address the response.
    pub client: Option<PeerRef>,
    /// Fresh per call; responses and error frames echo it.
    pub request_id: Uuid,
    pub invocation: Invocation,
    pub headers: HashMap<String, String>,
    /// How long the caller will wait before giving up on this request.
    pub timeout: Duration,
    /// Optional bincode payload, typed by the invocation.
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(server: PeerRef, invocation: Invocation) -> Self {
        Self {
            server,
            client: None,
            request_id: Uuid::new_v4(),
            invocation,
            headers: HashMap::new(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            body: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_body<T: Serialize>(mut self, body: &T) -> Result<Self, ProtocolError> {
        self.body = Some(bincode::serialize(body).map_err(ProtocolError::Encode)?);
        Ok(self)
    }

    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let bytes = self.body.as_deref().ok_or(ProtocolError::MissingBody)?;
        bincode::deserialize(bytes).map_err(ProtocolError::Decode)
    }
}

/// A successful answer to a [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: Uuid,
    pub invocation: Invocation,
    pub headers: HashMap<String, String>,
    /// bincode payload; the caller decodes it using the type it expects for
    /// the invocation it sent.
    pub body: Vec<u8>,
}

impl Response {
    /// Build a response echoing the given request's id and invocation.
    pub fn to_request<T: Serialize>(request: &Request, body: &T) -> Result<Self, ProtocolError> {
        Ok(Self {
            request_id: request.request_id,
            invocation: request.invocation.clone(),
            headers: HashMap::new(),
            body: bincode::serialize(body).map_err(ProtocolError::Encode)?,
        })
    }

    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        bincode::deserialize(&self.body).map_err(ProtocolError::Decode)
    }
}

/// Sent by the serving side in place of a [`Response`] when a handler fails.
/// Carries the request id so the caller can fail the exact pending call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub request_id: Uuid,
    pub invocation: Invocation,
    pub message: String,
}

impl ErrorFrame {
    pub fn to_request(request: &Request, message: impl Into<String>) -> Self {
        Self {
            request_id: request.request_id,
            invocation: request.invocation.clone(),
            message: message.into(),
        }
    }
}

/// Every frame on the wire is exactly one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Envelope {
    Request(Request),
    Response(Response),
    Error(ErrorFrame),
}

impl Envelope {
    /// Serialize to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(ProtocolError::Encode)
    }

    /// Deserialize from binary
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        bincode::deserialize(data).map_err(ProtocolError::Decode)
    }
}
