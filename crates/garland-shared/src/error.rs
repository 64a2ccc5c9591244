use thiserror::Error;

/// Errors produced while encoding or decoding wire envelopes and payloads.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Failed to serialize an envelope or body.
    #[error("Encode error: {0}")]
    Encode(bincode::Error),

    /// Incoming bytes were not a valid envelope or body.
    #[error("Decode error: {0}")]
    Decode(bincode::Error),

    /// An invocation needed an argument component that was absent.
    #[error("Invocation '{0}' is missing an argument")]
    MissingArgument(String),

    /// A request handler needed a body but the request carried none.
    #[error("Request body missing")]
    MissingBody,

    /// UUID parsing error (invocation arguments carry record ids).
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),
}
