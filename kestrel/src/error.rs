use std::time::Duration;

use kestrel_api::errors::ActorError;
use kestrel_api::message::Envelope;
use kestrel_api::pid::Pid;
use thiserror::Error;

/// Errors related to Mailbox operations.
#[derive(Error, Debug)]
pub enum MailboxError {
    /// The consumer closed the mailbox. The rejected envelope is handed back
    /// so it can be diverted instead of dropped.
    #[error("Mailbox is closed")]
    Closed(Envelope),
    /// Every slot holds unread data. Only returned by non-waiting pushes.
    #[error("Mailbox is full")]
    Full(Envelope),
}

impl MailboxError {
    /// Recovers the envelope that could not be enqueued.
    pub fn into_envelope(self) -> Envelope {
        match self {
            MailboxError::Closed(envelope) | MailboxError::Full(envelope) => envelope,
        }
    }
}

/// Errors returned directly to callers of the engine facade.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No remote sender attached, cannot deliver to {0}")]
    RemoteMissing(Pid),
    #[error("Remote sender failed to start: {0}")]
    RemoteStart(#[source] anyhow::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Errors related to the Ask pattern.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Reply has an unexpected type: {0}")]
    UnexpectedReply(String),
    #[error("Failed to send request: {0}")]
    Send(#[from] EngineError),
}

impl From<EngineError> for ActorError {
    fn from(error: EngineError) -> Self {
        ActorError::Other(anyhow::Error::new(error))
    }
}

impl From<RequestError> for ActorError {
    fn from(error: RequestError) -> Self {
        match error {
            RequestError::Timeout(_) => ActorError::Timeout,
            other => ActorError::Other(anyhow::Error::new(other)),
        }
    }
}
