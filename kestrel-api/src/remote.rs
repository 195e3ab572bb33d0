//! # Remote Sender
//!
//! The only surface an engine shares with a transport. Serialization,
//! dialing and stream multiplexing all live behind this trait.

use crate::message::Payload;
use crate::pid::Pid;

/// Transport capability used for every pid whose address differs from the
/// engine's own.
pub trait RemoteSender: Send + Sync + 'static {
    /// Address this transport listens on. Becomes the engine's address.
    fn address(&self) -> &str;

    /// Hands a message to the transport. Fire-and-forget, like a local send.
    fn send(&self, target: &Pid, message: Payload, sender: Option<&Pid>);

    /// Called exactly once, while the engine is being constructed.
    fn start(&self) -> anyhow::Result<()>;
}
