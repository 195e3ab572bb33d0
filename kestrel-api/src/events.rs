//! # Lifecycle Messages and Runtime Events
//!
//! Two families live here:
//!
//! - **Lifecycle messages** ([`Initialized`], [`Started`], [`Stopped`]) are
//!   delivered to an actor's own receiver as ordinary messages.
//! - **Runtime events** (`*Event`) are published on the engine's event stream
//!   whenever a process changes state or a message cannot be delivered.
//!   Subscribed actors receive them in their mailbox like any other message.

use std::backtrace::Backtrace;
use std::sync::Arc;
use std::time::SystemTime;

use crate::message::Payload;
use crate::pid::Pid;

/// First message a freshly built receiver observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Initialized;

/// Delivered right after [`Initialized`], before any user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Started;

/// Last message a receiver instance observes, on graceful stop, on
/// termination and before it is replaced by a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stopped;

/// A receiver instance finished handling [`Initialized`].
#[derive(Debug, Clone)]
pub struct ActorInitializedEvent {
    pub pid: Pid,
    pub timestamp: SystemTime,
}

/// A receiver instance finished handling [`Started`] and is about to drain
/// its mailbox.
#[derive(Debug, Clone)]
pub struct ActorStartedEvent {
    pub pid: Pid,
    pub timestamp: SystemTime,
}

/// A process completed its teardown and left the registry.
#[derive(Debug, Clone)]
pub struct ActorStoppedEvent {
    pub pid: Pid,
    pub timestamp: SystemTime,
}

/// A process caught a failure and is rebuilding its receiver.
#[derive(Debug, Clone)]
pub struct ActorRestartedEvent {
    pub pid: Pid,
    pub timestamp: SystemTime,
    /// Rendered error or panic message
    pub reason: String,
    /// Stack captured at the catch boundary (honours `RUST_BACKTRACE`)
    pub backtrace: Arc<Backtrace>,
    /// Restarts performed so far, including this one
    pub restarts: u32,
}

/// A process exhausted its restart budget and stopped permanently.
#[derive(Debug, Clone)]
pub struct ActorMaxRestartsExceededEvent {
    pub pid: Pid,
    pub timestamp: SystemTime,
}

/// A spawn targeted a pid that is already registered. The existing
/// registration is kept.
#[derive(Debug, Clone)]
pub struct ActorDuplicateIdEvent {
    pub pid: Pid,
    pub timestamp: SystemTime,
}

/// A message that could not be delivered to any registered process.
#[derive(Debug, Clone)]
pub struct DeadLetterEvent {
    pub target: Pid,
    pub message: Payload,
    pub sender: Option<Pid>,
}

/// A message addressed to a foreign engine while no remote sender is
/// attached.
#[derive(Debug, Clone)]
pub struct EngineRemoteMissingEvent {
    pub target: Pid,
    pub sender: Option<Pid>,
    pub message: Payload,
}
