//! # Actor Messages
//!
//! Messages form an open set: any `Send + Sync + Debug + 'static` value is a
//! [`Message`]. Payloads travel as [`Payload`] (`Arc<dyn Message>`), so the
//! same value can be fanned out to many subscribers or recorded as a dead
//! letter without copying. Receivers recover the concrete type by downcasting;
//! types a receiver does not recognise are simply ignored.
//!
//! ## Usage Example
//!
//! ```rust
//! use std::sync::Arc;
//! use kestrel_api::message::{Message, Payload};
//!
//! #[derive(Debug)]
//! struct Deposit {
//!     amount: u64,
//! }
//!
//! let payload: Payload = Arc::new(Deposit { amount: 10 });
//! match payload.downcast_ref::<Deposit>() {
//!     Some(deposit) => assert_eq!(deposit.amount, 10),
//!     None => unreachable!(),
//! }
//! ```

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use downcast_rs::{impl_downcast, DowncastSync};

use crate::pid::Pid;

/// Marker trait for everything that can be sent to an actor.
///
/// Implemented automatically for every `Any + Send + Sync + Debug` type.
/// `Debug` is required so dead letters and runtime diagnostics can always
/// render the payload.
pub trait Message: DowncastSync + Debug {}

impl<T: Any + Send + Sync + Debug> Message for T {}

impl_downcast!(sync Message);

/// Type-erased, shareable message.
pub type Payload = Arc<dyn Message>;

/// One message plus the pid of its sender, as enqueued in a mailbox.
#[derive(Clone, Debug)]
pub struct Envelope {
    /// Message content
    pub message: Payload,

    /// Pid replies should be addressed to, if any
    pub sender: Option<Pid>,
}

impl Envelope {
    /// Wraps a concrete message.
    pub fn new<M: Message>(message: M, sender: Option<Pid>) -> Self {
        Self {
            message: Arc::new(message),
            sender,
        }
    }

    /// Wraps an already shared payload without re-boxing it.
    pub fn from_payload(message: Payload, sender: Option<Pid>) -> Self {
        Self { message, sender }
    }

    /// Attempts to view the message as `M`.
    pub fn message_as<M: Message>(&self) -> Option<&M> {
        self.message.downcast_ref::<M>()
    }
}
