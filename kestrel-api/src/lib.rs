//! # Kestrel Actor Runtime API
//!
//! Kestrel is an in-process actor execution kernel. This crate holds the
//! runtime-independent contracts shared by the local runtime (`kestrel`) and
//! by any transport that carries messages between engines.
//!
//! ## Core Components
//!
//! - **PID**: Immutable `address/id` value naming exactly one actor
//! - **Messages**: Type-erased, downcastable payloads and their envelopes
//! - **Events**: Lifecycle messages and the runtime notifications published
//!   on the event stream
//! - **Errors**: Failure taxonomy returned by actor code
//! - **Remote sender**: The narrow capability a transport implements so an
//!   engine can hand off messages addressed to foreign engines
//!
//! ## Usage Example
//!
//! ```rust
//! use std::sync::Arc;
//! use kestrel_api::{Envelope, Message, Payload, Pid};
//!
//! #[derive(Debug)]
//! struct Ping;
//!
//! let target = Pid::new("local", "pinger/1");
//! let envelope = Envelope::new(Ping, Some(target.clone()));
//! assert!(envelope.message.is::<Ping>());
//!
//! let payload: Payload = Arc::new(Ping);
//! assert!(payload.downcast_ref::<Ping>().is_some());
//! assert_eq!(target.to_string(), "local/pinger/1");
//! ```
//!
//! ## Module Organization
//!
//! - [`pid`]: Actor addressing
//! - [`message`]: Message trait, payloads and envelopes
//! - [`events`]: Lifecycle messages and runtime events
//! - [`errors`]: Error types
//! - [`remote`]: Transport collaborator contract
//! - [`types`]: Common type aliases

pub mod errors;
pub mod events;
pub mod message;
pub mod pid;
pub mod remote;
pub mod types;

pub use errors::ActorError;
pub use events::*;
pub use message::{Envelope, Message, Payload};
pub use pid::{Pid, PID_SEPARATOR};
pub use remote::RemoteSender;
pub use types::{ActorResult, BoxedFuture};
