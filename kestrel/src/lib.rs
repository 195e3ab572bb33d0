// Kestrel local actor runtime
//
// Implements the contracts from `kestrel-api` on top of tokio: one task per
// actor, a lock-free mailbox per actor, restart supervision, an event stream
// and request/response with deadlines.

pub mod config;
pub mod context;
pub mod dead_letter;
pub mod engine;
pub mod error;
pub mod event_stream;
pub mod logging;
pub mod mailbox;
pub mod process;
pub mod receiver;
pub mod registry;
pub mod repeat;
pub mod response;

// Re-export commonly used types
pub use config::{ActorConfig, EngineConfig, ProcessOptions};
pub use context::Context;
pub use dead_letter::{DeadLetterFetch, DeadLetters, DEAD_LETTER_ID};
pub use engine::Engine;
pub use error::{EngineError, MailboxError, RequestError};
pub use event_stream::{EventStream, SubscriptionId};
pub use process::Termination;
pub use receiver::{producer, FnReceiver, Middleware, Next, Producer, Receiver};
pub use registry::Registry;
pub use repeat::SendRepeater;
pub use response::Response;

pub use kestrel_api;
