//! # Actor Error Types
//!
//! Errors raised by actor code. A receiver or middleware returns
//! [`ActorError`] when it cannot process a message; the runtime treats any
//! such error exactly like a panic: the failure is caught at the process
//! boundary and turned into a restart or a permanent stop.
//!
//! ## Usage Example
//!
//! ```rust
//! use kestrel_api::errors::ActorError;
//!
//! fn describe(error: &ActorError) -> &'static str {
//!     match error {
//!         ActorError::InitializationError(_) => "init",
//!         ActorError::Timeout => "timeout",
//!         _ => "other",
//!     }
//! }
//!
//! assert_eq!(describe(&ActorError::Timeout), "timeout");
//! ```

use thiserror::Error;

/// Core error type for actor code.
///
/// Returned from `Receiver::receive` and `Middleware::handle`. The runtime
/// never propagates these to other actors; they only drive supervision.
#[derive(Error, Debug)]
pub enum ActorError {
    /// Error during actor initialization.
    ///
    /// Typically returned while handling the `Initialized` or `Started`
    /// lifecycle messages when a required resource cannot be acquired.
    #[error("Actor initialization failed: {0}")]
    InitializationError(String),

    /// Error during message processing.
    #[error("Message handling failed: {0}")]
    MessageHandlingError(String),

    /// Actor has been stopped.
    #[error("Actor stopped")]
    Stopped,

    /// Operation timeout.
    #[error("Timeout")]
    Timeout,

    /// A panic caught at the process boundary, carrying the panic message.
    #[error("Actor panicked: {0}")]
    Panic(String),

    /// Catch-all for other errors.
    ///
    /// Preserves the original error through source chaining.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ActorError {
    /// Shorthand for [`ActorError::MessageHandlingError`].
    pub fn handling(reason: impl Into<String>) -> Self {
        Self::MessageHandlingError(reason.into())
    }
}
