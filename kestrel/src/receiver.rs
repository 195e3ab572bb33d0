//! # Receivers and Middleware
//!
//! A [`Receiver`] is the behaviour of one actor instance. The runtime calls
//! [`Receiver::receive`] once per message, strictly one call at a time, with
//! the current message available on the [`Context`]. Lifecycle messages
//! ([`Initialized`](kestrel_api::Initialized), [`Started`](kestrel_api::Started),
//! [`Stopped`](kestrel_api::Stopped)) arrive through the same method.
//!
//! Receivers are never constructed by the runtime directly. A [`Producer`]
//! builds a fresh instance at spawn time and again after every restart, so
//! state held in the receiver does not survive a failure.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use kestrel::{Context, Receiver};
//! use kestrel_api::ActorResult;
//!
//! #[derive(Debug)]
//! struct Add(u64);
//!
//! #[derive(Default)]
//! struct Counter {
//!     total: u64,
//! }
//!
//! #[async_trait]
//! impl Receiver for Counter {
//!     async fn receive(&mut self, ctx: &mut Context) -> ActorResult<()> {
//!         if let Some(Add(n)) = ctx.message_as::<Add>() {
//!             self.total += n;
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use kestrel_api::types::{ActorResult, BoxedFuture};

use crate::context::Context;

/// Behaviour of a single actor instance.
///
/// Message types a receiver does not recognise should be ignored, not
/// treated as errors: every actor observes lifecycle messages and may be
/// subscribed to events it has no interest in.
#[async_trait]
pub trait Receiver: Send + 'static {
    /// Handles the message currently held by `ctx`.
    ///
    /// Returning an error, like panicking, hands the failure to the
    /// process's restart policy.
    async fn receive(&mut self, ctx: &mut Context) -> ActorResult<()>;
}

/// Factory invoked at spawn and on every restart.
pub type Producer = Arc<dyn Fn() -> Box<dyn Receiver> + Send + Sync>;

/// Wraps a plain constructor into a [`Producer`].
pub fn producer<F, R>(factory: F) -> Producer
where
    F: Fn() -> R + Send + Sync + 'static,
    R: Receiver,
{
    Arc::new(move || Box::new(factory()) as Box<dyn Receiver>)
}

/// Receiver backed by a synchronous closure.
///
/// Every restart starts from a clone of the closure as it was originally
/// captured.
#[derive(Clone)]
pub struct FnReceiver<F> {
    handler: F,
}

impl<F> FnReceiver<F>
where
    F: FnMut(&mut Context) -> ActorResult<()> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> Receiver for FnReceiver<F>
where
    F: FnMut(&mut Context) -> ActorResult<()> + Send + 'static,
{
    async fn receive(&mut self, ctx: &mut Context) -> ActorResult<()> {
        (self.handler)(ctx)
    }
}

impl<F> fmt::Debug for FnReceiver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnReceiver")
    }
}

/// Cross-cutting behaviour wrapped around every receive call.
///
/// A middleware decides whether, and when, the rest of the chain runs by
/// calling [`Next::run`]. Skipping the call swallows the message.
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use kestrel::{Context, Middleware, Next};
/// use kestrel_api::ActorResult;
///
/// struct Trace;
///
/// #[async_trait]
/// impl Middleware for Trace {
///     async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> ActorResult<()> {
///         tracing::trace!(pid = %ctx.pid(), message = ?ctx.message(), "receive");
///         next.run(ctx).await
///     }
/// }
/// ```
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> ActorResult<()>;
}

/// Remainder of a middleware chain, ending in the receiver.
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    receiver: &'a mut dyn Receiver,
}

impl<'a> Next<'a> {
    pub(crate) fn new(middleware: &'a [Arc<dyn Middleware>], receiver: &'a mut dyn Receiver) -> Self {
        Self { middleware, receiver }
    }

    /// Runs the next middleware, or the receiver once the chain is exhausted.
    pub fn run<'b>(self, ctx: &'b mut Context) -> BoxedFuture<'b, ActorResult<()>>
    where
        'a: 'b,
    {
        let Next { middleware, receiver } = self;
        match middleware.split_first() {
            Some((head, rest)) => head.handle(
                ctx,
                Next {
                    middleware: rest,
                    receiver,
                },
            ),
            None => receiver.receive(ctx),
        }
    }

    /// Middleware still to run before the receiver.
    pub fn remaining(&self) -> usize {
        self.middleware.len()
    }
}
