//! # Process and Supervision
//!
//! A process owns one actor's mailbox consumer, its current receiver
//! instance and its restart policy. It runs as a single tokio task, so the
//! receiver is only ever invoked by one caller at a time.
//!
//! ## Lifecycle
//! ```text
//! Initializing -> Running -> (Restarting -> Running)* -> Stopped
//! ```
//! - **Initializing**: the producer builds a receiver, which then observes
//!   `Initialized` and `Started` before any mailbox traffic.
//! - **Running**: the mailbox is drained batch by batch, one receive call per
//!   envelope.
//! - **Restarting**: a failure (error or panic) is caught once per receive
//!   call. The failed instance observes `Stopped`, then a fresh one is built
//!   after the restart delay. The restart budget is counted over the whole
//!   lifetime of the process.
//! - **Stopped**: children are poisoned and awaited, the receiver observes
//!   `Stopped`, the mailbox is closed and what is left in it is
//!   dead-lettered.

use std::backtrace::Backtrace;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use kestrel_api::events::{
    ActorInitializedEvent, ActorMaxRestartsExceededEvent, ActorRestartedEvent,
    ActorStartedEvent, ActorStoppedEvent, Initialized, Started, Stopped,
};
use kestrel_api::message::{Envelope, Payload};
use kestrel_api::pid::Pid;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::config::ProcessOptions;
use crate::context::Context;
use crate::engine::Engine;
use crate::error::MailboxError;
use crate::event_stream::panic_message;
use crate::log_lifecycle;
use crate::mailbox::{Mailbox, MailboxConsumer};
use crate::receiver::{Next, Producer, Receiver};

/// Anything the registry can route envelopes to.
#[async_trait]
pub(crate) trait Processer: Send + Sync {
    fn pid(&self) -> &Pid;

    /// Enqueues `envelope`, waiting for space while the mailbox is full.
    async fn send(&self, envelope: Envelope) -> Result<(), MailboxError>;

    fn termination(&self) -> Termination;

    /// Requests termination before the next message, skipping whatever is
    /// still queued.
    fn halt(&self) {}
}

/// Sentinel that makes a process stop once everything enqueued before it has
/// been handled.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoisonPill;

/// Resolves once a process has completed its teardown.
#[derive(Clone)]
pub struct Termination {
    done: Option<watch::Receiver<bool>>,
}

impl Termination {
    pub(crate) fn new(done: watch::Receiver<bool>) -> Self {
        Self { done: Some(done) }
    }

    /// A handle that is already resolved, used for pids with no live process.
    pub fn completed() -> Self {
        Self { done: None }
    }

    /// Waits until the process has left the registry and published
    /// `ActorStoppedEvent`.
    pub async fn done(&self) {
        if let Some(done) = &self.done {
            let mut done = done.clone();
            // A dropped sender means the task is gone; nothing left to wait on.
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.as_ref().map_or(true, |done| *done.borrow())
    }
}

impl fmt::Debug for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Termination")
            .field("done", &self.is_done())
            .finish()
    }
}

/// Registry entry for a spawned actor.
pub(crate) struct ProcessHandle {
    pid: Pid,
    mailbox: Mailbox,
    halted: Arc<AtomicBool>,
    done: watch::Receiver<bool>,
}

#[async_trait]
impl Processer for ProcessHandle {
    fn pid(&self) -> &Pid {
        &self.pid
    }

    async fn send(&self, envelope: Envelope) -> Result<(), MailboxError> {
        self.mailbox.push(envelope).await
    }

    fn termination(&self) -> Termination {
        Termination::new(self.done.clone())
    }

    fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }
}

/// Non-owning link from a child process back to its parent's children set.
pub(crate) struct ParentLink {
    pub(crate) pid: Pid,
    pub(crate) children: Weak<DashMap<String, Pid>>,
}

struct Failure {
    reason: String,
    backtrace: Backtrace,
}

impl Failure {
    fn new(reason: String) -> Self {
        Self {
            reason,
            backtrace: Backtrace::capture(),
        }
    }
}

pub(crate) struct Process {
    pid: Pid,
    engine: Engine,
    producer: Producer,
    options: ProcessOptions,
    consumer: MailboxConsumer,
    context: Context,
    receiver: Option<Box<dyn Receiver>>,
    stopped_delivered: bool,
    restarts: u32,
    halted: Arc<AtomicBool>,
    done: watch::Sender<bool>,
    parent: Option<ParentLink>,
}

impl Process {
    /// Builds a process and the handle the registry routes to. Nothing runs
    /// until [`Process::run`] is spawned.
    pub(crate) fn new(
        pid: Pid,
        engine: Engine,
        producer: Producer,
        options: ProcessOptions,
        parent: Option<ParentLink>,
    ) -> (Self, Arc<ProcessHandle>) {
        let (mailbox, consumer) = crate::mailbox::channel(options.mailbox_capacity);
        let (done_tx, done_rx) = watch::channel(false);
        let halted = Arc::new(AtomicBool::new(false));

        let handle = Arc::new(ProcessHandle {
            pid: pid.clone(),
            mailbox,
            halted: halted.clone(),
            done: done_rx,
        });

        let context = Context::new(
            pid.clone(),
            engine.clone(),
            parent.as_ref().map(|link| link.pid.clone()),
        );

        let process = Self {
            pid,
            engine,
            producer,
            options,
            consumer,
            context,
            receiver: None,
            stopped_delivered: false,
            restarts: 0,
            halted,
            done: done_tx,
            parent,
        };
        (process, handle)
    }

    /// Drives the process until it stops.
    pub(crate) async fn run(mut self) {
        log_lifecycle!(self.pid, "spawned", mailbox_capacity = self.options.mailbox_capacity);

        let mut pending = VecDeque::new();
        let mut alive = match self.boot().await {
            Ok(()) => true,
            Err(failure) => self.recover(failure).await,
        };

        let mut batch = Vec::new();
        while alive {
            if !self.consumer.recv_batch(&mut batch).await {
                break;
            }
            pending.extend(batch.drain(..));
            alive = self.invoke(&mut pending).await;
        }

        self.shutdown(pending).await;
    }

    /// Builds a receiver and runs it through `Initialized` and `Started`.
    async fn boot(&mut self) -> Result<(), Failure> {
        let producer = self.producer.clone();
        let receiver = panic::catch_unwind(AssertUnwindSafe(|| producer())).map_err(|panic| {
            Failure::new(format!("producer panicked: {}", panic_message(panic.as_ref())))
        })?;
        self.receiver = Some(receiver);
        self.stopped_delivered = false;

        self.deliver(Arc::new(Initialized), None).await?;
        self.engine.publish(ActorInitializedEvent {
            pid: self.pid.clone(),
            timestamp: SystemTime::now(),
        });

        self.deliver(Arc::new(Started), None).await?;
        self.engine.publish(ActorStartedEvent {
            pid: self.pid.clone(),
            timestamp: SystemTime::now(),
        });
        log_lifecycle!(self.pid, "started", restarts = self.restarts);
        Ok(())
    }

    /// Handles queued envelopes in order. Returns `false` once the process
    /// must stop; unhandled envelopes stay in `pending`.
    async fn invoke(&mut self, pending: &mut VecDeque<Envelope>) -> bool {
        while let Some(envelope) = pending.pop_front() {
            if self.halted.load(Ordering::Acquire) {
                pending.push_front(envelope);
                debug!(pid = %self.pid, "halt requested");
                return false;
            }
            if envelope.message.is::<PoisonPill>() {
                debug!(pid = %self.pid, queued = pending.len(), "poison pill received");
                return false;
            }

            let Envelope { message, sender } = envelope;
            if let Err(failure) = self.deliver(message, sender).await {
                if !self.recover(failure).await {
                    return false;
                }
            }
        }
        true
    }

    /// Runs one message through the middleware chain and the receiver. This
    /// is the only catch boundary for actor code.
    async fn deliver(&mut self, message: Payload, sender: Option<Pid>) -> Result<(), Failure> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Ok(());
        };
        self.context.message = message;
        self.context.sender = sender;

        let chain = Next::new(&self.options.middleware, receiver.as_mut());
        match AssertUnwindSafe(chain.run(&mut self.context)).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(Failure::new(error.to_string())),
            Err(panic) => Err(Failure::new(panic_message(panic.as_ref()))),
        }
    }

    /// Applies the restart policy. Returns `true` once a fresh receiver is
    /// running, `false` when the budget is exhausted.
    async fn recover(&mut self, mut failure: Failure) -> bool {
        loop {
            self.retire().await;
            let Failure { reason, backtrace } = failure;

            if self.restarts >= self.options.max_restarts {
                error!(
                    pid = %self.pid,
                    restarts = self.restarts,
                    reason = %reason,
                    "max restarts exceeded, stopping actor"
                );
                self.engine.publish(ActorMaxRestartsExceededEvent {
                    pid: self.pid.clone(),
                    timestamp: SystemTime::now(),
                });
                return false;
            }

            self.restarts += 1;
            warn!(
                pid = %self.pid,
                restarts = self.restarts,
                max_restarts = self.options.max_restarts,
                reason = %reason,
                "actor failed, restarting"
            );
            self.engine.publish(ActorRestartedEvent {
                pid: self.pid.clone(),
                timestamp: SystemTime::now(),
                reason,
                backtrace: Arc::new(backtrace),
                restarts: self.restarts,
            });

            tokio::time::sleep(self.options.restart_delay).await;
            match self.boot().await {
                Ok(()) => return true,
                Err(next) => failure = next,
            }
        }
    }

    /// Delivers `Stopped` to the current instance, once, and drops it.
    async fn retire(&mut self) {
        if self.receiver.is_some() && !self.stopped_delivered {
            self.stopped_delivered = true;
            if let Err(failure) = self.deliver(Arc::new(Stopped), None).await {
                debug!(pid = %self.pid, reason = %failure.reason, "failure while handling Stopped ignored");
            }
        }
        self.receiver = None;
    }

    async fn shutdown(mut self, mut pending: VecDeque<Envelope>) {
        self.engine.unsubscribe(&self.pid);

        let children: Vec<Pid> = self
            .context
            .children
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        if !children.is_empty() {
            debug!(pid = %self.pid, children = children.len(), "stopping children");
            let mut terminations = Vec::with_capacity(children.len());
            for child in &children {
                terminations.push(self.engine.poison(child).await);
            }
            join_all(terminations.iter().map(Termination::done)).await;
        }

        self.retire().await;

        let mut rest = Vec::new();
        self.consumer.close_and_drain(&mut rest).await;
        pending.extend(rest);

        self.engine.registry().remove(&self.pid);
        if let Some(parent) = &self.parent {
            if let Some(children) = parent.children.upgrade() {
                children.remove(self.pid.id());
            }
        }

        for envelope in pending {
            if !envelope.message.is::<PoisonPill>() {
                self.engine.dead_letter(&self.pid, envelope).await;
            }
        }

        self.engine.publish(ActorStoppedEvent {
            pid: self.pid.clone(),
            timestamp: SystemTime::now(),
        });
        log_lifecycle!(self.pid, "stopped", restarts = self.restarts);
        self.done.send_replace(true);
    }
}
