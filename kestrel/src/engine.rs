//! # Engine
//!
//! Facade over the registry, the event stream and the remote sender. An
//! [`Engine`] is a cheap, cloneable handle; every process holds one.
//!
//! ## Routing
//! A send to a pid on this engine's address goes through the registry. A pid
//! that is not registered, or whose mailbox is already closed, turns the
//! message into a dead letter. Any other address is handed to the remote
//! sender; without one the send fails with [`EngineError::RemoteMissing`].
//!
//! Local sends wait while the target's mailbox is full, so a fast producer
//! is paced by its consumer instead of holding its worker thread.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use kestrel::{ActorConfig, Engine, EngineConfig};
//!
//! #[derive(Debug)]
//! struct Hello(&'static str);
//!
//! # async fn run() -> anyhow::Result<()> {
//! let engine = Engine::new(EngineConfig::default())?;
//! let pid = engine.spawn_fn(
//!     |ctx| {
//!         if let Some(Hello(name)) = ctx.message_as::<Hello>() {
//!             tracing::info!("hello {name}");
//!         }
//!         Ok(())
//!     },
//!     "greeter",
//!     ActorConfig::default(),
//! );
//! engine.send(&pid, Hello("world")).await?;
//! engine.poison(&pid).await.done().await;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use kestrel_api::events::{DeadLetterEvent, EngineRemoteMissingEvent};
use kestrel_api::message::{Envelope, Message, Payload};
use kestrel_api::pid::Pid;
use kestrel_api::remote::RemoteSender;
use kestrel_api::types::ActorResult;
use tracing::{debug, error, info, trace, warn, Instrument};
use uuid::Uuid;

use crate::config::{ActorConfig, EngineConfig};
use crate::context::Context;
use crate::dead_letter::{DeadLetterFetch, DeadLetterSink, DeadLetters, DEAD_LETTER_ID};
use crate::error::{EngineError, RequestError};
use crate::event_stream::{EventStream, SubscriptionId};
use crate::process::{ParentLink, PoisonPill, Process, Termination};
use crate::receiver::{self, FnReceiver, Producer, Receiver};
use crate::registry::Registry;
use crate::repeat::SendRepeater;
use crate::response::Response;
use crate::{actor_span, log_error};

/// Fresh actor id segment.
pub(crate) fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

struct EngineInner {
    address: String,
    config: EngineConfig,
    remote: Option<Arc<dyn RemoteSender>>,
    registry: Registry,
    event_stream: EventStream,
    dead_letter: Pid,
    pid_subscriptions: DashMap<Pid, SubscriptionId>,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Builds an engine and spawns its dead-letter sink.
    ///
    /// Must be called from within a tokio runtime. With a remote sender
    /// attached, the engine takes the remote's address and starts it.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let remote = config.remote.clone();
        let address = match &remote {
            Some(remote) => remote.address().to_string(),
            None => config.address.clone(),
        };
        if address.is_empty() {
            return Err(EngineError::Config("remote sender reported an empty address".to_string()));
        }
        if let Some(remote) = &remote {
            remote.start().map_err(|err| {
                log_error!(err, address = %address, "remote sender failed to start");
                EngineError::RemoteStart(err)
            })?;
        }

        let event_stream = EventStream::new();
        let engine = Engine {
            inner: Arc::new(EngineInner {
                registry: Registry::new(&address, event_stream.clone()),
                dead_letter: Pid::new(&address, DEAD_LETTER_ID),
                address,
                config,
                remote,
                event_stream,
                pid_subscriptions: DashMap::new(),
            }),
        };

        engine.spawn_process(
            engine.inner.dead_letter.clone(),
            receiver::producer(DeadLetterSink::default),
            &ActorConfig::default(),
            None,
        );
        info!(
            address = %engine.inner.address,
            remote = engine.inner.remote.is_some(),
            "engine started"
        );
        Ok(engine)
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn event_stream(&self) -> &EventStream {
        &self.inner.event_stream
    }

    pub fn dead_letter_pid(&self) -> &Pid {
        &self.inner.dead_letter
    }

    /// Spawns an actor under `name/id`, where `id` comes from the config or
    /// is a fresh uuid.
    ///
    /// If the pid is already taken nothing is started: an
    /// `ActorDuplicateIdEvent` is published and the existing pid returned.
    pub fn spawn<F, R>(&self, producer: F, name: &str, config: ActorConfig) -> Pid
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Receiver,
    {
        self.spawn_producer(receiver::producer(producer), name, config)
    }

    /// Spawns an actor backed by a closure. Restarts begin from a clone of
    /// `handler` as passed here.
    pub fn spawn_fn<F>(&self, handler: F, name: &str, config: ActorConfig) -> Pid
    where
        F: FnMut(&mut Context) -> ActorResult<()> + Clone + Send + Sync + 'static,
    {
        self.spawn(move || FnReceiver::new(handler.clone()), name, config)
    }

    pub fn spawn_producer(&self, producer: Producer, name: &str, config: ActorConfig) -> Pid {
        let id = config.id.clone().unwrap_or_else(new_id);
        let pid = Pid::with_tags(&self.inner.address, name, &[&id]);
        self.spawn_process(pid, producer, &config, None)
    }

    pub(crate) fn spawn_process(
        &self,
        pid: Pid,
        producer: Producer,
        config: &ActorConfig,
        parent: Option<ParentLink>,
    ) -> Pid {
        let options = self.inner.config.merge_with_actor_config(config);
        let siblings = parent.as_ref().and_then(|link| link.children.upgrade());
        let (process, handle) = Process::new(pid.clone(), self.clone(), producer, options, parent);

        if !self.inner.registry.add(handle) {
            return pid;
        }
        if let Some(siblings) = siblings {
            siblings.insert(pid.id().to_string(), pid.clone());
        }

        let span = actor_span!(pid.address(), pid.id());
        tokio::spawn(process.run().instrument(span));
        pid
    }

    /// Fire-and-forget send without a sender.
    pub async fn send<M: Message>(&self, target: &Pid, message: M) -> Result<(), EngineError> {
        self.send_payload(target, Arc::new(message), None).await
    }

    pub async fn send_with_sender<M: Message>(
        &self,
        target: &Pid,
        message: M,
        sender: Pid,
    ) -> Result<(), EngineError> {
        self.send_payload(target, Arc::new(message), Some(sender)).await
    }

    /// Sends an already shared payload.
    ///
    /// Only a foreign pid without a remote sender is reported as an error;
    /// undeliverable local sends become dead letters. Waits while the local
    /// target's mailbox is full.
    pub async fn send_payload(
        &self,
        target: &Pid,
        message: Payload,
        sender: Option<Pid>,
    ) -> Result<(), EngineError> {
        if self.is_local(target) {
            self.send_local(target, Envelope::from_payload(message, sender)).await;
            return Ok(());
        }

        match &self.inner.remote {
            Some(remote) => {
                trace!(target = %target, "handing message to remote sender");
                remote.send(target, message, sender.as_ref());
                Ok(())
            }
            None => {
                error!(target = %target, sender = ?sender, "no remote sender attached, message not delivered");
                self.inner.event_stream.publish(Arc::new(EngineRemoteMissingEvent {
                    target: target.clone(),
                    sender,
                    message,
                }));
                Err(EngineError::RemoteMissing(target.clone()))
            }
        }
    }

    fn is_local(&self, pid: &Pid) -> bool {
        pid.address() == self.inner.address
    }

    async fn send_local(&self, target: &Pid, envelope: Envelope) {
        match self.inner.registry.get(target) {
            Some(process) => {
                if let Err(error) = process.send(envelope).await {
                    self.dead_letter(target, error.into_envelope()).await;
                }
            }
            None => self.dead_letter(target, envelope).await,
        }
    }

    /// Diverts an undeliverable envelope to the dead-letter sink and
    /// publishes it on the event stream.
    pub(crate) async fn dead_letter(&self, target: &Pid, envelope: Envelope) {
        if *target == self.inner.dead_letter {
            warn!(message = ?envelope.message, "dead-letter sink unavailable, message dropped");
            return;
        }
        debug!(target = %target, message = ?envelope.message, "undeliverable message");

        let Envelope { message, sender } = envelope;
        // Re-publishing a dead letter about a dead letter would loop through
        // subscribers that no longer exist.
        let nested = message.is::<DeadLetterEvent>();
        let event: Payload = Arc::new(DeadLetterEvent {
            target: target.clone(),
            message,
            sender,
        });
        if !nested {
            self.inner.event_stream.publish(event.clone());
        }

        let sink = &self.inner.dead_letter;
        let delivered = match self.inner.registry.get(sink) {
            Some(process) => process.send(Envelope::from_payload(event, None)).await.is_ok(),
            None => false,
        };
        if !delivered {
            warn!(target = %target, "dead-letter sink unavailable, message dropped");
        }
    }

    /// Asks `target`, with the response's pid as sender.
    pub async fn request<M: Message>(&self, target: &Pid, message: M, timeout: Duration) -> Response {
        let mut response = Response::new(self.clone(), timeout);
        let sender = response.pid().clone();
        if let Err(error) = self.send_payload(target, Arc::new(message), Some(sender)).await {
            response.fail(error);
        }
        response
    }

    /// Dead letters buffered by the sink, oldest first.
    pub async fn dead_letters(&self, flush: bool) -> Result<Vec<DeadLetterEvent>, RequestError> {
        let timeout = self.inner.config.default_request_timeout;
        let letters = self
            .request(&self.inner.dead_letter, DeadLetterFetch { flush }, timeout)
            .await
            .result_as::<DeadLetters>()
            .await?;
        Ok(letters.0.clone())
    }

    /// Graceful stop: the process handles everything enqueued before this
    /// call, then stops. Messages enqueued afterwards become dead letters.
    ///
    /// Resolves once the pill is enqueued; await the returned
    /// [`Termination`] to wait for the stop itself.
    pub async fn poison(&self, pid: &Pid) -> Termination {
        self.terminate(pid, false).await
    }

    /// Stops the process before its next message. Whatever is still queued
    /// becomes a dead letter.
    pub async fn stop(&self, pid: &Pid) -> Termination {
        self.terminate(pid, true).await
    }

    async fn terminate(&self, pid: &Pid, halt: bool) -> Termination {
        let Some(process) = self.inner.registry.get(pid) else {
            return Termination::completed();
        };
        if halt {
            process.halt();
        }
        // The pill also wakes an idle process after a halt.
        if process.send(Envelope::new(PoisonPill, None)).await.is_err() {
            trace!(pid = %pid, "process already stopping");
        }
        process.termination()
    }

    /// Routes every event published from now on into `pid`'s mailbox.
    ///
    /// A process's subscription is dropped automatically when it stops. A
    /// foreign pid with no remote sender to reach it loses its subscription
    /// on the first event.
    pub fn subscribe(&self, pid: &Pid) {
        let engine = Arc::downgrade(&self.inner);
        let target = pid.clone();
        let (id, events) = self.inner.event_stream.attach();
        tokio::spawn(async move {
            while let Ok(event) = events.recv_async().await {
                let Some(inner) = engine.upgrade() else {
                    break;
                };
                let engine = Engine { inner };
                if let Err(error) = engine.send_payload(&target, event, None).await {
                    trace!(target = %target, error = %error, "event not forwarded, subscription dropped");
                    engine.inner.pid_subscriptions.remove_if(&target, |_, current| *current == id);
                    engine.inner.event_stream.unsubscribe(id);
                    break;
                }
            }
            trace!(subscription = %id, target = %target, "event forwarding closed");
        });
        if let Some(previous) = self.inner.pid_subscriptions.insert(pid.clone(), id) {
            self.inner.event_stream.unsubscribe(previous);
        }
    }

    pub fn unsubscribe(&self, pid: &Pid) -> bool {
        match self.inner.pid_subscriptions.remove(pid) {
            Some((_, id)) => self.inner.event_stream.unsubscribe(id),
            None => false,
        }
    }

    /// Publishes a user event on the event stream.
    pub fn publish<M: Message>(&self, event: M) {
        self.inner.event_stream.publish(Arc::new(event));
    }

    /// Sends `message` to `target` every `interval` until the returned
    /// repeater is stopped or dropped.
    pub fn send_repeat<M: Message>(&self, target: &Pid, message: M, interval: Duration) -> SendRepeater {
        SendRepeater::start(self.clone(), target.clone(), Arc::new(message), None, interval)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("address", &self.inner.address)
            .field("remote", &self.inner.remote.is_some())
            .field("processes", &self.inner.registry.len())
            .field("subscribers", &self.inner.event_stream.len())
            .finish()
    }
}
