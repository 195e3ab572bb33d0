use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use kestrel_api::events::Initialized;
use kestrel_api::message::{Message, Payload};
use kestrel_api::pid::Pid;
use kestrel_api::types::ActorResult;
use tracing::warn;

use crate::config::ActorConfig;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::process::ParentLink;
use crate::receiver::{FnReceiver, Receiver};
use crate::repeat::SendRepeater;
use crate::response::Response;

/// Execution context handed to a receiver for every message.
///
/// A process keeps one context for its whole lifetime, so the children set
/// survives restarts of the receiver.
pub struct Context {
    pid: Pid,
    engine: Engine,
    parent: Option<Pid>,
    pub(crate) children: Arc<DashMap<String, Pid>>,
    pub(crate) message: Payload,
    pub(crate) sender: Option<Pid>,
}

impl Context {
    pub(crate) fn new(pid: Pid, engine: Engine, parent: Option<Pid>) -> Self {
        Self {
            pid,
            engine,
            parent,
            children: Arc::new(DashMap::new()),
            message: Arc::new(Initialized),
            sender: None,
        }
    }

    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The message being handled.
    pub fn message(&self) -> &Payload {
        &self.message
    }

    /// The message being handled, if it is an `M`.
    pub fn message_as<M: Message>(&self) -> Option<&M> {
        self.message.downcast_ref::<M>()
    }

    pub fn sender(&self) -> Option<&Pid> {
        self.sender.as_ref()
    }

    pub fn parent(&self) -> Option<&Pid> {
        self.parent.as_ref()
    }

    /// Sends `message` to `target` with this actor as the sender.
    pub async fn send<M: Message>(&self, target: &Pid, message: M) -> Result<(), EngineError> {
        self.engine.send_with_sender(target, message, self.pid.clone()).await
    }

    pub async fn send_payload(&self, target: &Pid, message: Payload) -> Result<(), EngineError> {
        self.engine.send_payload(target, message, Some(self.pid.clone())).await
    }

    /// Replies to the sender of the current message.
    ///
    /// Without a sender the reply has nowhere to go; it is logged and
    /// dropped.
    pub async fn respond<M: Message>(&self, message: M) -> Result<(), EngineError> {
        match &self.sender {
            Some(sender) => {
                self.engine
                    .send_with_sender(sender, message, self.pid.clone())
                    .await
            }
            None => {
                warn!(pid = %self.pid, message = ?message, "respond without a sender, reply dropped");
                Ok(())
            }
        }
    }

    /// Passes the current message on to `target`, keeping the original
    /// sender so replies bypass this actor.
    pub async fn forward(&self, target: &Pid) -> Result<(), EngineError> {
        self.engine
            .send_payload(target, self.message.clone(), self.sender.clone())
            .await
    }

    /// Asks `target`. Awaiting the response blocks this actor's mailbox.
    pub async fn request<M: Message>(&self, target: &Pid, message: M, timeout: Duration) -> Response {
        self.engine.request(target, message, timeout).await
    }

    /// Spawns a child under `self.id/name/id`.
    ///
    /// The child is tracked until it stops, and is stopped along with this
    /// actor.
    pub fn spawn_child<F, R>(&self, producer: F, name: &str, config: ActorConfig) -> Pid
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Receiver,
    {
        let id = config.id.clone().unwrap_or_else(crate::engine::new_id);
        let pid = self.pid.child_with_tags(name, &[&id]);
        let parent = ParentLink {
            pid: self.pid.clone(),
            children: Arc::downgrade(&self.children),
        };
        self.engine
            .spawn_process(pid, crate::receiver::producer(producer), &config, Some(parent))
    }

    /// Spawns a child backed by a closure. See [`Context::spawn_child`].
    pub fn spawn_child_fn<F>(&self, handler: F, name: &str, config: ActorConfig) -> Pid
    where
        F: FnMut(&mut Context) -> ActorResult<()> + Clone + Send + Sync + 'static,
    {
        self.spawn_child(move || FnReceiver::new(handler.clone()), name, config)
    }

    /// Snapshot of the live children.
    pub fn children(&self) -> Vec<Pid> {
        self.children.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Looks up a live child by its full id.
    pub fn child(&self, id: &str) -> Option<Pid> {
        self.children.get(id).map(|entry| entry.value().clone())
    }

    /// Sends `message` to `target` every `interval`, with this actor as the
    /// sender.
    pub fn send_repeat<M: Message>(&self, target: &Pid, message: M, interval: Duration) -> SendRepeater {
        SendRepeater::start(
            self.engine.clone(),
            target.clone(),
            Arc::new(message),
            Some(self.pid.clone()),
            interval,
        )
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("pid", &self.pid)
            .field("parent", &self.parent)
            .field("children", &self.children.len())
            .field("message", &self.message)
            .field("sender", &self.sender)
            .finish()
    }
}
