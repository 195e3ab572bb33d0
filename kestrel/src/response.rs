//! # Response
//!
//! Ask pattern: an ephemeral, single-slot process registered under
//! `response/<uuid>`. The request is sent with that pid as sender; the first
//! reply that reaches the slot wins and later ones are ignored.
//!
//! The pid is deregistered when the [`Response`] is dropped, which covers a
//! resolved result, a timeout and an abandoned handle alike. Replies that
//! arrive afterwards are routed to the dead-letter sink.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_queue::ArrayQueue;
use kestrel_api::message::{Envelope, Message, Payload};
use kestrel_api::pid::Pid;
use tokio::sync::Notify;
use tracing::debug;

use crate::engine::{new_id, Engine};
use crate::error::{EngineError, MailboxError, RequestError};
use crate::process::{PoisonPill, Processer, Termination};

/// Id prefix of every response pid.
pub const RESPONSE_PREFIX: &str = "response";

struct ResponseSlot {
    pid: Pid,
    reply: ArrayQueue<Payload>,
    notify: Notify,
}

#[async_trait]
impl Processer for ResponseSlot {
    fn pid(&self) -> &Pid {
        &self.pid
    }

    async fn send(&self, envelope: Envelope) -> Result<(), MailboxError> {
        if envelope.message.is::<PoisonPill>() {
            return Ok(());
        }
        if let Err(late) = self.reply.push(envelope.message) {
            debug!(pid = %self.pid, reply = ?late, "response already resolved, reply ignored");
        }
        self.notify.notify_one();
        Ok(())
    }

    fn termination(&self) -> Termination {
        Termination::completed()
    }
}

/// Pending reply to a request.
pub struct Response {
    engine: Engine,
    slot: Arc<ResponseSlot>,
    timeout: Duration,
    error: Option<EngineError>,
}

impl Response {
    pub(crate) fn new(engine: Engine, timeout: Duration) -> Self {
        let pid = Pid::with_tags(engine.address(), RESPONSE_PREFIX, &[&new_id()]);
        let slot = Arc::new(ResponseSlot {
            pid,
            reply: ArrayQueue::new(1),
            notify: Notify::new(),
        });
        engine.registry().add(slot.clone());
        Self {
            engine,
            slot,
            timeout,
            error: None,
        }
    }

    /// Records a failure to send the request; [`Response::result`] reports
    /// it immediately.
    pub(crate) fn fail(&mut self, error: EngineError) {
        self.error = Some(error);
    }

    /// Pid replies must be sent to.
    pub fn pid(&self) -> &Pid {
        &self.slot.pid
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Waits for the first reply, or fails once the timeout elapses.
    pub async fn result(mut self) -> Result<Payload, RequestError> {
        if let Some(error) = self.error.take() {
            return Err(RequestError::Send(error));
        }

        let slot = self.slot.clone();
        let reply = async move {
            loop {
                if let Some(reply) = slot.reply.pop() {
                    return reply;
                }
                slot.notify.notified().await;
            }
        };

        tokio::time::timeout(self.timeout, reply)
            .await
            .map_err(|_| RequestError::Timeout(self.timeout))
    }

    /// Like [`Response::result`], downcasting the reply to `T`.
    pub async fn result_as<T: Message>(self) -> Result<Arc<T>, RequestError> {
        let reply = self.result().await?;
        reply
            .downcast_arc::<T>()
            .map_err(|other| RequestError::UnexpectedReply(format!("{other:?}")))
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        self.engine.registry().remove(&self.slot.pid);
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("pid", &self.slot.pid)
            .field("timeout", &self.timeout)
            .field("failed", &self.error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[tokio::test]
    async fn test_first_reply_wins() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let response = Response::new(engine.clone(), Duration::from_secs(1));
        let pid = response.pid().clone();
        assert!(pid.id().starts_with("response/"));

        engine.send(&pid, 1u32).await.unwrap();
        engine.send(&pid, 2u32).await.unwrap();

        let reply = response.result_as::<u32>().await.unwrap();
        assert_eq!(*reply, 1);
        assert!(!engine.registry().contains(&pid));
    }

    #[tokio::test]
    async fn test_timeout_deregisters() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let response = Response::new(engine.clone(), Duration::from_millis(10));
        let pid = response.pid().clone();
        assert!(engine.registry().contains(&pid));

        let started = tokio::time::Instant::now();
        let result = response.result().await;
        assert!(matches!(result, Err(RequestError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!engine.registry().contains(&pid));
    }

    #[tokio::test]
    async fn test_unexpected_reply_type() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let response = Response::new(engine.clone(), Duration::from_secs(1));
        engine.send(response.pid(), "text").await.unwrap();
        let result = response.result_as::<u32>().await;
        assert!(matches!(result, Err(RequestError::UnexpectedReply(_))));
    }

    #[tokio::test]
    async fn test_dropped_response_deregisters() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let response = Response::new(engine.clone(), Duration::from_secs(1));
        let pid = response.pid().clone();
        drop(response);
        assert!(!engine.registry().contains(&pid));
    }
}
