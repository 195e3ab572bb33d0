use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kestrel_api::remote::RemoteSender;
use tracing::warn;

use crate::error::EngineError;
use crate::receiver::Middleware;

/// Address used by engines without a remote sender.
pub const LOCAL_ADDRESS: &str = "local";
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;
pub const DEFAULT_MAX_RESTARTS: u32 = 3;
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

// --- Engine Configuration ---

/// Configuration for an [`Engine`](crate::Engine).
///
/// The `default_*` fields apply to every spawn that does not override them
/// through [`ActorConfig`].
#[derive(Clone)]
pub struct EngineConfig {
    /// Address of this engine. Ignored when a remote sender is attached; the
    /// remote's address is used instead.
    pub address: String,

    /// Transport for pids on other addresses.
    pub remote: Option<Arc<dyn RemoteSender>>,

    /// Restarts allowed before an actor is stopped permanently.
    pub default_max_restarts: u32,

    /// Pause between a failure and the rebuilt receiver.
    pub default_restart_delay: Duration,

    /// Mailbox slots per actor. Must be a power of two.
    pub default_mailbox_capacity: usize,

    /// Middleware wrapped around every actor, outside any per-actor
    /// middleware.
    pub default_middleware: Vec<Arc<dyn Middleware>>,

    /// Deadline used by helpers that issue requests on the caller's behalf.
    pub default_request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            address: LOCAL_ADDRESS.to_string(),
            remote: None,
            default_max_restarts: DEFAULT_MAX_RESTARTS,
            default_restart_delay: DEFAULT_RESTART_DELAY,
            default_mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            default_middleware: Vec::new(),
            default_request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("address", &self.address)
            .field("remote", &self.remote.as_ref().map(|r| r.address().to_string()))
            .field("default_max_restarts", &self.default_max_restarts)
            .field("default_restart_delay", &self.default_restart_delay)
            .field("default_mailbox_capacity", &self.default_mailbox_capacity)
            .field("default_middleware", &self.default_middleware.len())
            .field("default_request_timeout", &self.default_request_timeout)
            .finish()
    }
}

impl EngineConfig {
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteSender>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_default_middleware(mut self, middleware: impl Middleware) -> Self {
        self.default_middleware.push(Arc::new(middleware));
        self
    }

    /// Checks invariants the engine relies on.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.default_mailbox_capacity.is_power_of_two() {
            return Err(EngineError::Config(format!(
                "default mailbox capacity must be a power of two, got {}",
                self.default_mailbox_capacity
            )));
        }
        if self.remote.is_none() && self.address.is_empty() {
            return Err(EngineError::Config("engine address must not be empty".to_string()));
        }
        Ok(())
    }

    /// Merge engine defaults with actor-specific configuration.
    ///
    /// Unset actor fields take the engine default. Engine middleware comes
    /// first, so it wraps the actor's own middleware.
    pub fn merge_with_actor_config(&self, actor_config: &ActorConfig) -> ProcessOptions {
        let requested = actor_config.mailbox_capacity.unwrap_or(self.default_mailbox_capacity);
        let mailbox_capacity = requested.max(1).next_power_of_two();
        if mailbox_capacity != requested {
            warn!(requested, mailbox_capacity, "mailbox capacity rounded up to a power of two");
        }

        let mut middleware = self.default_middleware.clone();
        middleware.extend(actor_config.middleware.iter().cloned());

        ProcessOptions {
            max_restarts: actor_config.max_restarts.unwrap_or(self.default_max_restarts),
            restart_delay: actor_config.restart_delay.unwrap_or(self.default_restart_delay),
            mailbox_capacity,
            middleware,
        }
    }
}

// --- Actor Configuration ---

/// Configuration for an individual spawn, overriding engine defaults.
#[derive(Clone, Default)]
pub struct ActorConfig {
    /// Last id segment. A fresh uuid when unset.
    pub id: Option<String>,

    pub max_restarts: Option<u32>,

    pub restart_delay: Option<Duration>,

    pub mailbox_capacity: Option<usize>,

    /// Applied in order; the first entry runs outermost.
    pub middleware: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for ActorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorConfig")
            .field("id", &self.id)
            .field("max_restarts", &self.max_restarts)
            .field("restart_delay", &self.restart_delay)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

impl ActorConfig {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = Some(max_restarts);
        self
    }

    pub fn with_restart_delay(mut self, restart_delay: Duration) -> Self {
        self.restart_delay = Some(restart_delay);
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = Some(capacity);
        self
    }

    pub fn with_middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }
}

/// Fully resolved options a process runs with.
#[derive(Clone)]
pub struct ProcessOptions {
    pub max_restarts: u32,
    pub restart_delay: Duration,
    pub mailbox_capacity: usize,
    pub middleware: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for ProcessOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessOptions")
            .field("max_restarts", &self.max_restarts)
            .field("restart_delay", &self.restart_delay)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.address, LOCAL_ADDRESS);
        assert!(config.remote.is_none());
        assert_eq!(config.default_max_restarts, 3);
        assert_eq!(config.default_restart_delay, Duration::from_millis(500));
        assert_eq!(config.default_mailbox_capacity, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_actor_config_defaults() {
        let config = ActorConfig::default();
        assert!(config.id.is_none());
        assert!(config.max_restarts.is_none());
        assert!(config.restart_delay.is_none());
        assert!(config.mailbox_capacity.is_none());
        assert!(config.middleware.is_empty());
    }

    #[test]
    fn test_merge_prefers_actor_values() {
        let engine = EngineConfig::default();
        let actor = ActorConfig::default()
            .with_max_restarts(0)
            .with_restart_delay(Duration::from_millis(1))
            .with_mailbox_capacity(64);

        let options = engine.merge_with_actor_config(&actor);
        assert_eq!(options.max_restarts, 0);
        assert_eq!(options.restart_delay, Duration::from_millis(1));
        assert_eq!(options.mailbox_capacity, 64);

        let options = engine.merge_with_actor_config(&ActorConfig::default());
        assert_eq!(options.max_restarts, DEFAULT_MAX_RESTARTS);
        assert_eq!(options.mailbox_capacity, DEFAULT_MAILBOX_CAPACITY);
    }

    #[test]
    fn test_capacity_rounded_to_power_of_two() {
        let engine = EngineConfig::default();
        let options = engine.merge_with_actor_config(&ActorConfig::default().with_mailbox_capacity(100));
        assert_eq!(options.mailbox_capacity, 128);
        let options = engine.merge_with_actor_config(&ActorConfig::default().with_mailbox_capacity(0));
        assert_eq!(options.mailbox_capacity, 1);
    }

    #[test]
    fn test_validate_rejects_bad_capacity() {
        let config = EngineConfig {
            default_mailbox_capacity: 1000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }
}
