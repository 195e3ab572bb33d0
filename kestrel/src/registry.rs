//! # Registry
//!
//! Concurrent map from [`Pid`] to the process that owns it. The registry is
//! the single source of truth for whether an actor is alive on this engine.
//! It is sharded, so lookups never block each other and writers only contend
//! within one shard.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use kestrel_api::events::ActorDuplicateIdEvent;
use kestrel_api::pid::Pid;
use tracing::{trace, warn};

use crate::event_stream::EventStream;
use crate::process::Processer;

pub struct Registry {
    address: Arc<str>,
    processes: DashMap<Pid, Arc<dyn Processer>>,
    event_stream: EventStream,
}

impl Registry {
    pub(crate) fn new(address: &str, event_stream: EventStream) -> Self {
        Self {
            address: Arc::from(address),
            processes: DashMap::new(),
            event_stream,
        }
    }

    /// Registers a process. The first registration under a pid wins; a
    /// duplicate publishes [`ActorDuplicateIdEvent`] and returns `false`.
    pub(crate) fn add(&self, process: Arc<dyn Processer>) -> bool {
        let pid = process.pid().clone();
        let inserted = match self.processes.entry(pid.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(process);
                true
            }
        };

        if inserted {
            trace!(pid = %pid, "registered");
        } else {
            warn!(pid = %pid, "duplicate actor id, keeping existing registration");
            self.event_stream.publish(Arc::new(ActorDuplicateIdEvent {
                pid,
                timestamp: SystemTime::now(),
            }));
        }
        inserted
    }

    pub(crate) fn remove(&self, pid: &Pid) -> Option<Arc<dyn Processer>> {
        let removed = self.processes.remove(pid).map(|(_, process)| process);
        if removed.is_some() {
            trace!(pid = %pid, "deregistered");
        }
        removed
    }

    pub(crate) fn get(&self, pid: &Pid) -> Option<Arc<dyn Processer>> {
        self.processes.get(pid).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, pid: &Pid) -> bool {
        self.processes.contains_key(pid)
    }

    /// Resolves a local id to its pid, if a process is registered under it.
    pub fn get_by_id(&self, id: &str) -> Option<Pid> {
        let pid = Pid::new(&*self.address, id);
        self.contains(&pid).then_some(pid)
    }

    /// Snapshot of every registered pid.
    pub fn pids(&self) -> Vec<Pid> {
        self.processes.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("address", &self.address)
            .field("processes", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MailboxError;
    use async_trait::async_trait;
    use crate::process::Termination;
    use kestrel_api::message::Envelope;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixed {
        pid: Pid,
    }

    #[async_trait]
    impl Processer for Fixed {
        fn pid(&self) -> &Pid {
            &self.pid
        }

        async fn send(&self, _envelope: Envelope) -> Result<(), MailboxError> {
            Ok(())
        }

        fn termination(&self) -> Termination {
            Termination::completed()
        }
    }

    fn fixed(id: &str) -> Arc<dyn Processer> {
        Arc::new(Fixed {
            pid: Pid::new("local", id),
        })
    }

    #[test]
    fn test_add_get_remove() {
        let registry = Registry::new("local", EventStream::new());
        let pid = Pid::new("local", "worker/1");

        assert!(registry.get(&pid).is_none());
        assert!(registry.add(fixed("worker/1")));
        assert!(registry.contains(&pid));
        assert_eq!(registry.get_by_id("worker/1"), Some(pid.clone()));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&pid).is_some());
        assert!(registry.remove(&pid).is_none());
        assert!(registry.is_empty());
        assert_eq!(registry.get_by_id("worker/1"), None);
    }

    #[tokio::test]
    async fn test_duplicate_keeps_first_and_publishes() {
        let stream = EventStream::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        stream.subscribe(move |event| {
            if let Some(dup) = event.downcast_ref::<ActorDuplicateIdEvent>() {
                let _ = tx.send(dup.pid.clone());
            }
        });

        let registry = Registry::new("local", stream);
        assert!(registry.add(fixed("worker/1")));
        assert!(!registry.add(fixed("worker/1")));
        assert_eq!(registry.len(), 1);

        let duplicate = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(duplicate, Pid::new("local", "worker/1"));

        let pid = Pid::new("local", "worker/1");
        let kept = registry.get(&pid).unwrap();
        assert_eq!(kept.pid(), &pid);
        assert_eq!(registry.pids(), vec![pid]);
    }

    #[test]
    fn test_concurrent_adds_register_exactly_once() {
        let registry = Arc::new(Registry::new("local", EventStream::new()));
        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8u32)
                .map(|_| {
                    let registry = registry.clone();
                    scope.spawn(move || {
                        (0..100)
                            .filter(|n| registry.add(fixed(&format!("shared/{n}"))))
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(winners, 100);
        assert_eq!(registry.len(), 100);
    }
}
