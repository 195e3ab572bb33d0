use std::time::Duration;

use kestrel_api::message::Payload;
use kestrel_api::pid::Pid;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{trace, warn};

use crate::engine::Engine;

/// Periodically re-sends one payload until stopped or dropped.
#[derive(Debug)]
pub struct SendRepeater {
    target: Pid,
    interval: Duration,
    task: JoinHandle<()>,
}

impl SendRepeater {
    pub(crate) fn start(
        engine: Engine,
        target: Pid,
        message: Payload,
        sender: Option<Pid>,
        interval: Duration,
    ) -> Self {
        // tokio intervals reject a zero period.
        let interval = interval.max(Duration::from_millis(1));
        let task = tokio::spawn({
            let target = target.clone();
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(error) = engine.send_payload(&target, message.clone(), sender.clone()).await {
                        warn!(target = %target, error = %error, "repeated send failed, repeater stopped");
                        break;
                    }
                }
            }
        });
        trace!(target = %target, ?interval, "repeater started");
        Self {
            target,
            interval,
            task,
        }
    }

    pub fn target(&self) -> &Pid {
        &self.target
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Cancels the repetition. Dropping the repeater does the same.
    pub fn stop(self) {}
}

impl Drop for SendRepeater {
    fn drop(&mut self) {
        self.task.abort();
    }
}
