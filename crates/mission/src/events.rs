//! Mission lifecycle events.
//!
//! Publishing is fire-and-forget: a send with no subscribers is dropped, and
//! subscriber handlers run in their own tasks so a slow or failing handler
//! never holds up the mission loop or other subscribers.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use supermean_common::{Result, now_millis};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

pub mod topics {
    pub const STARTED: &str = "mission.started";
    pub const PLAN_CREATED: &str = "mission.plan_created";
    pub const BUILD_COMPLETED: &str = "mission.build_completed";
    pub const EVALUATION_COMPLETED: &str = "mission.evaluation_completed";
    pub const DECISION_MADE: &str = "mission.decision_made";
    pub const COMPLETED_SUCCESS: &str = "mission.completed.success";
    pub const COMPLETED_FAILURE: &str = "mission.completed.failure";
    pub const STOPPED: &str = "mission.stopped";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionEvent {
    pub topic: String,
    pub mission_id: String,
    pub payload: Value,
    pub timestamp_ms: u64,
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MissionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, topic: &str, mission_id: &str, payload: Value) {
        let event = MissionEvent {
            topic: topic.to_string(),
            mission_id: mission_id.to_string(),
            payload,
            timestamp_ms: now_millis(),
        };
        match self.sender.send(event) {
            Ok(receivers) => debug!(topic, mission_id, receivers, "Published event"),
            Err(_) => debug!(topic, mission_id, "No subscribers for event"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MissionEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Run `handler` for every event whose topic starts with `prefix`.
    ///
    /// Each invocation is spawned separately; errors and panics are logged.
    /// The listener ends when the bus is dropped.
    pub fn subscribe_fn<F, Fut>(&self, prefix: impl Into<String>, handler: F) -> JoinHandle<()>
    where
        F: Fn(MissionEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let prefix = prefix.into();
        let mut receiver = self.sender.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.topic.starts_with(&prefix) => {
                        let topic = event.topic.clone();
                        let handled = tokio::spawn(handler(event));
                        tokio::spawn(async move {
                            match handled.await {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => warn!(topic = %topic, error = %e, "Event handler failed"),
                                Err(e) => warn!(topic = %topic, error = %e, "Event handler panicked"),
                            }
                        });
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(prefix = %prefix, skipped = n, "Event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use supermean_common::SuperMeanError;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(topics::STARTED, "m1", json!({"goal": "g"}));
        assert_eq!(bus.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(topics::PLAN_CREATED, "m1", json!({"steps": 2}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "mission.plan_created");
        assert_eq!(event.mission_id, "m1");
        assert_eq!(event.payload["steps"], 2);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let bus = EventBus::default();
        let seen = Arc::new(AtomicUsize::new(0));

        bus.subscribe_fn("mission.", |_| async {
            Err(SuperMeanError::Agent("handler broke".into()))
        });
        let counter = seen.clone();
        bus.subscribe_fn("mission.completed", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.publish(topics::STARTED, "m1", Value::Null);
        bus.publish(topics::COMPLETED_SUCCESS, "m1", Value::Null);
        bus.publish(topics::COMPLETED_FAILURE, "m2", Value::Null);

        for _ in 0..50 {
            if seen.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
