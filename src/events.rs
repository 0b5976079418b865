//! Cluster lifecycle event fanout
//!
//! A broadcast channel carrying node lifecycle transitions. Publishing never
//! fails; with no subscribers the event is dropped.

use crate::domain::model::{Node, NodeState};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Default buffered capacity per subscriber
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// Full node snapshot after the transition plus the prior state
    NodeStateChanged {
        node: Box<Node>,
        previous_state: NodeState,
    },
    NodeProfileChanged {
        node: String,
        software_profile: Option<String>,
    },
    NodeDeleted {
        node: String,
    },
}

/// Shared publish/subscribe handle for lifecycle events
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: Event) {
        debug!(?event, "Publishing event");
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(Event::NodeDeleted { node: "n1.cluster".to_string() });

        let event = rx.recv().await.unwrap();
        assert_eq!(event, Event::NodeDeleted { node: "n1.cluster".to_string() });
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_a_noop() {
        let bus = EventBus::new();
        bus.publish(Event::NodeDeleted { node: "n1.cluster".to_string() });
    }
}
