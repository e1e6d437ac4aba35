// Blackboard
// Keyed last-value publish/subscribe with immediate current-value delivery
// on subscribe and prefix listing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::{MurmurError, Result};
use crate::event_bus::EventBus;
use crate::events::FleetEvent;

/// One blackboard value. `publisher_id` is advisory; writes are not
/// authorised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub key: String,
    pub value: serde_json::Value,
    pub publisher_id: String,
    pub last_updated: DateTime<Utc>,
}

enum BlackboardCommand {
    Publish {
        key: String,
        value: serde_json::Value,
        publisher_id: String,
    },
    Subscribe {
        key: String,
        subscriber_id: String,
        sender: mpsc::UnboundedSender<Signal>,
    },
    DropSubscriber {
        subscriber_id: String,
    },
    ListSignals {
        prefix: Option<String>,
        reply: oneshot::Sender<Vec<String>>,
    },
    Get {
        key: String,
        reply: oneshot::Sender<Option<Signal>>,
    },
}

#[derive(Clone)]
pub struct Blackboard {
    tx: mpsc::UnboundedSender<BlackboardCommand>,
}

impl Blackboard {
    pub fn spawn(events: EventBus) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut values: HashMap<String, Signal> = HashMap::new();
            let mut subscribers: HashMap<String, Vec<(String, mpsc::UnboundedSender<Signal>)>> =
                HashMap::new();
            while let Some(command) = rx.recv().await {
                match command {
                    BlackboardCommand::Publish {
                        key,
                        value,
                        publisher_id,
                    } => {
                        let signal = Signal {
                            key: key.clone(),
                            value,
                            publisher_id: publisher_id.clone(),
                            last_updated: Utc::now(),
                        };
                        values.insert(key.clone(), signal.clone());
                        if let Some(subs) = subscribers.get_mut(&key) {
                            subs.retain(|(_, sender)| sender.send(signal.clone()).is_ok());
                        }
                        events.publish(FleetEvent::SignalPublished {
                            key,
                            publisher_id,
                            timestamp: signal.last_updated,
                        });
                    }
                    BlackboardCommand::Subscribe {
                        key,
                        subscriber_id,
                        sender,
                    } => {
                        // Current value first, then future updates.
                        if let Some(current) = values.get(&key) {
                            let _ = sender.send(current.clone());
                        }
                        subscribers
                            .entry(key)
                            .or_default()
                            .push((subscriber_id, sender));
                    }
                    BlackboardCommand::DropSubscriber { subscriber_id } => {
                        for subs in subscribers.values_mut() {
                            subs.retain(|(id, _)| *id != subscriber_id);
                        }
                    }
                    BlackboardCommand::ListSignals { prefix, reply } => {
                        let mut keys: Vec<String> = values
                            .keys()
                            .filter(|key| {
                                prefix
                                    .as_deref()
                                    .map(|p| key.starts_with(p))
                                    .unwrap_or(true)
                            })
                            .cloned()
                            .collect();
                        keys.sort();
                        let _ = reply.send(keys);
                    }
                    BlackboardCommand::Get { key, reply } => {
                        let _ = reply.send(values.get(&key).cloned());
                    }
                }
            }
        });
        Self { tx }
    }

    pub fn publish(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
        publisher_id: impl Into<String>,
    ) {
        let _ = self.tx.send(BlackboardCommand::Publish {
            key: key.into(),
            value,
            publisher_id: publisher_id.into(),
        });
    }

    /// Subscribe to a key. The current value, if any, is delivered on the
    /// returned channel before any subsequent update.
    pub fn subscribe(
        &self,
        key: impl Into<String>,
        subscriber_id: impl Into<String>,
    ) -> mpsc::UnboundedReceiver<Signal> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = self.tx.send(BlackboardCommand::Subscribe {
            key: key.into(),
            subscriber_id: subscriber_id.into(),
            sender,
        });
        receiver
    }

    /// Remove a terminated subscriber from every key set.
    pub fn drop_subscriber(&self, subscriber_id: impl Into<String>) {
        let _ = self.tx.send(BlackboardCommand::DropSubscriber {
            subscriber_id: subscriber_id.into(),
        });
    }

    pub async fn list_signals(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BlackboardCommand::ListSignals {
                prefix: prefix.map(String::from),
                reply,
            })
            .map_err(|_| MurmurError::ChannelClosed("blackboard".into()))?;
        rx.await
            .map_err(|_| MurmurError::ChannelClosed("blackboard".into()))
    }

    pub async fn get(&self, key: &str) -> Result<Option<Signal>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BlackboardCommand::Get {
                key: key.to_string(),
                reply,
            })
            .map_err(|_| MurmurError::ChannelClosed("blackboard".into()))?;
        rx.await
            .map_err(|_| MurmurError::ChannelClosed("blackboard".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_gets_current_value_then_updates() {
        let board = Blackboard::spawn(EventBus::new());
        board.publish("build/status", json!("green"), "ci");

        let mut rx = board.subscribe("build/status", "watcher");
        let first = rx.recv().await.unwrap();
        assert_eq!(first.value, json!("green"));

        board.publish("build/status", json!("red"), "ci");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.value, json!("red"));
    }

    #[tokio::test]
    async fn publish_delivers_exactly_once_per_subscriber() {
        let board = Blackboard::spawn(EventBus::new());
        let mut rx = board.subscribe("k", "watcher");
        board.publish("k", json!(1), "p");
        let signal = rx.recv().await.unwrap();
        assert_eq!(signal.value, json!(1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn prefix_listing() {
        let board = Blackboard::spawn(EventBus::new());
        board.publish("build/status", json!(1), "p");
        board.publish("build/warnings", json!(2), "p");
        board.publish("deploy/status", json!(3), "p");

        let all = board.list_signals(None).await.unwrap();
        assert_eq!(all.len(), 3);

        let build = board.list_signals(Some("build/")).await.unwrap();
        assert_eq!(build, vec!["build/status", "build/warnings"]);
    }

    #[tokio::test]
    async fn dropped_subscriber_stops_receiving() {
        let board = Blackboard::spawn(EventBus::new());
        let mut rx = board.subscribe("k", "watcher");
        board.drop_subscriber("watcher");
        board.publish("k", json!(1), "p");
        // The value is recorded but the dropped subscriber never sees it.
        assert_eq!(board.get("k").await.unwrap().unwrap().value, json!(1));
        assert!(rx.try_recv().is_err());
    }
}
