// Artifact Registry
// Mailbox actor owning artifact records, with task/type secondary indexes
// and a content-hash dedup index.

use std::collections::HashMap;

use chrono::Utc;
use murmur_types::{Artifact, ArtifactType, ValidatorResult};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};

use crate::error::{MurmurError, Result};
use crate::event_bus::EventBus;
use crate::events::FleetEvent;

/// Hex sha-256 of artifact content, for callers that want the registry's
/// dedup behavior without inventing their own hash scheme.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

enum ArtifactCommand {
    Register {
        artifact: Artifact,
        reply: oneshot::Sender<String>,
    },
    UpdateValidation {
        artifact_id: String,
        result: ValidatorResult,
        reply: oneshot::Sender<Result<()>>,
    },
    Bless {
        artifact_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Get {
        artifact_id: String,
        reply: oneshot::Sender<Option<Artifact>>,
    },
    ListByTask {
        task_id: String,
        reply: oneshot::Sender<Vec<Artifact>>,
    },
    ListByType {
        artifact_type: ArtifactType,
        reply: oneshot::Sender<Vec<Artifact>>,
    },
}

struct ArtifactStore {
    by_id: HashMap<String, Artifact>,
    by_task: HashMap<String, Vec<String>>,
    by_type: HashMap<ArtifactType, Vec<String>>,
    by_hash: HashMap<String, String>,
    events: EventBus,
}

impl ArtifactStore {
    /// Register an artifact. Returns the surviving id: when the content hash
    /// matches a prior artifact, the prior id is returned and the newcomer is
    /// discarded.
    fn register(&mut self, artifact: Artifact) -> String {
        if let Some(hash) = artifact.content_hash.as_deref() {
            if let Some(existing) = self.by_hash.get(hash) {
                return existing.clone();
            }
        }

        let id = artifact.id.clone();
        if let Some(hash) = artifact.content_hash.clone() {
            self.by_hash.insert(hash, id.clone());
        }
        self.by_task
            .entry(artifact.provenance.task_id.clone())
            .or_default()
            .push(id.clone());
        self.by_type
            .entry(artifact.artifact_type)
            .or_default()
            .push(id.clone());
        self.events.publish(FleetEvent::ArtifactRegistered {
            artifact_id: id.clone(),
            task_id: artifact.provenance.task_id.clone(),
            timestamp: Utc::now(),
        });
        self.by_id.insert(id.clone(), artifact);
        id
    }

    fn collect(&self, ids: Option<&Vec<String>>) -> Vec<Artifact> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.by_id.get(id).cloned())
                .collect()
        })
        .unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct ArtifactRegistry {
    tx: mpsc::UnboundedSender<ArtifactCommand>,
}

impl ArtifactRegistry {
    pub fn spawn(events: EventBus) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut store = ArtifactStore {
                by_id: HashMap::new(),
                by_task: HashMap::new(),
                by_type: HashMap::new(),
                by_hash: HashMap::new(),
                events,
            };
            while let Some(command) = rx.recv().await {
                match command {
                    ArtifactCommand::Register { artifact, reply } => {
                        let _ = reply.send(store.register(artifact));
                    }
                    ArtifactCommand::UpdateValidation {
                        artifact_id,
                        result,
                        reply,
                    } => {
                        let outcome = match store.by_id.get_mut(&artifact_id) {
                            Some(artifact) => {
                                artifact.validators.push(result);
                                Ok(())
                            }
                            None => Err(MurmurError::NotFound(format!(
                                "artifact {artifact_id}"
                            ))),
                        };
                        let _ = reply.send(outcome);
                    }
                    ArtifactCommand::Bless { artifact_id, reply } => {
                        let outcome = if store.by_id.contains_key(&artifact_id) {
                            store.events.publish(FleetEvent::ArtifactBlessed {
                                artifact_id: artifact_id.clone(),
                                timestamp: Utc::now(),
                            });
                            Ok(())
                        } else {
                            Err(MurmurError::NotFound(format!("artifact {artifact_id}")))
                        };
                        let _ = reply.send(outcome);
                    }
                    ArtifactCommand::Get { artifact_id, reply } => {
                        let _ = reply.send(store.by_id.get(&artifact_id).cloned());
                    }
                    ArtifactCommand::ListByTask { task_id, reply } => {
                        let _ = reply.send(store.collect(store.by_task.get(&task_id)));
                    }
                    ArtifactCommand::ListByType {
                        artifact_type,
                        reply,
                    } => {
                        let _ = reply.send(store.collect(store.by_type.get(&artifact_type)));
                    }
                }
            }
        });
        Self { tx }
    }

    /// Returns the id of the stored artifact: the caller's id, or the
    /// earlier artifact's id when the content hash collides.
    pub async fn register(&self, artifact: Artifact) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ArtifactCommand::Register { artifact, reply })
            .map_err(|_| MurmurError::ChannelClosed("artifact registry".into()))?;
        rx.await
            .map_err(|_| MurmurError::ChannelClosed("artifact registry".into()))
    }

    pub async fn update_validation(
        &self,
        artifact_id: &str,
        result: ValidatorResult,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ArtifactCommand::UpdateValidation {
                artifact_id: artifact_id.to_string(),
                result,
                reply,
            })
            .map_err(|_| MurmurError::ChannelClosed("artifact registry".into()))?;
        rx.await
            .map_err(|_| MurmurError::ChannelClosed("artifact registry".into()))?
    }

    pub async fn bless(&self, artifact_id: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ArtifactCommand::Bless {
                artifact_id: artifact_id.to_string(),
                reply,
            })
            .map_err(|_| MurmurError::ChannelClosed("artifact registry".into()))?;
        rx.await
            .map_err(|_| MurmurError::ChannelClosed("artifact registry".into()))?
    }

    pub async fn get(&self, artifact_id: &str) -> Result<Option<Artifact>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ArtifactCommand::Get {
                artifact_id: artifact_id.to_string(),
                reply,
            })
            .map_err(|_| MurmurError::ChannelClosed("artifact registry".into()))?;
        rx.await
            .map_err(|_| MurmurError::ChannelClosed("artifact registry".into()))
    }

    pub async fn list_by_task(&self, task_id: &str) -> Result<Vec<Artifact>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ArtifactCommand::ListByTask {
                task_id: task_id.to_string(),
                reply,
            })
            .map_err(|_| MurmurError::ChannelClosed("artifact registry".into()))?;
        rx.await
            .map_err(|_| MurmurError::ChannelClosed("artifact registry".into()))
    }

    pub async fn list_by_type(&self, artifact_type: ArtifactType) -> Result<Vec<Artifact>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ArtifactCommand::ListByType {
                artifact_type,
                reply,
            })
            .map_err(|_| MurmurError::ChannelClosed("artifact registry".into()))?;
        rx.await
            .map_err(|_| MurmurError::ChannelClosed("artifact registry".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_types::ArtifactProvenance;

    fn make_artifact(id: &str, task_id: &str, hash: Option<&str>) -> Artifact {
        Artifact {
            id: id.to_string(),
            artifact_type: ArtifactType::Patch,
            format: "diff".to_string(),
            uri: format!("mem://{id}"),
            content_hash: hash.map(String::from),
            provenance: ArtifactProvenance {
                task_id: task_id.to_string(),
                agent_id: "agent-1".to_string(),
                created_at: Utc::now(),
                input_artifact_ids: Vec::new(),
            },
            validators: Vec::new(),
        }
    }

    #[tokio::test]
    async fn dedup_returns_existing_id() {
        let registry = ArtifactRegistry::spawn(EventBus::new());
        let first = registry
            .register(make_artifact("a1", "t1", Some("abc")))
            .await
            .unwrap();
        let second = registry
            .register(make_artifact("a2", "t2", Some("abc")))
            .await
            .unwrap();
        assert_eq!(first, "a1");
        assert_eq!(second, "a1");
        assert!(registry.get("a2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn null_hashes_never_dedup() {
        let registry = ArtifactRegistry::spawn(EventBus::new());
        let first = registry.register(make_artifact("a1", "t1", None)).await.unwrap();
        let second = registry.register(make_artifact("a2", "t1", None)).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(registry.list_by_task("t1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn validation_appends() {
        let registry = ArtifactRegistry::spawn(EventBus::new());
        registry.register(make_artifact("a1", "t1", None)).await.unwrap();
        registry
            .update_validation(
                "a1",
                ValidatorResult {
                    validator: "lint".to_string(),
                    passed: true,
                    feedback: String::new(),
                },
            )
            .await
            .unwrap();
        let artifact = registry.get("a1").await.unwrap().unwrap();
        assert_eq!(artifact.validators.len(), 1);
        assert!(artifact.validators[0].passed);
    }

    #[tokio::test]
    async fn bless_publishes_event() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let registry = ArtifactRegistry::spawn(events);
        registry.register(make_artifact("a1", "t1", None)).await.unwrap();
        registry.bless("a1").await.unwrap();

        // First event is the registration, second the blessing.
        let mut saw_bless = false;
        for _ in 0..2 {
            if let Ok(FleetEvent::ArtifactBlessed { artifact_id, .. }) = rx.try_recv() {
                assert_eq!(artifact_id, "a1");
                saw_bless = true;
            }
        }
        assert!(saw_bless);
    }

    #[test]
    fn content_hash_is_hex_sha256() {
        let hash = content_hash(b"hello");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, content_hash(b"hello"));
        assert_ne!(hash, content_hash(b"hello!"));
    }
}
