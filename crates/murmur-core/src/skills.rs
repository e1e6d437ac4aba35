// Skill Registry
// Mailbox actor mapping agents to capability sets and answering
// subset-match queries.

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, oneshot};

use crate::error::{MurmurError, Result};

enum SkillCommand {
    Register {
        agent_id: String,
        capabilities: HashSet<String>,
    },
    Remove {
        agent_id: String,
    },
    FindCapable {
        required: Vec<String>,
        reply: oneshot::Sender<Vec<String>>,
    },
    Capabilities {
        agent_id: String,
        reply: oneshot::Sender<Option<HashSet<String>>>,
    },
}

/// Cheap-to-clone handle to the skill registry actor.
#[derive(Clone)]
pub struct SkillRegistry {
    tx: mpsc::UnboundedSender<SkillCommand>,
}

impl SkillRegistry {
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut capabilities: HashMap<String, HashSet<String>> = HashMap::new();
            while let Some(command) = rx.recv().await {
                match command {
                    SkillCommand::Register {
                        agent_id,
                        capabilities: caps,
                    } => {
                        capabilities.insert(agent_id, caps);
                    }
                    SkillCommand::Remove { agent_id } => {
                        capabilities.remove(&agent_id);
                    }
                    SkillCommand::FindCapable { required, reply } => {
                        let mut capable: Vec<String> = capabilities
                            .iter()
                            .filter(|(_, caps)| required.iter().all(|r| caps.contains(r)))
                            .map(|(id, _)| id.clone())
                            .collect();
                        capable.sort();
                        let _ = reply.send(capable);
                    }
                    SkillCommand::Capabilities { agent_id, reply } => {
                        let _ = reply.send(capabilities.get(&agent_id).cloned());
                    }
                }
            }
        });
        Self { tx }
    }

    pub fn register<I, S>(&self, agent_id: impl Into<String>, caps: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let _ = self.tx.send(SkillCommand::Register {
            agent_id: agent_id.into(),
            capabilities: caps.into_iter().map(Into::into).collect(),
        });
    }

    pub fn remove(&self, agent_id: impl Into<String>) {
        let _ = self.tx.send(SkillCommand::Remove {
            agent_id: agent_id.into(),
        });
    }

    /// Agents whose capability set covers every required tag. Sorted by id
    /// for deterministic downstream selection.
    pub async fn find_capable(&self, required: &[String]) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SkillCommand::FindCapable {
                required: required.to_vec(),
                reply,
            })
            .map_err(|_| MurmurError::ChannelClosed("skill registry".into()))?;
        rx.await
            .map_err(|_| MurmurError::ChannelClosed("skill registry".into()))
    }

    pub async fn capabilities(&self, agent_id: &str) -> Result<Option<HashSet<String>>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SkillCommand::Capabilities {
                agent_id: agent_id.to_string(),
                reply,
            })
            .map_err(|_| MurmurError::ChannelClosed("skill registry".into()))?;
        rx.await
            .map_err(|_| MurmurError::ChannelClosed("skill registry".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subset_match() {
        let registry = SkillRegistry::spawn();
        registry.register("a", ["code_edit", "rust"]);
        registry.register("b", ["code_edit"]);
        registry.register("c", ["research"]);

        let capable = registry
            .find_capable(&["code_edit".to_string()])
            .await
            .unwrap();
        assert_eq!(capable, vec!["a", "b"]);

        let capable = registry
            .find_capable(&["code_edit".to_string(), "rust".to_string()])
            .await
            .unwrap();
        assert_eq!(capable, vec!["a"]);
    }

    #[tokio::test]
    async fn empty_requirement_matches_everyone() {
        let registry = SkillRegistry::spawn();
        registry.register("a", ["x"]);
        registry.register("b", Vec::<String>::new());
        let capable = registry.find_capable(&[]).await.unwrap();
        assert_eq!(capable, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn removal_drops_agent() {
        let registry = SkillRegistry::spawn();
        registry.register("a", ["x"]);
        registry.remove("a");
        let capable = registry.find_capable(&["x".to_string()]).await.unwrap();
        assert!(capable.is_empty());
    }
}
