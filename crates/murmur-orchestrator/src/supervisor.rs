// Supervisor
// Spawns and stops agent actors, routes messages by agent id, and treats
// child termination as just another message.

use std::collections::HashMap;
use std::sync::Arc;

use murmur_core::{
    ArtifactRegistry, Blackboard, FleetConfig, MurmurError, SkillRegistry, ViewportBridge,
};
use murmur_memory::KnowledgeSidecar;
use murmur_runtime::DriverFactory;
use murmur_types::AgentProfile;
use tokio::sync::mpsc;

use crate::agent;
use crate::mailbox::{
    AgentMsg, DispatcherHandle, OrchestratorHandle, SupervisorHandle, SupervisorMsg,
};

struct ChildHandle {
    tx: mpsc::UnboundedSender<AgentMsg>,
}

pub(crate) struct Supervisor {
    config: Arc<FleetConfig>,
    factory: Arc<dyn DriverFactory>,
    skills: SkillRegistry,
    artifacts: ArtifactRegistry,
    sidecar: KnowledgeSidecar,
    blackboard: Blackboard,
    viewport: Arc<dyn ViewportBridge>,
    dispatcher: DispatcherHandle,
    orchestrator: OrchestratorHandle,
    handle: SupervisorHandle,
    children: HashMap<String, ChildHandle>,
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn(
    config: Arc<FleetConfig>,
    factory: Arc<dyn DriverFactory>,
    skills: SkillRegistry,
    artifacts: ArtifactRegistry,
    sidecar: KnowledgeSidecar,
    blackboard: Blackboard,
    viewport: Arc<dyn ViewportBridge>,
    dispatcher: DispatcherHandle,
    orchestrator: OrchestratorHandle,
    mut rx: mpsc::UnboundedReceiver<SupervisorMsg>,
    handle: SupervisorHandle,
) {
    tokio::spawn(async move {
        let mut supervisor = Supervisor {
            config,
            factory,
            skills,
            artifacts,
            sidecar,
            blackboard,
            viewport,
            dispatcher,
            orchestrator,
            handle,
            children: HashMap::new(),
        };
        while let Some(message) = rx.recv().await {
            supervisor.handle_message(message);
        }
    });
}

impl Supervisor {
    fn handle_message(&mut self, message: SupervisorMsg) {
        match message {
            SupervisorMsg::SpawnAgent { profile, reply } => {
                let _ = reply.send(self.spawn_agent(profile));
            }
            SupervisorMsg::StopAgent { agent_id } => {
                if let Some(child) = self.children.get(&agent_id) {
                    let _ = child.tx.send(AgentMsg::Stop);
                } else {
                    tracing::debug!("stop for unknown agent {agent_id} ignored");
                }
            }
            SupervisorMsg::Route { agent_id, message } => {
                match self.children.get(&agent_id) {
                    Some(child) => {
                        let _ = child.tx.send(message);
                    }
                    None => {
                        tracing::debug!("dropping message for unknown agent {agent_id}");
                    }
                }
            }
            SupervisorMsg::ChildTerminated { agent_id } => {
                if self.children.remove(&agent_id).is_some() {
                    self.skills.remove(agent_id.clone());
                    self.viewport.publish_agent_despawned(&agent_id);
                    tracing::info!("agent {agent_id} terminated");
                }
            }
        }
    }

    fn spawn_agent(&mut self, profile: AgentProfile) -> murmur_core::Result<()> {
        if self.children.contains_key(&profile.id) {
            return Err(MurmurError::InvalidOperation(format!(
                "agent {} already exists",
                profile.id
            )));
        }

        let driver = self.factory.create(&profile)?;
        let (tx, rx) = mpsc::unbounded_channel();

        self.skills
            .register(profile.id.clone(), profile.capabilities.clone());
        self.viewport
            .publish_agent_spawned(&profile.id, &profile.visual);

        let agent_id = profile.id.clone();
        let join = agent::spawn(
            profile,
            self.config.clone(),
            self.dispatcher.clone(),
            self.orchestrator.clone(),
            self.artifacts.clone(),
            self.sidecar.clone(),
            self.blackboard.clone(),
            self.viewport.clone(),
            driver,
            tx.clone(),
            rx,
        );

        // Surface the child's exit through the mailbox like any other event.
        let supervisor = self.handle.clone();
        let watched_id = agent_id.clone();
        tokio::spawn(async move {
            let _ = join.await;
            supervisor.send(SupervisorMsg::ChildTerminated {
                agent_id: watched_id,
            });
        });

        self.children.insert(agent_id, ChildHandle { tx });
        Ok(())
    }
}
