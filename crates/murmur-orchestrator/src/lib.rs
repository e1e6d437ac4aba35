//! Orchestration core for a fleet of autonomous coding agents: task graphs
//! in, sealed-bid auctions per task, risk-gated awards, runtime
//! decomposition and synthesis, and a completion ledger out.

mod agent;
mod dispatcher;
pub mod graph;
pub mod mailbox;
mod orchestrator;
pub mod prompts;
mod supervisor;

use std::sync::Arc;

use murmur_core::{
    ArtifactRegistry, Blackboard, EventBus, FleetConfig, SkillRegistry, ViewportBridge,
};
use murmur_memory::KnowledgeSidecar;
use murmur_runtime::DriverFactory;
use murmur_types::RiskApprovalRequired;
use tokio::sync::mpsc;

pub use graph::{GraphProgress, GraphState};
pub use mailbox::{
    AgentMsg, DispatcherHandle, DispatcherMsg, OrchestratorHandle, OrchestratorMsg, SubmitResult,
    SupervisorHandle, SupervisorMsg,
};

/// External collaborators handed to the fleet at boot.
pub struct FleetDeps {
    pub factory: Arc<dyn DriverFactory>,
    pub sidecar: KnowledgeSidecar,
    pub viewport: Arc<dyn ViewportBridge>,
    /// Shared event bus; a bridge built over the same bus sees fleet and
    /// viewport traffic in one feed
    pub events: EventBus,
    /// Where `RiskApprovalRequired` notifications for critical tasks go
    pub approver_tx: Option<mpsc::UnboundedSender<RiskApprovalRequired>>,
}

/// A running fleet: every actor spawned and wired, addressed by handles.
pub struct Fleet {
    pub orchestrator: OrchestratorHandle,
    pub dispatcher: DispatcherHandle,
    pub supervisor: SupervisorHandle,
    pub skills: SkillRegistry,
    pub artifacts: ArtifactRegistry,
    pub blackboard: Blackboard,
    pub events: EventBus,
}

impl Fleet {
    pub fn spawn(config: FleetConfig, deps: FleetDeps) -> Fleet {
        let config = Arc::new(config);
        let events = deps.events;
        let skills = SkillRegistry::spawn();
        let artifacts = ArtifactRegistry::spawn(events.clone());
        let blackboard = Blackboard::spawn(events.clone());

        let (orch_tx, orch_rx) = mpsc::unbounded_channel();
        let (disp_tx, disp_rx) = mpsc::unbounded_channel();
        let (sup_tx, sup_rx) = mpsc::unbounded_channel();
        let orchestrator = OrchestratorHandle { tx: orch_tx };
        let dispatcher = DispatcherHandle { tx: disp_tx };
        let supervisor = SupervisorHandle { tx: sup_tx };

        orchestrator::spawn(
            config.clone(),
            dispatcher.clone(),
            supervisor.clone(),
            events.clone(),
            deps.viewport.clone(),
            orch_rx,
            orchestrator.clone(),
        );
        dispatcher::spawn(
            config.clone(),
            skills.clone(),
            supervisor.clone(),
            orchestrator.clone(),
            events.clone(),
            deps.approver_tx,
            disp_rx,
            dispatcher.clone(),
        );
        supervisor::spawn(
            config,
            deps.factory,
            skills.clone(),
            artifacts.clone(),
            deps.sidecar,
            blackboard.clone(),
            deps.viewport,
            dispatcher.clone(),
            orchestrator.clone(),
            sup_rx,
            supervisor.clone(),
        );

        Fleet {
            orchestrator,
            dispatcher,
            supervisor,
            skills,
            artifacts,
            blackboard,
            events,
        }
    }
}
