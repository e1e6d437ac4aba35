// Mailboxes
// Typed message enums and cheap-to-clone sender handles for every actor in
// the fleet. One actor task per mailbox; handlers process exactly one
// message at a time, and all mutable state lives behind these channels.

use murmur_core::{MurmurError, Result};
use murmur_types::{
    AgentProfile, Bid, RiskApproved, RiskDenied, SubtasksCompleted, TaskAssigned, TaskAvailable,
    TaskCompleted, TaskDispatchRequest, TaskFailed, TaskGraph,
};
use tokio::sync::{mpsc, oneshot};

/// Synchronous reply to `Submit`.
#[derive(Debug, Clone)]
pub enum SubmitResult {
    Accepted {
        graph_id: String,
        node_count: usize,
        edge_count: usize,
    },
    Rejected {
        reason: String,
    },
}

impl SubmitResult {
    pub fn accepted(&self) -> bool {
        matches!(self, SubmitResult::Accepted { .. })
    }
}

#[derive(Debug)]
pub enum OrchestratorMsg {
    Submit {
        graph: TaskGraph,
        reply: oneshot::Sender<SubmitResult>,
    },
    TaskCompleted(TaskCompleted),
    TaskFailed(TaskFailed),
    /// Dispatcher confirmation that a task was awarded and assigned
    TaskReadyForDispatch {
        task_id: String,
        agent_id: String,
    },
    /// External resolution for a `UserDecision` stop condition
    UserDecision {
        parent_id: String,
    },
    GraphDeadline {
        graph_id: String,
    },
}

#[derive(Debug)]
pub enum DispatcherMsg {
    TaskRequest(TaskDispatchRequest),
    Bid(Bid),
    BidWindowExpired { task_id: String },
    RiskApproved(RiskApproved),
    RiskDenied(RiskDenied),
    RiskApprovalTimedOut { task_id: String },
}

#[derive(Debug)]
pub enum AgentMsg {
    TaskAvailable(TaskAvailable),
    TaskAwardedTo { task_id: String },
    TaskBidRejected { task_id: String },
    TaskAssigned(TaskAssigned),
    SubtasksCompleted(SubtasksCompleted),
    TaskDecompositionRejected { task_id: String, reason: String },
    /// Stop signal for one in-flight or queued task
    CancelTask { task_id: String },
    /// Raw line from the agent's runtime stream. The generation ties the
    /// line to the run that produced it, so output from an abandoned child
    /// cannot bleed into the next task.
    RuntimeLine { generation: u64, line: String },
    /// The runtime stream for the tagged run ended
    RuntimeStreamEnded { generation: u64 },
    /// A blackboard signal on one of the agent's subscribed keys
    Signal(murmur_core::Signal),
    /// Terminate the agent actor
    Stop,
}

#[derive(Debug)]
pub enum SupervisorMsg {
    SpawnAgent {
        profile: AgentProfile,
        reply: oneshot::Sender<Result<()>>,
    },
    StopAgent {
        agent_id: String,
    },
    Route {
        agent_id: String,
        message: AgentMsg,
    },
    ChildTerminated {
        agent_id: String,
    },
}

#[derive(Clone)]
pub struct OrchestratorHandle {
    pub(crate) tx: mpsc::UnboundedSender<OrchestratorMsg>,
}

impl OrchestratorHandle {
    pub async fn submit(&self, graph: TaskGraph) -> Result<SubmitResult> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(OrchestratorMsg::Submit { graph, reply })
            .map_err(|_| MurmurError::ChannelClosed("orchestrator".into()))?;
        rx.await
            .map_err(|_| MurmurError::ChannelClosed("orchestrator".into()))
    }

    pub fn task_completed(&self, message: TaskCompleted) {
        let _ = self.tx.send(OrchestratorMsg::TaskCompleted(message));
    }

    pub fn task_failed(&self, message: TaskFailed) {
        let _ = self.tx.send(OrchestratorMsg::TaskFailed(message));
    }

    pub fn user_decision(&self, parent_id: impl Into<String>) {
        let _ = self.tx.send(OrchestratorMsg::UserDecision {
            parent_id: parent_id.into(),
        });
    }

    pub(crate) fn send(&self, message: OrchestratorMsg) {
        let _ = self.tx.send(message);
    }
}

#[derive(Clone)]
pub struct DispatcherHandle {
    pub(crate) tx: mpsc::UnboundedSender<DispatcherMsg>,
}

impl DispatcherHandle {
    pub fn request(&self, request: TaskDispatchRequest) {
        let _ = self.tx.send(DispatcherMsg::TaskRequest(request));
    }

    pub fn bid(&self, bid: Bid) {
        let _ = self.tx.send(DispatcherMsg::Bid(bid));
    }

    pub fn risk_approved(&self, approval: RiskApproved) {
        let _ = self.tx.send(DispatcherMsg::RiskApproved(approval));
    }

    pub fn risk_denied(&self, denial: RiskDenied) {
        let _ = self.tx.send(DispatcherMsg::RiskDenied(denial));
    }

    pub(crate) fn send(&self, message: DispatcherMsg) {
        let _ = self.tx.send(message);
    }
}

#[derive(Clone)]
pub struct SupervisorHandle {
    pub(crate) tx: mpsc::UnboundedSender<SupervisorMsg>,
}

impl SupervisorHandle {
    pub async fn spawn_agent(&self, profile: AgentProfile) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SupervisorMsg::SpawnAgent { profile, reply })
            .map_err(|_| MurmurError::ChannelClosed("supervisor".into()))?;
        rx.await
            .map_err(|_| MurmurError::ChannelClosed("supervisor".into()))?
    }

    pub fn stop_agent(&self, agent_id: impl Into<String>) {
        let _ = self.tx.send(SupervisorMsg::StopAgent {
            agent_id: agent_id.into(),
        });
    }

    pub fn route(&self, agent_id: impl Into<String>, message: AgentMsg) {
        let _ = self.tx.send(SupervisorMsg::Route {
            agent_id: agent_id.into(),
            message,
        });
    }

    pub(crate) fn send(&self, message: SupervisorMsg) {
        let _ = self.tx.send(message);
    }
}
