// Message Records
// Plain-data records exchanged between the orchestrator, dispatcher, and
// agents. Actor mailboxes wrap these; the records themselves carry no
// references, only values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::graph::{ProposedSubplan, RiskLevel, TaskBudget};

/// Orchestrator → dispatcher: run an auction for a ready task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDispatchRequest {
    pub graph_id: String,
    pub task_id: String,
    pub description: String,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<TaskBudget>,
    /// Per-request bid window override, milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_window_ms: Option<u64>,
}

/// Dispatcher → capable agents: a task is up for auction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAvailable {
    pub task_id: String,
    pub description: String,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    pub bid_window_ms: u64,
}

/// Agent → dispatcher: a self-assessment offer to execute a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub task_id: String,
    pub agent_id: String,
    /// Capability fit in [0, 1]
    pub fitness: f64,
    pub active_task_count: u32,
    pub estimated_duration_ms: u64,
    pub estimated_tokens: u64,
}

/// Dispatcher → winning agent: the assignment carrying the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssigned {
    pub graph_id: String,
    pub task_id: String,
    pub description: String,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<TaskBudget>,
}

/// Agent → orchestrator: terminal (or decomposing) outcome of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompleted {
    pub task_id: String,
    pub agent_id: String,
    pub success: bool,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subplan: Option<ProposedSubplan>,
}

/// Failure record, produced by agents and by the dispatcher itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailed {
    pub task_id: String,
    pub reason: String,
    #[serde(default)]
    pub unmet_capabilities: Vec<String>,
}

/// Orchestrator → decomposing agent: all subtask results, time to synthesize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtasksCompleted {
    pub parent_id: String,
    pub results: Vec<SubtaskResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskResult {
    pub task_id: String,
    pub success: bool,
    #[serde(default)]
    pub summary: String,
}

/// Orchestrator → submitter/viewport: the graph reached a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraphCompleted {
    pub graph_id: String,
    /// `true` only for `Completed`; `Failed` and `Cancelled` map to `false`
    pub results: BTreeMap<String, bool>,
}

/// Dispatcher → approver channel: a critical-risk award is on hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskApprovalRequired {
    pub task_id: String,
    pub risk: RiskLevel,
    pub description: String,
}

/// Approver → dispatcher. Only honored when `approver` matches the
/// configured approver id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskApproved {
    pub task_id: String,
    pub approver: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDenied {
    pub task_id: String,
    pub approver: String,
    #[serde(default)]
    pub reason: String,
}
