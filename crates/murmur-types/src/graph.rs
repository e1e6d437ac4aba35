// Task Graph Types
// Core type definitions for graph submission and per-node state

use serde::{Deserialize, Serialize};

/// Status of a node in the task graph.
///
/// Terminal statuses (`Completed`, `Failed`, `Cancelled`) are never left
/// again. `WaitingForSubtasks` and `Synthesizing` are only reachable from
/// `Dispatched`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies
    Pending,
    /// Dependencies satisfied, awaiting an award
    Ready,
    /// Awarded to an agent and executing
    Dispatched,
    /// Decomposed; waiting for its subtasks
    WaitingForSubtasks,
    /// Subtasks done; parent is producing the rolled-up result
    Synthesizing,
    /// Finished successfully
    Completed,
    /// Finished unsuccessfully
    Failed,
    /// Cancelled before or during execution
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Risk level attached to a task budget. `Critical` tasks require an external
/// approval before the dispatcher may award them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Normal
    }
}

/// Optional per-task or graph-wide budget.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskBudget {
    /// Deadline, in milliseconds from dispatch (or submission, graph-wide)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    /// Token cap for the task's runtime calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub risk: RiskLevel,
}

impl TaskBudget {
    pub fn risk(budget: Option<&TaskBudget>) -> RiskLevel {
        budget.map(|b| b.risk).unwrap_or_default()
    }
}

/// A single node in a submitted task graph.
///
/// Submission only requires `id` and `description`; the remaining fields
/// default and are managed by the orchestrator after acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    /// Unique within its graph
    pub id: String,
    pub description: String,
    /// Capability tags an executor must cover
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<TaskBudget>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Decomposition depth: root nodes are 0, subtasks inherit parent + 1
    #[serde(default)]
    pub depth: u32,
}

impl TaskNode {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            required_capabilities: Vec::new(),
            budget: None,
            status: TaskStatus::Pending,
            depth: 0,
        }
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_budget(mut self, budget: TaskBudget) -> Self {
        self.budget = Some(budget);
        self
    }
}

/// A directed dependency: `to` cannot become ready until `from` completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEdge {
    pub from: String,
    pub to: String,
}

impl TaskEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// A DAG of tasks submitted as one unit. Lives for one process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraph {
    /// Generated at submission when empty
    #[serde(default)]
    pub id: String,
    pub nodes: Vec<TaskNode>,
    #[serde(default)]
    pub edges: Vec<TaskEdge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<TaskBudget>,
}

/// What ends a decomposed parent's wait on its subtasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCondition {
    /// Wait for every sibling to reach a terminal status (the default)
    AllSubtasksComplete,
    /// First successful sibling wins; the rest are cancelled
    FirstSuccess,
    /// Hold for an explicit external decision, then behave as
    /// `AllSubtasksComplete`
    UserDecision,
}

impl Default for StopCondition {
    fn default() -> Self {
        Self::AllSubtasksComplete
    }
}

/// One proposed subtask inside a decomposition proposal.
///
/// `depends_on` holds indices into the same proposal list and may only
/// reference earlier positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub description: String,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<TaskBudget>,
}

/// A runtime decomposition proposal attached to a task completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedSubplan {
    /// Why the executing agent wants to split the task
    #[serde(default)]
    pub reason: String,
    pub subtasks: Vec<SubtaskSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_condition: Option<StopCondition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Dispatched.is_terminal());
        assert!(!TaskStatus::WaitingForSubtasks.is_terminal());
    }

    #[test]
    fn graph_deserializes_with_defaults() {
        let graph: TaskGraph = serde_json::from_str(
            r#"{"nodes":[{"id":"t1","description":"do a thing"}]}"#,
        )
        .unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].status, TaskStatus::Pending);
        assert!(graph.edges.is_empty());
        assert!(graph.id.is_empty());
    }

    #[test]
    fn risk_defaults_to_normal() {
        let budget: TaskBudget = serde_json::from_str(r#"{"deadline_ms":1000}"#).unwrap();
        assert_eq!(budget.risk, RiskLevel::Normal);
        assert_eq!(TaskBudget::risk(None), RiskLevel::Normal);
    }
}
