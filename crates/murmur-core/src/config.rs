// Fleet Configuration
// Tunables for the orchestrator, dispatcher, and agents, with serde defaults
// carrying the documented numbers.

use std::path::Path;

use murmur_types::ActivityState;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration for an orchestration fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Maximum decomposition depth (root nodes are depth 0)
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Maximum subtasks in one decomposition proposal
    #[serde(default = "default_max_subtasks")]
    pub max_subtasks: usize,
    /// Maximum total nodes a graph may grow to
    #[serde(default = "default_max_total_nodes")]
    pub max_total_nodes: usize,
    /// Auction window before bids are ranked
    #[serde(default = "default_bid_window_ms")]
    pub bid_window_ms: u64,
    /// How long a critical-risk award waits for approval
    #[serde(default = "default_risk_approval_timeout_secs")]
    pub risk_approval_timeout_secs: u64,
    /// The only source whose risk approvals are honored
    #[serde(default = "default_approver_id")]
    pub approver_id: String,
    /// Bound on the pre-task knowledge retrieval
    #[serde(default = "default_knowledge_timeout_secs")]
    pub knowledge_timeout_secs: u64,
    /// Concurrent tasks an agent will hold unless its profile overrides
    #[serde(default = "default_agent_capacity")]
    pub agent_capacity: u32,
    /// Secondary bid gate; historical success rate must reach this
    #[serde(default = "default_affinity_threshold")]
    pub affinity_threshold: f64,
    /// Duration estimate used until an agent has its own history
    #[serde(default = "default_estimated_duration_ms")]
    pub default_estimated_duration_ms: u64,
    #[serde(default)]
    pub activity_keywords: ActivityKeywords,
}

fn default_max_depth() -> u32 {
    3
}
fn default_max_subtasks() -> usize {
    10
}
fn default_max_total_nodes() -> usize {
    100
}
fn default_bid_window_ms() -> u64 {
    250
}
fn default_risk_approval_timeout_secs() -> u64 {
    60
}
fn default_approver_id() -> String {
    "user".to_string()
}
fn default_knowledge_timeout_secs() -> u64 {
    5
}
fn default_agent_capacity() -> u32 {
    1
}
fn default_affinity_threshold() -> f64 {
    0.5
}
fn default_estimated_duration_ms() -> u64 {
    60_000
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_subtasks: default_max_subtasks(),
            max_total_nodes: default_max_total_nodes(),
            bid_window_ms: default_bid_window_ms(),
            risk_approval_timeout_secs: default_risk_approval_timeout_secs(),
            approver_id: default_approver_id(),
            knowledge_timeout_secs: default_knowledge_timeout_secs(),
            agent_capacity: default_agent_capacity(),
            affinity_threshold: default_affinity_threshold(),
            default_estimated_duration_ms: default_estimated_duration_ms(),
            activity_keywords: ActivityKeywords::default(),
        }
    }
}

impl FleetConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// Keyword sets for classifying a runtime output line into an activity
/// state. The sets are data, not code, so deployments can tune them per
/// runtime without a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityKeywords {
    #[serde(default = "default_typing_keywords")]
    pub typing: Vec<String>,
    #[serde(default = "default_reading_keywords")]
    pub reading: Vec<String>,
    #[serde(default = "default_thinking_keywords")]
    pub thinking: Vec<String>,
    #[serde(default = "default_waiting_keywords")]
    pub waiting: Vec<String>,
}

fn default_typing_keywords() -> Vec<String> {
    ["write", "edit", "bash"].map(String::from).to_vec()
}
fn default_reading_keywords() -> Vec<String> {
    ["read", "grep", "find", "ls"].map(String::from).to_vec()
}
fn default_thinking_keywords() -> Vec<String> {
    vec!["thinking".to_string()]
}
fn default_waiting_keywords() -> Vec<String> {
    vec!["waiting".to_string()]
}

impl Default for ActivityKeywords {
    fn default() -> Self {
        Self {
            typing: default_typing_keywords(),
            reading: default_reading_keywords(),
            thinking: default_thinking_keywords(),
            waiting: default_waiting_keywords(),
        }
    }
}

impl ActivityKeywords {
    /// Classify a raw runtime line. First matching set wins, in the order
    /// typing, reading, thinking, waiting; anything else is `Idle`.
    pub fn classify(&self, line: &str) -> ActivityState {
        let lower = line.to_lowercase();
        let hit = |set: &[String]| set.iter().any(|kw| lower.contains(kw.as_str()));
        if hit(&self.typing) {
            ActivityState::Typing
        } else if hit(&self.reading) {
            ActivityState::Reading
        } else if hit(&self.thinking) {
            ActivityState::Thinking
        } else if hit(&self.waiting) {
            ActivityState::Waiting
        } else {
            ActivityState::Idle
        }
    }
}
