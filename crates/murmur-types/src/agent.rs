// Agent Types

use serde::{Deserialize, Serialize};

use crate::runtime::ModelSpec;

/// Visual metadata the viewport uses to render an agent. Advisory only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentVisual {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Static description of an agent: identity, capabilities, and how to build
/// its runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub visual: AgentVisual,
    /// Runtime catalog entry id; resolved case-insensitively
    pub runtime_id: String,
    /// Per-agent model override, merged over the catalog default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelSpec>,
    /// Maximum concurrently held tasks; the fleet default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    /// Blackboard keys this agent listens on; current values are folded
    /// into its task prompts
    #[serde(default)]
    pub blackboard_keys: Vec<String>,
}

/// Coarse activity classification of a running agent, derived from its
/// runtime output and published to the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Idle,
    Thinking,
    Typing,
    Reading,
    Waiting,
}

impl Default for ActivityState {
    fn default() -> Self {
        Self::Idle
    }
}
