// Artifact Types
// Content-addressable task outputs with provenance and validation history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of artifact produced by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    /// Code patch/diff
    Patch,
    /// Notes or documentation
    Notes,
    /// Research sources
    Sources,
    /// Generic file
    File,
}

impl Default for ArtifactType {
    fn default() -> Self {
        Self::File
    }
}

/// Where an artifact came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactProvenance {
    pub task_id: String,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub input_artifact_ids: Vec<String>,
}

/// One validator's verdict on an artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorResult {
    pub validator: String,
    pub passed: bool,
    #[serde(default)]
    pub feedback: String,
}

/// A produced output of a task.
///
/// `content_hash`, when present, participates in registry deduplication:
/// registering a second artifact with the same hash returns the first one's
/// id instead of creating a new entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    #[serde(default)]
    pub artifact_type: ArtifactType,
    #[serde(default)]
    pub format: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub provenance: ArtifactProvenance,
    #[serde(default)]
    pub validators: Vec<ValidatorResult>,
}
