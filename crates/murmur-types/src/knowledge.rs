// Knowledge Sidecar Shapes
// JSON records exchanged with the external memory-sidecar process.

use serde::{Deserialize, Serialize};

/// One retrieved memory entry from `memory-sidecar query --json-output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub content: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_at: Option<String>,
    #[serde(default)]
    pub relevance: f64,
}

/// One code-search hit from `memory-sidecar search --json-output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSearchHit {
    pub filename: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub score: f64,
}
