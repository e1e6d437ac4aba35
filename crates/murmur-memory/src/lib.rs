// Knowledge Sidecar Client
// Talks to the external memory-sidecar binary over one-shot CLI invocations.
// Retrieval degrades to empty results on any failure; storage is
// loss-tolerant fire-and-forget. The core never blocks on the sidecar beyond
// the configured retrieval timeout.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use murmur_types::{CodeSearchHit, KnowledgeEntry};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// How the sidecar binary is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSidecarConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    /// Bound on `query`; `store` is not awaited at all
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
}

fn default_executable() -> String {
    "memory-sidecar".to_string()
}
fn default_timeout_secs() -> u64 {
    5
}
fn default_top_k() -> u32 {
    5
}

impl Default for KnowledgeSidecarConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            timeout_secs: default_timeout_secs(),
            top_k: default_top_k(),
        }
    }
}

/// Shared handle to the sidecar. Cheap to clone; invocations are
/// independent child processes and the sidecar serializes internally.
#[derive(Clone)]
pub struct KnowledgeSidecar {
    config: Arc<KnowledgeSidecarConfig>,
}

impl KnowledgeSidecar {
    pub fn new(config: KnowledgeSidecarConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Retrieve memories relevant to a task description. Timeouts, non-zero
    /// exits, and malformed JSON all degrade to an empty result.
    pub async fn query(&self, agent_id: &str, text: &str) -> Vec<KnowledgeEntry> {
        let top_k = self.config.top_k.to_string();
        let args = [
            "query",
            text,
            "--agent",
            agent_id,
            "--top-k",
            &top_k,
            "--json-output",
        ];
        match self.invoke(&args).await {
            Ok(stdout) => parse_knowledge_entries(&stdout),
            Err(reason) => {
                tracing::warn!("knowledge query degraded to empty: {reason}");
                Vec::new()
            }
        }
    }

    /// Store an outcome summary. Fire-and-forget: the child is detached and
    /// failures are only logged.
    pub fn store(&self, agent_id: &str, content: &str, category: &str, tags: &[(String, String)]) {
        let config = self.config.clone();
        let mut args: Vec<String> = vec![
            "store".into(),
            content.into(),
            "--agent".into(),
            agent_id.into(),
            "--category".into(),
            category.into(),
        ];
        for (key, value) in tags {
            args.push("--tag".into());
            args.push(format!("{key}:{value}"));
        }
        tokio::spawn(async move {
            let output = Command::new(&config.executable)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .output()
                .await;
            match output {
                Ok(output) if output.status.success() => {}
                Ok(output) => {
                    tracing::debug!("knowledge store exited with {}", output.status);
                }
                Err(e) => {
                    tracing::debug!("knowledge store failed to spawn: {e}");
                }
            }
        });
    }

    /// Full-text code search, same degradation policy as `query`.
    pub async fn search(&self, text: &str) -> Vec<CodeSearchHit> {
        match self.invoke(&["search", text, "--json-output"]).await {
            Ok(stdout) => parse_search_hits(&stdout),
            Err(reason) => {
                tracing::warn!("code search degraded to empty: {reason}");
                Vec::new()
            }
        }
    }

    async fn invoke(&self, args: &[&str]) -> std::result::Result<String, String> {
        let child = Command::new(&self.config.executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output();

        let output = tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), child)
            .await
            .map_err(|_| format!("sidecar timed out after {}s", self.config.timeout_secs))?
            .map_err(|e| format!("sidecar spawn failed: {e}"))?;

        if !output.status.success() {
            return Err(format!("sidecar exited with {}", output.status));
        }
        String::from_utf8(output.stdout).map_err(|e| format!("sidecar output not utf-8: {e}"))
    }
}

fn parse_knowledge_entries(stdout: &str) -> Vec<KnowledgeEntry> {
    match serde_json::from_str(stdout.trim()) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("invalid knowledge JSON treated as empty: {e}");
            Vec::new()
        }
    }
}

fn parse_search_hits(stdout: &str) -> Vec<CodeSearchHit> {
    match serde_json::from_str(stdout.trim()) {
        Ok(hits) => hits,
        Err(e) => {
            tracing::warn!("invalid search JSON treated as empty: {e}");
            Vec::new()
        }
    }
}

/// Format retrieved entries as the context preamble prepended to a task
/// prompt. Empty retrievals produce an empty preamble so the task reads
/// exactly as submitted.
pub fn format_context_preamble(entries: &[KnowledgeEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }
    let mut preamble = String::from("## Relevant prior knowledge\n");
    for entry in entries {
        preamble.push_str(&format!(
            "- [{}] {}\n",
            if entry.category.is_empty() {
                "general"
            } else {
                &entry.category
            },
            entry.content.trim()
        ));
    }
    preamble.push('\n');
    preamble
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_entries_tolerates_garbage() {
        assert!(parse_knowledge_entries("not json").is_empty());
        assert!(parse_knowledge_entries("").is_empty());
    }

    #[test]
    fn parse_entries_reads_sidecar_shape() {
        let entries = parse_knowledge_entries(
            r#"[{"content":"use tokio for IO","category":"outcome","tags":["lang:rust"],"stored_at":"2026-01-01T00:00:00Z","relevance":0.92}]"#,
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].category, "outcome");
        assert!(entries[0].relevance > 0.9);
    }

    #[test]
    fn parse_hits_reads_sidecar_shape() {
        let hits = parse_search_hits(
            r#"[{"filename":"src/lib.rs","location":"12","language":"rust","code":"fn main() {}","score":1.5}]"#,
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "src/lib.rs");
    }

    #[test]
    fn preamble_is_empty_for_no_entries() {
        assert!(format_context_preamble(&[]).is_empty());
    }

    #[test]
    fn preamble_lists_entries_with_categories() {
        let entries = parse_knowledge_entries(
            r#"[{"content":"prefer small diffs","category":"feedback"}]"#,
        );
        let preamble = format_context_preamble(&entries);
        assert!(preamble.contains("[feedback] prefer small diffs"));
    }

    #[tokio::test]
    async fn missing_binary_degrades_to_empty() {
        let sidecar = KnowledgeSidecar::new(KnowledgeSidecarConfig {
            executable: "definitely-not-a-real-binary-9f2c".to_string(),
            timeout_secs: 1,
            top_k: 3,
        });
        assert!(sidecar.query("a1", "anything").await.is_empty());
        assert!(sidecar.search("anything").await.is_empty());
    }
}
