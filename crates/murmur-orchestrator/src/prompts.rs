// Agent Prompt Templates & Output Parsing
// Builds the prompts fed to runtime subprocesses and scrapes structured
// directives (decomposition proposals, artifact declarations, exit records)
// back out of their line output.

use murmur_types::{ProposedSubplan, SubtaskResult};
use serde::Deserialize;

pub struct AgentPrompts;

impl AgentPrompts {
    /// Compose the execution prompt: retrieved-context preamble (possibly
    /// empty) followed by the task description.
    pub fn compose_task_prompt(context_preamble: &str, description: &str) -> String {
        if context_preamble.is_empty() {
            description.to_string()
        } else {
            format!("{context_preamble}## Task\n{description}")
        }
    }

    /// Re-prompt for the synthesis phase with the collated child outputs.
    pub fn build_synthesis_prompt(description: &str, results: &[SubtaskResult]) -> String {
        let mut prompt = format!(
            "## Original task\n{description}\n\n## Subtask results\n"
        );
        for result in results {
            prompt.push_str(&format!(
                "- {} [{}]: {}\n",
                result.task_id,
                if result.success { "ok" } else { "failed" },
                result.summary.trim()
            ));
        }
        prompt.push_str(
            "\nSynthesize these results into the final answer for the original task.",
        );
        prompt
    }
}

#[derive(Deserialize)]
struct SubplanWrapper {
    decompose: ProposedSubplan,
}

/// Extract a decomposition proposal from collected runtime output.
///
/// Accepts either a bare `ProposedSubplan` object or one wrapped as
/// `{"decompose": {...}}`, scanning code fences and brace-delimited
/// candidates the same way validator output is scraped.
pub fn parse_subplan(output: &str) -> Option<ProposedSubplan> {
    for candidate in json_candidates(output) {
        if let Ok(wrapper) = serde_json::from_str::<SubplanWrapper>(&candidate) {
            return Some(wrapper.decompose);
        }
        if candidate.contains("\"subtasks\"") {
            if let Ok(subplan) = serde_json::from_str::<ProposedSubplan>(&candidate) {
                return Some(subplan);
            }
        }
    }
    None
}

/// Candidate JSON substrings of model output: the whole trimmed text,
/// fenced ```json blocks, and the outermost brace span.
fn json_candidates(output: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let trimmed = output.trim();
    if !trimmed.is_empty() {
        candidates.push(trimmed.to_string());
    }

    let mut rest = output;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        if let Some(end) = after[body_start..].find("```") {
            candidates.push(after[body_start..body_start + end].trim().to_string());
            rest = &after[body_start + end + 3..];
        } else {
            break;
        }
    }

    if let (Some(open), Some(close)) = (output.find('{'), output.rfind('}')) {
        if open < close {
            candidates.push(output[open..=close].to_string());
        }
    }
    candidates
}

/// An artifact declaration emitted by a runtime as a single line:
/// `{"artifact": {"uri": ..., "type": ..., "format": ..., "content_hash": ...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactDecl {
    pub uri: String,
    #[serde(default)]
    pub artifact_type: Option<murmur_types::ArtifactType>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub content_hash: Option<String>,
}

#[derive(Deserialize)]
struct ArtifactWrapper {
    artifact: ArtifactDecl,
}

pub fn parse_artifact_line(line: &str) -> Option<ArtifactDecl> {
    if !line.contains("\"artifact\"") {
        return None;
    }
    serde_json::from_str::<ArtifactWrapper>(line.trim())
        .ok()
        .map(|wrapper| wrapper.artifact)
}

/// Success/failure of a run, read off its explicit exit record when one was
/// printed. `None` when the line is not an exit record.
pub fn exit_line_success(line: &str) -> Option<bool> {
    if !line.contains("\"type\":\"result\"") {
        return None;
    }
    let failed = line.contains("\"is_error\":true") || line.contains("\"subtype\":\"error\"");
    Some(!failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_types::StopCondition;

    #[test]
    fn parse_subplan_from_wrapped_json() {
        let output = r#"{"decompose":{"reason":"parallelize","subtasks":[
            {"description":"first"},
            {"description":"second","depends_on":[0]}
        ],"stop_condition":"first_success"}}"#;
        let subplan = parse_subplan(output).unwrap();
        assert_eq!(subplan.subtasks.len(), 2);
        assert_eq!(subplan.subtasks[1].depends_on, vec![0]);
        assert_eq!(subplan.stop_condition, Some(StopCondition::FirstSuccess));
    }

    #[test]
    fn parse_subplan_from_fenced_block() {
        let output = "Here is my plan:\n```json\n{\"decompose\":{\"subtasks\":[{\"description\":\"only\"}]}}\n```\ndone";
        let subplan = parse_subplan(output).unwrap();
        assert_eq!(subplan.subtasks.len(), 1);
    }

    #[test]
    fn plain_output_has_no_subplan() {
        assert!(parse_subplan("I finished the refactor, all tests pass.").is_none());
        assert!(parse_subplan("").is_none());
    }

    #[test]
    fn parse_artifact_declaration() {
        let decl = parse_artifact_line(
            r#"{"artifact":{"uri":"file://patch.diff","artifact_type":"patch","content_hash":"abc"}}"#,
        )
        .unwrap();
        assert_eq!(decl.uri, "file://patch.diff");
        assert_eq!(decl.content_hash.as_deref(), Some("abc"));
    }

    #[test]
    fn artifact_parse_ignores_ordinary_lines() {
        assert!(parse_artifact_line("just some text").is_none());
        assert!(parse_artifact_line(r#"{"artifact": 12}"#).is_none());
    }

    #[test]
    fn exit_record_success_and_failure() {
        assert_eq!(
            exit_line_success(r#"{"type":"result","subtype":"success"}"#),
            Some(true)
        );
        assert_eq!(
            exit_line_success(r#"{"type":"result","subtype":"error","is_error":true}"#),
            Some(false)
        );
        assert_eq!(exit_line_success("plain text"), None);
    }

    #[test]
    fn synthesis_prompt_lists_child_results() {
        let prompt = AgentPrompts::build_synthesis_prompt(
            "build the feature",
            &[
                SubtaskResult {
                    task_id: "t1/sub-0".to_string(),
                    success: true,
                    summary: "did half".to_string(),
                },
                SubtaskResult {
                    task_id: "t1/sub-1".to_string(),
                    success: false,
                    summary: "gave up".to_string(),
                },
            ],
        );
        assert!(prompt.contains("t1/sub-0 [ok]: did half"));
        assert!(prompt.contains("t1/sub-1 [failed]: gave up"));
    }
}
