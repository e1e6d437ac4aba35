// Protocol Adapter
// Stateful per-agent mapper from raw runtime output lines to the normalized
// lifecycle-event stream. The matching is deliberately substring-based for
// compatibility with line-oriented agent CLIs; swap in a structured parser
// behind `signals_*`/`extract_tool_name` when a runtime offers one.

use murmur_types::ProtocolEvent;

/// Marks a tool invocation in raw output.
const TOOL_USE_MARKER: &str = "tool_use";
/// Marks a tool result in raw output.
const TOOL_RESULT_MARKER: &str = "tool_result";
/// Marks the runtime's explicit end-of-run record.
const EXIT_MARKER: &str = "\"type\":\"result\"";

fn signals_tool_use(line: &str) -> bool {
    line.contains(TOOL_USE_MARKER) && !line.contains(TOOL_RESULT_MARKER)
}

fn signals_tool_result(line: &str) -> bool {
    line.contains(TOOL_RESULT_MARKER)
}

fn signals_exit(line: &str) -> bool {
    line.contains(EXIT_MARKER)
}

/// Pull the tool name out of a raw tool-invocation line: the first quoted
/// value of a `"name"` field after the marker. Returns `None` when the line
/// does not carry one; callers fall back to `unknown_tool`.
pub fn extract_tool_name(line: &str) -> Option<String> {
    let marker = line.find(TOOL_USE_MARKER)?;
    let rest = &line[marker..];
    let key = rest.find("\"name\"")?;
    let after_key = &rest[key + "\"name\"".len()..];
    let colon = after_key.find(':')?;
    let after_colon = after_key[colon + 1..].trim_start();
    let value = after_colon.strip_prefix('"')?;
    let end = value.find('"')?;
    Some(value[..end].to_string())
}

/// Stateful adapter for one agent's runtime output.
pub struct ProtocolAdapter {
    agent_id: String,
    run_counter: u64,
    message_counter: u64,
    tool_counter: u64,
    active_run: Option<String>,
    active_message: Option<String>,
    active_tool_call: Option<String>,
}

impl ProtocolAdapter {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            run_counter: 0,
            message_counter: 0,
            tool_counter: 0,
            active_run: None,
            active_message: None,
            active_tool_call: None,
        }
    }

    pub fn run_active(&self) -> bool {
        self.active_run.is_some()
    }

    /// Map one raw line to zero or more normalized events.
    pub fn process_line(&mut self, line: &str) -> Vec<ProtocolEvent> {
        let mut out = Vec::new();

        let tool_use = signals_tool_use(line);
        let tool_result = signals_tool_result(line) && self.active_tool_call.is_some();
        let exit = signals_exit(line);
        let suppressed = line.trim().is_empty() || line.contains("thinking");

        // Suppressed lines never start a run; marker lines always count.
        if suppressed && !tool_use && !tool_result && !exit {
            return out;
        }

        if self.active_run.is_none() {
            if exit || tool_result {
                // Nothing to finish or close.
                return out;
            }
            self.run_counter += 1;
            let run_id = format!("{}-run-{}", self.agent_id, self.run_counter);
            out.push(ProtocolEvent::RunStarted {
                thread_id: format!("{}-thread", self.agent_id),
                run_id: run_id.clone(),
            });
            self.active_run = Some(run_id);
        }

        if tool_use {
            self.end_active_message(&mut out);
            self.tool_counter += 1;
            let call_id = format!("{}-tc-{}", self.agent_id, self.tool_counter);
            let name = extract_tool_name(line).unwrap_or_else(|| "unknown_tool".to_string());
            out.push(ProtocolEvent::ToolCallStart {
                call_id: call_id.clone(),
                name,
            });
            self.active_tool_call = Some(call_id);
            return out;
        }

        if tool_result {
            if let Some(call_id) = self.active_tool_call.take() {
                out.push(ProtocolEvent::ToolCallEnd { call_id });
            }
            return out;
        }

        if exit {
            self.end_active_message(&mut out);
            self.end_active_tool_call(&mut out);
            if let Some(run_id) = self.active_run.take() {
                out.push(ProtocolEvent::RunFinished { run_id });
            }
            return out;
        }

        // Tool output is not surfaced as message text.
        if self.active_tool_call.is_some() {
            return out;
        }

        if self.active_message.is_none() {
            self.message_counter += 1;
            let message_id = format!("{}-msg-{}", self.agent_id, self.message_counter);
            out.push(ProtocolEvent::TextMessageStart {
                message_id: message_id.clone(),
            });
            self.active_message = Some(message_id);
        }
        out.push(ProtocolEvent::TextMessageContent {
            message_id: self.active_message.clone().unwrap_or_default(),
            delta: line.to_string(),
        });
        out
    }

    /// Close out whatever is still open when the underlying stream ends
    /// without an explicit exit record.
    pub fn finish(&mut self) -> Vec<ProtocolEvent> {
        let mut out = Vec::new();
        self.end_active_message(&mut out);
        self.end_active_tool_call(&mut out);
        if let Some(run_id) = self.active_run.take() {
            out.push(ProtocolEvent::RunFinished { run_id });
        }
        out
    }

    fn end_active_message(&mut self, out: &mut Vec<ProtocolEvent>) {
        if let Some(message_id) = self.active_message.take() {
            out.push(ProtocolEvent::TextMessageEnd { message_id });
        }
    }

    fn end_active_tool_call(&mut self, out: &mut Vec<ProtocolEvent>) {
        if let Some(call_id) = self.active_tool_call.take() {
            out.push(ProtocolEvent::ToolCallEnd { call_id });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(adapter: &mut ProtocolAdapter, lines: &[&str]) -> Vec<ProtocolEvent> {
        lines
            .iter()
            .flat_map(|line| adapter.process_line(line))
            .collect()
    }

    #[test]
    fn first_text_line_starts_run_and_message() {
        let mut adapter = ProtocolAdapter::new("a1");
        let events = adapter.process_line("hello");
        assert!(matches!(
            &events[0],
            ProtocolEvent::RunStarted { thread_id, run_id }
                if thread_id == "a1-thread" && run_id == "a1-run-1"
        ));
        assert!(matches!(&events[1], ProtocolEvent::TextMessageStart { .. }));
        assert!(matches!(
            &events[2],
            ProtocolEvent::TextMessageContent { delta, .. } if delta == "hello"
        ));
    }

    #[test]
    fn whitespace_and_thinking_are_suppressed() {
        let mut adapter = ProtocolAdapter::new("a1");
        assert!(adapter.process_line("   ").is_empty());
        assert!(adapter.process_line("thinking hard...").is_empty());
        assert!(!adapter.run_active());
    }

    #[test]
    fn tool_use_ends_message_and_opens_call() {
        let mut adapter = ProtocolAdapter::new("a1");
        let events = feed(
            &mut adapter,
            &["some text", r#"{"type":"tool_use","name":"bash","input":{}}"#],
        );
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                ProtocolEvent::RunStarted { .. } => "run_started",
                ProtocolEvent::TextMessageStart { .. } => "msg_start",
                ProtocolEvent::TextMessageContent { .. } => "msg_content",
                ProtocolEvent::TextMessageEnd { .. } => "msg_end",
                ProtocolEvent::ToolCallStart { .. } => "tool_start",
                ProtocolEvent::ToolCallEnd { .. } => "tool_end",
                ProtocolEvent::RunFinished { .. } => "run_finished",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["run_started", "msg_start", "msg_content", "msg_end", "tool_start"]
        );
        if let ProtocolEvent::ToolCallStart { name, call_id } = &events[4] {
            assert_eq!(name, "bash");
            assert_eq!(call_id, "a1-tc-1");
        } else {
            panic!("expected tool call start");
        }
    }

    #[test]
    fn tool_output_is_suppressed_until_result() {
        let mut adapter = ProtocolAdapter::new("a1");
        adapter.process_line(r#"{"type":"tool_use","name":"grep"}"#);
        assert!(adapter.process_line("raw tool output").is_empty());
        let events = adapter.process_line(r#"{"type":"tool_result","ok":true}"#);
        assert!(matches!(&events[0], ProtocolEvent::ToolCallEnd { .. }));
        // Text flows again after the call closes.
        let events = adapter.process_line("done");
        assert!(matches!(&events[0], ProtocolEvent::TextMessageStart { .. }));
    }

    #[test]
    fn missing_tool_name_defaults() {
        let mut adapter = ProtocolAdapter::new("a1");
        let events = adapter.process_line(r#"{"type":"tool_use","input":{}}"#);
        assert!(events.iter().any(|e| matches!(
            e,
            ProtocolEvent::ToolCallStart { name, .. } if name == "unknown_tool"
        )));
    }

    #[test]
    fn exit_closes_everything_and_next_line_starts_fresh_run() {
        let mut adapter = ProtocolAdapter::new("a1");
        adapter.process_line("text");
        let events = adapter.process_line(r#"{"type":"result","subtype":"success"}"#);
        assert!(matches!(
            events.last().unwrap(),
            ProtocolEvent::RunFinished { run_id } if run_id == "a1-run-1"
        ));

        let events = adapter.process_line("second run text");
        assert!(matches!(
            &events[0],
            ProtocolEvent::RunStarted { run_id, .. } if run_id == "a1-run-2"
        ));
    }

    #[test]
    fn stray_tool_result_without_active_call_is_plain_text() {
        let mut adapter = ProtocolAdapter::new("a1");
        let events = adapter.process_line(r#"late tool_result arrived"#);
        assert!(events
            .iter()
            .any(|e| matches!(e, ProtocolEvent::TextMessageContent { .. })));
    }

    #[test]
    fn text_round_trips_between_message_boundaries() {
        let lines = ["alpha", "beta", "", "thinking...", "gamma"];
        let mut adapter = ProtocolAdapter::new("a1");
        let mut events: Vec<ProtocolEvent> =
            lines.iter().flat_map(|l| adapter.process_line(l)).collect();
        events.extend(adapter.finish());

        let reconstructed: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                ProtocolEvent::TextMessageContent { delta, .. } => Some(delta.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(reconstructed, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn extract_tool_name_happy_path() {
        assert_eq!(
            extract_tool_name(r#"{"type":"tool_use","name":"write_file","input":{}}"#).as_deref(),
            Some("write_file")
        );
    }

    #[test]
    fn extract_tool_name_requires_marker() {
        assert!(extract_tool_name(r#"{"name":"write_file"}"#).is_none());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn extract_never_panics(line in ".*") {
            let _ = extract_tool_name(&line);
        }

        #[test]
        fn extract_finds_constructed_names(name in "[a-z_][a-z0-9_]{0,30}") {
            let line = format!(r#"{{"type":"tool_use","name":"{name}","input":{{}}}}"#);
            let extracted = extract_tool_name(&line);
            prop_assert_eq!(extracted.as_deref(), Some(name.as_str()));
        }

        #[test]
        fn adapter_never_panics_on_arbitrary_lines(lines in proptest::collection::vec(".*", 0..24)) {
            let mut adapter = ProtocolAdapter::new("a1");
            for line in &lines {
                let _ = adapter.process_line(line);
            }
            let _ = adapter.finish();
        }
    }
}
