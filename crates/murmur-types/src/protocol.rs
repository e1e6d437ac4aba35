// Normalized Protocol Events
// The lifecycle-event vocabulary the protocol adapter produces from raw
// runtime output lines.

use serde::{Deserialize, Serialize};

/// A normalized lifecycle event derived from one raw runtime line.
///
/// Ids are agent-scoped and monotonic: `<agent>-run-<N>`,
/// `<agent>-msg-<N>`, `<agent>-tc-<N>`; the thread id is `<agent>-thread`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    RunStarted { thread_id: String, run_id: String },
    TextMessageStart { message_id: String },
    TextMessageContent { message_id: String, delta: String },
    TextMessageEnd { message_id: String },
    ToolCallStart { call_id: String, name: String },
    ToolCallEnd { call_id: String },
    RunFinished { run_id: String },
}
