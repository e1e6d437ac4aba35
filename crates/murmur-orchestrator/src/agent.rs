// Agent Actor
// Per-agent state machine: evaluates task offers, bids, pulls prior context,
// drives its runtime subprocess through the protocol adapter, reports
// outcomes (optionally carrying a decomposition proposal), and re-prompts
// for synthesis when its subtasks settle.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use murmur_core::{ArtifactRegistry, Blackboard, FleetConfig, ViewportBridge};
use murmur_memory::{format_context_preamble, KnowledgeSidecar};
use murmur_runtime::{ProtocolAdapter, RuntimeDriver};
use murmur_types::{
    AgentProfile, Artifact, ArtifactProvenance, Bid, ProtocolEvent, SubtasksCompleted,
    TaskAssigned, TaskAvailable, TaskCompleted, TaskFailed,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::mailbox::{AgentMsg, DispatcherHandle, OrchestratorHandle};
use crate::prompts::{
    exit_line_success, parse_artifact_line, parse_subplan, AgentPrompts,
};

enum WorkItem {
    Execute(TaskAssigned),
    Synthesize(SubtasksCompleted),
}

impl WorkItem {
    fn task_id(&self) -> &str {
        match self {
            WorkItem::Execute(assignment) => &assignment.task_id,
            WorkItem::Synthesize(request) => &request.parent_id,
        }
    }
}

enum WorkKind {
    Execute,
    Synthesize,
}

struct CurrentWork {
    task_id: String,
    kind: WorkKind,
    assignment: Option<TaskAssigned>,
    caps_key: String,
    started: Instant,
    output: String,
    artifacts: Vec<Artifact>,
    exit_success: Option<bool>,
}

struct PendingSynthesis {
    assignment: TaskAssigned,
    output: String,
}

#[derive(Default)]
struct CapabilityHistory {
    durations_ms: Vec<u64>,
    tokens: Vec<u64>,
}

pub(crate) struct Agent {
    profile: AgentProfile,
    config: Arc<FleetConfig>,
    capabilities: HashSet<String>,
    dispatcher: DispatcherHandle,
    orchestrator: OrchestratorHandle,
    artifacts: ArtifactRegistry,
    sidecar: KnowledgeSidecar,
    blackboard: Blackboard,
    viewport: Arc<dyn ViewportBridge>,
    driver: Box<dyn RuntimeDriver>,
    adapter: ProtocolAdapter,
    self_tx: mpsc::UnboundedSender<AgentMsg>,
    /// Last-value view of the subscribed blackboard keys
    signals: std::collections::BTreeMap<String, serde_json::Value>,
    queue: VecDeque<WorkItem>,
    current: Option<CurrentWork>,
    pending_synthesis: HashMap<String, PendingSynthesis>,
    history: HashMap<String, CapabilityHistory>,
    attempts: u64,
    successes: u64,
    /// Bumped whenever a run is abandoned, so late pump messages from a
    /// stopped child are ignored
    run_generation: u64,
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn(
    profile: AgentProfile,
    config: Arc<FleetConfig>,
    dispatcher: DispatcherHandle,
    orchestrator: OrchestratorHandle,
    artifacts: ArtifactRegistry,
    sidecar: KnowledgeSidecar,
    blackboard: Blackboard,
    viewport: Arc<dyn ViewportBridge>,
    driver: Box<dyn RuntimeDriver>,
    self_tx: mpsc::UnboundedSender<AgentMsg>,
    mut rx: mpsc::UnboundedReceiver<AgentMsg>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        // Subscribed signals arrive through the mailbox like everything else.
        for key in &profile.blackboard_keys {
            let mut signals = blackboard.subscribe(key.clone(), profile.id.clone());
            let tx = self_tx.clone();
            tokio::spawn(async move {
                while let Some(signal) = signals.recv().await {
                    if tx.send(AgentMsg::Signal(signal)).is_err() {
                        return;
                    }
                }
            });
        }

        let mut agent = Agent {
            capabilities: profile.capabilities.iter().cloned().collect(),
            adapter: ProtocolAdapter::new(profile.id.clone()),
            profile,
            config,
            dispatcher,
            orchestrator,
            artifacts,
            sidecar,
            blackboard,
            viewport,
            driver,
            self_tx,
            signals: std::collections::BTreeMap::new(),
            queue: VecDeque::new(),
            current: None,
            pending_synthesis: HashMap::new(),
            history: HashMap::new(),
            attempts: 0,
            successes: 0,
            run_generation: 0,
        };

        if let Err(e) = agent.driver.start().await {
            tracing::error!("agent {} runtime failed to start: {e}", agent.profile.id);
            return;
        }

        while let Some(message) = rx.recv().await {
            if agent.handle_message(message).await {
                break;
            }
        }
        agent.driver.stop().await;
        agent.blackboard.drop_subscriber(agent.profile.id.clone());
    })
}

impl Agent {
    /// Returns true when the actor should terminate.
    async fn handle_message(&mut self, message: AgentMsg) -> bool {
        match message {
            AgentMsg::TaskAvailable(offer) => self.evaluate_bid(&offer),
            AgentMsg::TaskAwardedTo { task_id } => {
                tracing::debug!("agent {} won the auction for {task_id}", self.profile.id);
            }
            AgentMsg::TaskBidRejected { task_id } => {
                tracing::debug!("agent {} lost the auction for {task_id}", self.profile.id);
            }
            AgentMsg::TaskAssigned(assignment) => {
                self.queue.push_back(WorkItem::Execute(assignment));
                self.begin_next().await;
            }
            AgentMsg::SubtasksCompleted(request) => {
                // Synthesis outranks queued fresh work.
                self.queue.push_front(WorkItem::Synthesize(request));
                self.begin_next().await;
            }
            AgentMsg::TaskDecompositionRejected { task_id, reason } => {
                self.on_decomposition_rejected(&task_id, &reason);
            }
            AgentMsg::CancelTask { task_id } => {
                self.on_cancel(&task_id).await;
            }
            AgentMsg::RuntimeLine { generation, line } => {
                if generation == self.run_generation {
                    self.on_runtime_line(&line);
                }
            }
            AgentMsg::RuntimeStreamEnded { generation } => {
                if generation == self.run_generation {
                    self.on_stream_ended().await;
                }
            }
            AgentMsg::Signal(signal) => {
                self.signals.insert(signal.key, signal.value);
            }
            AgentMsg::Stop => {
                self.shutdown().await;
                return true;
            }
        }
        false
    }

    fn active_task_count(&self) -> u32 {
        self.current.is_some() as u32 + self.queue.len() as u32
    }

    fn capacity(&self) -> u32 {
        self.profile.capacity.unwrap_or(self.config.agent_capacity)
    }

    fn evaluate_bid(&mut self, offer: &TaskAvailable) {
        if self.active_task_count() >= self.capacity() {
            return;
        }

        let required = &offer.required_capabilities;
        let fitness = if required.is_empty() {
            1.0
        } else {
            let covered = required
                .iter()
                .filter(|cap| self.capabilities.contains(*cap))
                .count();
            covered as f64 / required.len() as f64
        };
        if fitness < 1.0 {
            return;
        }

        let affinity = if self.attempts == 0 {
            1.0
        } else {
            self.successes as f64 / self.attempts as f64
        };
        if affinity < self.config.affinity_threshold {
            return;
        }

        let caps_key = caps_key(required);
        let history = self.history.get(&caps_key);
        let estimated_duration_ms = history
            .and_then(|h| median(&h.durations_ms))
            .unwrap_or(self.config.default_estimated_duration_ms);
        let estimated_tokens = history.and_then(|h| median(&h.tokens)).unwrap_or(1_000);

        self.dispatcher.bid(Bid {
            task_id: offer.task_id.clone(),
            agent_id: self.profile.id.clone(),
            fitness,
            active_task_count: self.active_task_count(),
            estimated_duration_ms,
            estimated_tokens,
        });
    }

    async fn begin_next(&mut self) {
        while self.current.is_none() {
            let Some(item) = self.queue.pop_front() else {
                return;
            };
            match item {
                WorkItem::Execute(assignment) => {
                    if self.begin_execution(assignment).await {
                        return;
                    }
                }
                WorkItem::Synthesize(request) => {
                    if self.begin_synthesis(request).await {
                        return;
                    }
                }
            }
        }
    }

    /// Returns true when a run started; false lets the caller try the next
    /// queued item.
    async fn begin_execution(&mut self, assignment: TaskAssigned) -> bool {
        // The only suspension in assignment handling: bounded context
        // retrieval, degrading to the raw description.
        let retrieval = tokio::time::timeout(
            Duration::from_secs(self.config.knowledge_timeout_secs),
            self.sidecar.query(&self.profile.id, &assignment.description),
        )
        .await;
        let entries = retrieval.unwrap_or_default();
        let mut preamble = format_context_preamble(&entries);
        if !self.signals.is_empty() {
            preamble.push_str("## Signals\n");
            for (key, value) in &self.signals {
                preamble.push_str(&format!("- {key}: {value}\n"));
            }
            preamble.push('\n');
        }
        let prompt = AgentPrompts::compose_task_prompt(&preamble, &assignment.description);

        let caps_key = caps_key(&assignment.required_capabilities);
        let task_id = assignment.task_id.clone();
        if !self.launch_run(&prompt, &task_id).await {
            return false;
        }
        self.current = Some(CurrentWork {
            task_id,
            kind: WorkKind::Execute,
            assignment: Some(assignment),
            caps_key,
            started: Instant::now(),
            output: String::new(),
            artifacts: Vec::new(),
            exit_success: None,
        });
        true
    }

    async fn begin_synthesis(&mut self, request: SubtasksCompleted) -> bool {
        let Some(pending) = self.pending_synthesis.remove(&request.parent_id) else {
            tracing::warn!(
                "agent {} got synthesis request for unknown parent {}",
                self.profile.id,
                request.parent_id
            );
            return false;
        };

        let prompt = AgentPrompts::build_synthesis_prompt(
            &pending.assignment.description,
            &request.results,
        );
        let caps_key = caps_key(&pending.assignment.required_capabilities);
        let task_id = request.parent_id.clone();
        if !self.launch_run(&prompt, &task_id).await {
            return false;
        }
        self.current = Some(CurrentWork {
            task_id,
            kind: WorkKind::Synthesize,
            assignment: Some(pending.assignment),
            caps_key,
            started: Instant::now(),
            output: String::new(),
            artifacts: Vec::new(),
            exit_success: None,
        });
        true
    }

    /// Send the prompt and wire the pump. On failure the task is reported
    /// failed and no run begins.
    async fn launch_run(&mut self, prompt: &str, task_id: &str) -> bool {
        if let Err(e) = self.driver.send(prompt).await {
            tracing::error!("agent {} runtime send failed: {e}", self.profile.id);
            self.orchestrator.task_failed(TaskFailed {
                task_id: task_id.to_string(),
                reason: format!("runtime spawn failed: {e}"),
                unmet_capabilities: Vec::new(),
            });
            return false;
        }
        let Some(mut events) = self.driver.events() else {
            self.orchestrator.task_failed(TaskFailed {
                task_id: task_id.to_string(),
                reason: "runtime produced no event stream".to_string(),
                unmet_capabilities: Vec::new(),
            });
            return false;
        };

        self.run_generation += 1;
        let generation = self.run_generation;
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            while let Some(line) = events.recv().await {
                if tx.send(AgentMsg::RuntimeLine { generation, line }).is_err() {
                    return;
                }
            }
            let _ = tx.send(AgentMsg::RuntimeStreamEnded { generation });
        });

        self.viewport.publish_runtime_started(&self.profile.id);
        true
    }

    fn on_runtime_line(&mut self, line: &str) {
        let Some(current) = self.current.as_mut() else {
            return;
        };

        self.viewport.publish_runtime_output(&self.profile.id, line);
        let activity = self.config.activity_keywords.classify(line);
        self.viewport
            .publish_agent_state_changed(&self.profile.id, activity);

        if let Some(success) = exit_line_success(line) {
            current.exit_success = Some(success);
        }

        // Artifact declarations are directives, not message text.
        if let Some(decl) = parse_artifact_line(line) {
            current.artifacts.push(Artifact {
                id: uuid::Uuid::new_v4().to_string(),
                artifact_type: decl.artifact_type.unwrap_or_default(),
                format: decl.format.unwrap_or_default(),
                uri: decl.uri,
                content_hash: decl.content_hash,
                provenance: ArtifactProvenance {
                    task_id: current.task_id.clone(),
                    agent_id: self.profile.id.clone(),
                    created_at: Utc::now(),
                    input_artifact_ids: Vec::new(),
                },
                validators: Vec::new(),
            });
            return;
        }

        for event in self.adapter.process_line(line) {
            if let ProtocolEvent::TextMessageContent { delta, .. } = event {
                current.output.push_str(&delta);
                current.output.push('\n');
            }
        }
    }

    async fn on_stream_ended(&mut self) {
        self.adapter.finish();
        self.viewport.publish_runtime_exited(&self.profile.id, None);

        let Some(current) = self.current.take() else {
            return;
        };
        let success = current.exit_success.unwrap_or(true);
        let summary = current.output.trim().to_string();

        match current.kind {
            WorkKind::Execute => {
                if success {
                    if let Some(subplan) = parse_subplan(&current.output) {
                        // Decomposing: hold the context for the later
                        // synthesis pass and free the runtime for siblings.
                        if let Some(assignment) = current.assignment {
                            self.pending_synthesis.insert(
                                current.task_id.clone(),
                                PendingSynthesis {
                                    assignment,
                                    output: current.output.clone(),
                                },
                            );
                        }
                        self.orchestrator.task_completed(TaskCompleted {
                            task_id: current.task_id,
                            agent_id: self.profile.id.clone(),
                            success: true,
                            summary,
                            artifacts: current.artifacts,
                            subplan: Some(subplan),
                        });
                        self.begin_next().await;
                        return;
                    }
                }
                self.finish_task(
                    current.task_id,
                    current.caps_key,
                    current.started,
                    success,
                    summary,
                    current.artifacts,
                )
                .await;
            }
            WorkKind::Synthesize => {
                self.finish_task(
                    current.task_id,
                    current.caps_key,
                    current.started,
                    success,
                    summary,
                    current.artifacts,
                )
                .await;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_task(
        &mut self,
        task_id: String,
        caps_key: String,
        started: Instant,
        success: bool,
        summary: String,
        artifacts: Vec<Artifact>,
    ) {
        self.attempts += 1;
        if success {
            self.successes += 1;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let entry = self.history.entry(caps_key).or_default();
            entry.durations_ms.push(elapsed_ms);
            entry.tokens.push((summary.len() / 4).max(1) as u64);
        }

        for artifact in &artifacts {
            let registry = self.artifacts.clone();
            let artifact = artifact.clone();
            tokio::spawn(async move {
                if let Err(e) = registry.register(artifact).await {
                    tracing::debug!("artifact registration dropped: {e}");
                }
            });
        }

        self.orchestrator.task_completed(TaskCompleted {
            task_id: task_id.clone(),
            agent_id: self.profile.id.clone(),
            success,
            summary: summary.clone(),
            artifacts,
            subplan: None,
        });

        // Loss-tolerant write-back.
        if !summary.is_empty() {
            self.sidecar.store(
                &self.profile.id,
                &summary,
                "outcome",
                &[("task".to_string(), task_id)],
            );
            self.sidecar.store(&self.profile.id, &summary, "memory", &[]);
        }

        self.begin_next().await;
    }

    fn on_decomposition_rejected(&mut self, task_id: &str, reason: &str) {
        tracing::debug!(
            "decomposition of {task_id} rejected for agent {}: {reason}",
            self.profile.id
        );
        // Fall back to completing the task normally with what the runtime
        // already produced.
        let Some(pending) = self.pending_synthesis.remove(task_id) else {
            return;
        };
        self.orchestrator.task_completed(TaskCompleted {
            task_id: task_id.to_string(),
            agent_id: self.profile.id.clone(),
            success: true,
            summary: pending.output.trim().to_string(),
            artifacts: Vec::new(),
            subplan: None,
        });
    }

    async fn on_cancel(&mut self, task_id: &str) {
        if self
            .current
            .as_ref()
            .map(|c| c.task_id == task_id)
            .unwrap_or(false)
        {
            self.driver.stop().await;
            self.run_generation += 1;
            self.current = None;
            self.viewport.publish_runtime_exited(&self.profile.id, None);
            self.orchestrator.task_failed(TaskFailed {
                task_id: task_id.to_string(),
                reason: "cancelled by orchestrator".to_string(),
                unmet_capabilities: Vec::new(),
            });
            self.begin_next().await;
            return;
        }
        self.queue.retain(|item| item.task_id() != task_id);
        self.pending_synthesis.remove(task_id);
    }

    async fn shutdown(&mut self) {
        self.driver.stop().await;
        self.run_generation += 1;
        if let Some(current) = self.current.take() {
            self.orchestrator.task_failed(TaskFailed {
                task_id: current.task_id,
                reason: "agent stopped".to_string(),
                unmet_capabilities: Vec::new(),
            });
        }
        while let Some(item) = self.queue.pop_front() {
            self.orchestrator.task_failed(TaskFailed {
                task_id: item.task_id().to_string(),
                reason: "agent stopped".to_string(),
                unmet_capabilities: Vec::new(),
            });
        }
    }
}

fn caps_key(required: &[String]) -> String {
    let mut caps: Vec<&str> = required.iter().map(String::as_str).collect();
    caps.sort_unstable();
    caps.join(",")
}

fn median(values: &[u64]) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    Some(sorted[sorted.len() / 2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_picks_middle() {
        assert_eq!(median(&[5, 1, 9]), Some(5));
        assert_eq!(median(&[4, 2]), Some(4));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn caps_key_is_order_insensitive() {
        assert_eq!(
            caps_key(&["b".to_string(), "a".to_string()]),
            caps_key(&["a".to_string(), "b".to_string()])
        );
    }
}
