// Orchestrator
// Owns every submitted graph's state. Validates submissions, dispatches
// ready nodes to the auction, ingests completions and failures (tolerating
// out-of-order delivery), runs the decomposition and synthesis flows, and
// propagates cancellation. No other component mutates graph state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use murmur_core::{EventBus, FleetConfig, FleetEvent, ViewportBridge};
use murmur_types::{
    SubtaskResult, SubtasksCompleted, TaskCompleted, TaskDispatchRequest, TaskFailed, TaskGraph,
    TaskStatus, StopCondition,
};
use tokio::sync::mpsc;

use crate::graph::GraphState;
use crate::mailbox::{
    AgentMsg, DispatcherHandle, OrchestratorHandle, OrchestratorMsg, SubmitResult,
    SupervisorHandle,
};

pub(crate) struct Orchestrator {
    config: Arc<FleetConfig>,
    dispatcher: DispatcherHandle,
    supervisor: SupervisorHandle,
    events: EventBus,
    viewport: Arc<dyn ViewportBridge>,
    handle: OrchestratorHandle,
    graphs: HashMap<String, GraphState>,
    /// task id → graph id, for completion routing
    task_index: HashMap<String, String>,
    /// graphs whose completion has already been announced
    announced: HashSet<String>,
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn(
    config: Arc<FleetConfig>,
    dispatcher: DispatcherHandle,
    supervisor: SupervisorHandle,
    events: EventBus,
    viewport: Arc<dyn ViewportBridge>,
    mut rx: mpsc::UnboundedReceiver<OrchestratorMsg>,
    handle: OrchestratorHandle,
) {
    tokio::spawn(async move {
        let mut orchestrator = Orchestrator {
            config,
            dispatcher,
            supervisor,
            events,
            viewport,
            handle,
            graphs: HashMap::new(),
            task_index: HashMap::new(),
            announced: HashSet::new(),
        };
        while let Some(message) = rx.recv().await {
            orchestrator.handle_message(message);
        }
    });
}

impl Orchestrator {
    fn handle_message(&mut self, message: OrchestratorMsg) {
        match message {
            OrchestratorMsg::Submit { graph, reply } => {
                let _ = reply.send(self.on_submit(graph));
            }
            OrchestratorMsg::TaskCompleted(completed) => self.on_task_completed(completed),
            OrchestratorMsg::TaskFailed(failed) => self.on_task_failed(failed),
            OrchestratorMsg::TaskReadyForDispatch { task_id, agent_id } => {
                self.on_task_awarded(&task_id, &agent_id)
            }
            OrchestratorMsg::UserDecision { parent_id } => self.on_user_decision(&parent_id),
            OrchestratorMsg::GraphDeadline { graph_id } => self.on_graph_deadline(&graph_id),
        }
    }

    fn on_submit(&mut self, graph: TaskGraph) -> SubmitResult {
        let (state, dropped_edges) = match GraphState::build(graph) {
            Ok(built) => built,
            Err(reason) => {
                self.events.publish(FleetEvent::TaskGraphRejected {
                    reason: reason.clone(),
                    timestamp: Utc::now(),
                });
                return SubmitResult::Rejected { reason };
            }
        };
        if dropped_edges > 0 {
            tracing::warn!(
                "graph {}: dropped {dropped_edges} edge(s) naming unknown tasks",
                state.id
            );
        }

        let graph_id = state.id.clone();
        for node in state.nodes() {
            if let Some(previous) = self
                .task_index
                .insert(node.id.clone(), graph_id.clone())
            {
                tracing::warn!(
                    "task id {} shadows an earlier submission in graph {previous}",
                    node.id
                );
            }
        }

        let node_count = state.node_count();
        let edge_count = state.edge_count();
        self.viewport
            .publish_task_graph_submitted(&graph_id, node_count, edge_count);
        self.events.publish(FleetEvent::TaskGraphSubmitted {
            graph_id: graph_id.clone(),
            node_count,
            edge_count,
            timestamp: Utc::now(),
        });

        let ready = state.ready_ids();
        let deadline_ms = state.budget.as_ref().and_then(|b| b.deadline_ms);
        self.graphs.insert(graph_id.clone(), state);

        for task_id in ready {
            self.note_status(&graph_id, &task_id, TaskStatus::Ready, None);
            self.dispatch(&graph_id, &task_id);
        }

        if let Some(deadline_ms) = deadline_ms {
            let handle = self.handle.clone();
            let graph_for_timer = graph_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(deadline_ms)).await;
                handle.send(OrchestratorMsg::GraphDeadline {
                    graph_id: graph_for_timer,
                });
            });
        }

        // An empty graph is terminal on arrival.
        self.check_completion(&graph_id);

        SubmitResult::Accepted {
            graph_id,
            node_count,
            edge_count,
        }
    }

    fn dispatch(&mut self, graph_id: &str, task_id: &str) {
        let Some(graph) = self.graphs.get(graph_id) else { return };
        let Some(node) = graph.node(task_id) else { return };
        self.events.publish(FleetEvent::TaskDispatchRequested {
            graph_id: graph_id.to_string(),
            task_id: task_id.to_string(),
            timestamp: Utc::now(),
        });
        self.dispatcher.request(TaskDispatchRequest {
            graph_id: graph_id.to_string(),
            task_id: task_id.to_string(),
            description: node.description.clone(),
            required_capabilities: node.required_capabilities.clone(),
            budget: node.budget.clone(),
            bid_window_ms: None,
        });
    }

    fn on_task_awarded(&mut self, task_id: &str, agent_id: &str) {
        let Some(graph_id) = self.task_index.get(task_id).cloned() else { return };
        let Some(graph) = self.graphs.get_mut(&graph_id) else { return };
        let Some(node) = graph.node_mut(task_id) else { return };

        if node.status.is_terminal() {
            // The node died between award and confirmation; the agent must
            // not keep working on it.
            self.supervisor.route(
                agent_id.to_string(),
                AgentMsg::CancelTask {
                    task_id: task_id.to_string(),
                },
            );
            return;
        }
        if node.status != TaskStatus::Ready {
            tracing::debug!("award confirmation for {task_id} in {:?} ignored", node.status);
            return;
        }

        node.status = TaskStatus::Dispatched;
        node.assigned_agent = Some(agent_id.to_string());
        let deadline_ms = node.budget.as_ref().and_then(|b| b.deadline_ms);
        self.note_status(&graph_id, task_id, TaskStatus::Dispatched, Some(agent_id));

        if let Some(deadline_ms) = deadline_ms {
            let handle = self.handle.clone();
            let task_for_timer = task_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(deadline_ms)).await;
                handle.send(OrchestratorMsg::TaskFailed(TaskFailed {
                    task_id: task_for_timer,
                    reason: "task deadline exceeded".to_string(),
                    unmet_capabilities: Vec::new(),
                }));
            });
        }
    }

    fn on_task_completed(&mut self, completed: TaskCompleted) {
        let Some(graph_id) = self.task_index.get(&completed.task_id).cloned() else {
            tracing::debug!("completion for unknown task {} dropped", completed.task_id);
            return;
        };
        let Some(status) = self
            .graphs
            .get(&graph_id)
            .and_then(|g| g.node(&completed.task_id))
            .map(|n| n.status)
        else {
            return;
        };

        match status {
            TaskStatus::Dispatched => {
                if let Some(subplan) = &completed.subplan {
                    self.on_decomposition(&graph_id, &completed, subplan.clone());
                    return;
                }
                self.terminalize(&graph_id, &completed.task_id, completed.success, &completed.summary);
            }
            TaskStatus::Synthesizing => {
                // The second completion carries the rolled-up result; a
                // subplan here is ignored by construction.
                self.terminalize(&graph_id, &completed.task_id, completed.success, &completed.summary);
            }
            other => {
                tracing::debug!(
                    "completion for {} in {:?} ignored (out-of-order delivery)",
                    completed.task_id,
                    other
                );
            }
        }
    }

    fn on_decomposition(
        &mut self,
        graph_id: &str,
        completed: &TaskCompleted,
        subplan: murmur_types::ProposedSubplan,
    ) {
        let parent_id = completed.task_id.clone();
        let inserted = {
            let Some(graph) = self.graphs.get_mut(graph_id) else { return };
            graph.insert_subplan(
                &parent_id,
                &completed.agent_id,
                &subplan,
                self.config.max_depth,
                self.config.max_subtasks,
                self.config.max_total_nodes,
            )
        };

        match inserted {
            Err(reason) => {
                self.events.publish(FleetEvent::TaskDecompositionRejected {
                    task_id: parent_id.clone(),
                    reason: reason.clone(),
                    timestamp: Utc::now(),
                });
                self.supervisor.route(
                    completed.agent_id.clone(),
                    AgentMsg::TaskDecompositionRejected {
                        task_id: parent_id,
                        reason,
                    },
                );
                // Parent remains Dispatched awaiting a normal completion.
            }
            Ok(children) => {
                self.note_status(graph_id, &parent_id, TaskStatus::WaitingForSubtasks, None);
                for child_id in &children {
                    self.task_index
                        .insert(child_id.clone(), graph_id.to_string());
                }
                let ready: Vec<String> = {
                    let Some(graph) = self.graphs.get(graph_id) else { return };
                    children
                        .iter()
                        .filter(|id| {
                            graph
                                .node(id)
                                .map(|n| n.status == TaskStatus::Ready)
                                .unwrap_or(false)
                        })
                        .cloned()
                        .collect()
                };
                for child_id in &ready {
                    self.note_status(graph_id, child_id, TaskStatus::Ready, None);
                    self.dispatch(graph_id, child_id);
                }
                // A proposal with no subtasks settles immediately.
                self.maybe_synthesize(graph_id, &parent_id, false);
            }
        }
    }

    fn on_task_failed(&mut self, failed: TaskFailed) {
        let Some(graph_id) = self.task_index.get(&failed.task_id).cloned() else {
            tracing::debug!("failure for unknown task {} dropped", failed.task_id);
            return;
        };
        let is_terminal = self
            .graphs
            .get(&graph_id)
            .and_then(|g| g.node(&failed.task_id))
            .map(|n| n.status.is_terminal())
            .unwrap_or(true);
        if is_terminal {
            return;
        }
        tracing::warn!("task {} failed: {}", failed.task_id, failed.reason);
        self.terminalize(&graph_id, &failed.task_id, false, &failed.reason);
    }

    /// Drive a node to `Completed`/`Failed` and run every consequence:
    /// dependent promotion or cancellation, sibling bookkeeping for
    /// decomposed parents, and the graph terminality check.
    fn terminalize(&mut self, graph_id: &str, task_id: &str, success: bool, summary: &str) {
        let status = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        let (parent, assigned_agent) = {
            let Some(graph) = self.graphs.get_mut(graph_id) else { return };
            let was_active = graph
                .node(task_id)
                .map(|n| {
                    matches!(
                        n.status,
                        TaskStatus::Dispatched | TaskStatus::Synthesizing
                    )
                })
                .unwrap_or(false);
            if !graph.set_status(task_id, status) {
                return;
            }
            if let Some(node) = graph.node_mut(task_id) {
                node.summary = summary.to_string();
            }
            let node = graph.node(task_id);
            (
                node.and_then(|n| n.parent.clone()),
                if was_active && !success {
                    node.and_then(|n| n.assigned_agent.clone())
                } else {
                    None
                },
            )
        };
        self.note_status(graph_id, task_id, status, None);

        // An externally failed task may still be running on its agent; the
        // stop signal is a no-op when the agent itself reported the failure.
        if let Some(agent_id) = assigned_agent {
            self.supervisor.route(
                agent_id,
                AgentMsg::CancelTask {
                    task_id: task_id.to_string(),
                },
            );
        }

        if success {
            let promoted = {
                let Some(graph) = self.graphs.get_mut(graph_id) else { return };
                graph.promote_ready_after(task_id)
            };
            for ready_id in promoted {
                self.note_status(graph_id, &ready_id, TaskStatus::Ready, None);
                self.dispatch(graph_id, &ready_id);
            }
        } else {
            self.cancel_dependents_of(graph_id, task_id);
        }

        if let Some(parent_id) = parent {
            self.on_child_terminal(graph_id, &parent_id, success);
        }
        self.check_completion(graph_id);
    }

    fn cancel_dependents_of(&mut self, graph_id: &str, task_id: &str) {
        let cancelled = {
            let Some(graph) = self.graphs.get_mut(graph_id) else { return };
            graph.cancel_dependents(task_id)
        };
        for node in cancelled {
            self.note_status(graph_id, &node.task_id, TaskStatus::Cancelled, None);
            if let Some(agent_id) = node.assigned_agent {
                self.supervisor.route(
                    agent_id,
                    AgentMsg::CancelTask {
                        task_id: node.task_id.clone(),
                    },
                );
            }
        }
    }

    fn on_child_terminal(&mut self, graph_id: &str, parent_id: &str, child_success: bool) {
        let (waiting, stop_condition) = {
            let Some(node) = self.graphs.get(graph_id).and_then(|g| g.node(parent_id)) else {
                return;
            };
            (
                node.status == TaskStatus::WaitingForSubtasks,
                node.stop_condition,
            )
        };
        if !waiting {
            return;
        }

        if stop_condition == StopCondition::FirstSuccess && child_success {
            // Winner takes the synthesis; unfinished siblings fold.
            let unfinished = {
                let Some(graph) = self.graphs.get(graph_id) else { return };
                graph.unfinished_children(parent_id)
            };
            for sibling in unfinished {
                let agent = {
                    let Some(graph) = self.graphs.get_mut(graph_id) else { return };
                    let agent = graph.node(&sibling).and_then(|n| n.assigned_agent.clone());
                    // An earlier sibling's closure may have reached this one.
                    if !graph.set_status(&sibling, TaskStatus::Cancelled) {
                        continue;
                    }
                    agent
                };
                self.note_status(graph_id, &sibling, TaskStatus::Cancelled, None);
                if let Some(agent_id) = agent {
                    self.supervisor.route(
                        agent_id,
                        AgentMsg::CancelTask {
                            task_id: sibling.clone(),
                        },
                    );
                }
                self.cancel_dependents_of(graph_id, &sibling);
            }
            self.trigger_synthesis(graph_id, parent_id);
            return;
        }

        self.maybe_synthesize(graph_id, parent_id, false);
    }

    /// Move a waiting parent to synthesis when its stop condition is
    /// satisfied. `decision_just_arrived` marks the external `UserDecision`
    /// message.
    fn maybe_synthesize(&mut self, graph_id: &str, parent_id: &str, decision_just_arrived: bool) {
        let ready_for_synthesis = {
            let Some(graph) = self.graphs.get_mut(graph_id) else { return };
            let Some(node) = graph.node_mut(parent_id) else { return };
            if node.status != TaskStatus::WaitingForSubtasks {
                return;
            }
            if decision_just_arrived {
                node.user_decision_received = true;
            }
            let gate_open = node.stop_condition != StopCondition::UserDecision
                || node.user_decision_received;
            gate_open && graph.children_all_terminal(parent_id)
        };
        if ready_for_synthesis {
            self.trigger_synthesis(graph_id, parent_id);
        }
    }

    fn trigger_synthesis(&mut self, graph_id: &str, parent_id: &str) {
        let (agent_id, results) = {
            let Some(graph) = self.graphs.get_mut(graph_id) else { return };
            let Some(node) = graph.node(parent_id) else { return };
            if node.status != TaskStatus::WaitingForSubtasks {
                return;
            }
            let Some(agent_id) = node.decomposed_by.clone() else {
                tracing::error!("parent {parent_id} has no synthesizing agent");
                return;
            };
            let results: Vec<SubtaskResult> = node
                .children
                .iter()
                .filter_map(|child_id| graph.node(child_id))
                .map(|child| SubtaskResult {
                    task_id: child.id.clone(),
                    success: child.status == TaskStatus::Completed,
                    summary: child.summary.clone(),
                })
                .collect();
            graph.set_status(parent_id, TaskStatus::Synthesizing);
            (agent_id, results)
        };

        self.note_status(graph_id, parent_id, TaskStatus::Synthesizing, None);
        self.supervisor.route(
            agent_id,
            AgentMsg::SubtasksCompleted(SubtasksCompleted {
                parent_id: parent_id.to_string(),
                results,
            }),
        );
    }

    fn on_user_decision(&mut self, parent_id: &str) {
        let Some(graph_id) = self.task_index.get(parent_id).cloned() else { return };
        self.maybe_synthesize(&graph_id, parent_id, true);
    }

    /// The graph deadline fires once; every later delivery is a no-op.
    fn on_graph_deadline(&mut self, graph_id: &str) {
        let affected: Vec<(String, TaskStatus, Option<String>)> = {
            let Some(graph) = self.graphs.get_mut(graph_id) else { return };
            if graph.deadline_fired || graph.all_terminal() {
                return;
            }
            graph.deadline_fired = true;

            let mut affected = Vec::new();
            let node_ids: Vec<String> =
                graph.nodes().iter().map(|n| n.id.clone()).collect();
            for node_id in node_ids {
                let Some(node) = graph.node(&node_id) else { continue };
                let (next, agent) = match node.status {
                    TaskStatus::Dispatched
                    | TaskStatus::Synthesizing
                    | TaskStatus::WaitingForSubtasks => {
                        (TaskStatus::Failed, node.assigned_agent.clone())
                    }
                    TaskStatus::Pending | TaskStatus::Ready => (TaskStatus::Cancelled, None),
                    _ => continue,
                };
                graph.set_status(&node_id, next);
                affected.push((node_id, next, agent));
            }
            affected
        };

        tracing::warn!("graph {graph_id} deadline fired");
        for (task_id, status, agent) in affected {
            self.note_status(graph_id, &task_id, status, None);
            if let Some(agent_id) = agent {
                self.supervisor
                    .route(agent_id, AgentMsg::CancelTask { task_id });
            }
        }
        self.check_completion(graph_id);
    }

    fn check_completion(&mut self, graph_id: &str) {
        let results = {
            let Some(graph) = self.graphs.get(graph_id) else { return };
            if !graph.all_terminal() || self.announced.contains(graph_id) {
                return;
            }
            graph.results()
        };
        self.announced.insert(graph_id.to_string());
        self.viewport
            .publish_task_graph_completed(graph_id, &results);
        self.events.publish(FleetEvent::TaskGraphCompleted {
            graph_id: graph_id.to_string(),
            results,
            timestamp: Utc::now(),
        });
        tracing::info!("graph {graph_id} completed");
    }

    fn note_status(
        &self,
        graph_id: &str,
        task_id: &str,
        status: TaskStatus,
        agent_id: Option<&str>,
    ) {
        self.viewport
            .publish_task_node_status_changed(graph_id, task_id, status, agent_id);
        self.events.publish(FleetEvent::TaskNodeStatusChanged {
            graph_id: graph_id.to_string(),
            task_id: task_id.to_string(),
            status,
            agent_id: agent_id.map(String::from),
            timestamp: Utc::now(),
        });
    }
}
