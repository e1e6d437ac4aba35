// Viewport Bridge
// Pure outbound notification interface for whatever renders the fleet.
// Implementations must never propagate errors back into the core.

use std::collections::BTreeMap;

use chrono::Utc;
use murmur_types::{ActivityState, AgentVisual, TaskStatus};

use crate::event_bus::EventBus;
use crate::events::FleetEvent;

pub trait ViewportBridge: Send + Sync {
    fn publish_agent_spawned(&self, agent_id: &str, visual: &AgentVisual);
    fn publish_agent_state_changed(&self, agent_id: &str, activity: ActivityState);
    fn publish_agent_despawned(&self, agent_id: &str);
    fn publish_task_graph_submitted(&self, graph_id: &str, node_count: usize, edge_count: usize);
    fn publish_task_node_status_changed(
        &self,
        graph_id: &str,
        task_id: &str,
        status: TaskStatus,
        agent_id: Option<&str>,
    );
    fn publish_task_graph_completed(&self, graph_id: &str, results: &BTreeMap<String, bool>);
    fn publish_runtime_started(&self, agent_id: &str);
    fn publish_runtime_exited(&self, agent_id: &str, exit_code: Option<i32>);
    fn publish_runtime_output(&self, agent_id: &str, line: &str);
}

/// No-op bridge for headless runs and tests.
pub struct NullViewport;

impl ViewportBridge for NullViewport {
    fn publish_agent_spawned(&self, _agent_id: &str, _visual: &AgentVisual) {}
    fn publish_agent_state_changed(&self, _agent_id: &str, _activity: ActivityState) {}
    fn publish_agent_despawned(&self, _agent_id: &str) {}
    fn publish_task_graph_submitted(&self, _graph_id: &str, _nodes: usize, _edges: usize) {}
    fn publish_task_node_status_changed(
        &self,
        _graph_id: &str,
        _task_id: &str,
        _status: TaskStatus,
        _agent_id: Option<&str>,
    ) {
    }
    fn publish_task_graph_completed(&self, _graph_id: &str, _results: &BTreeMap<String, bool>) {}
    fn publish_runtime_started(&self, _agent_id: &str) {}
    fn publish_runtime_exited(&self, _agent_id: &str, _exit_code: Option<i32>) {}
    fn publish_runtime_output(&self, _agent_id: &str, _line: &str) {}
}

/// Bridge that forwards every notification onto the fleet event bus, which
/// is where the engine's log tail and external viewports listen.
pub struct EventBusViewport {
    events: EventBus,
}

impl EventBusViewport {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }
}

impl ViewportBridge for EventBusViewport {
    fn publish_agent_spawned(&self, agent_id: &str, _visual: &AgentVisual) {
        self.events.publish(FleetEvent::AgentSpawned {
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn publish_agent_state_changed(&self, agent_id: &str, activity: ActivityState) {
        self.events.publish(FleetEvent::AgentStateChanged {
            agent_id: agent_id.to_string(),
            activity,
            timestamp: Utc::now(),
        });
    }

    fn publish_agent_despawned(&self, agent_id: &str) {
        self.events.publish(FleetEvent::AgentDespawned {
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn publish_task_graph_submitted(&self, graph_id: &str, node_count: usize, edge_count: usize) {
        self.events.publish(FleetEvent::TaskGraphSubmitted {
            graph_id: graph_id.to_string(),
            node_count,
            edge_count,
            timestamp: Utc::now(),
        });
    }

    fn publish_task_node_status_changed(
        &self,
        graph_id: &str,
        task_id: &str,
        status: TaskStatus,
        agent_id: Option<&str>,
    ) {
        self.events.publish(FleetEvent::TaskNodeStatusChanged {
            graph_id: graph_id.to_string(),
            task_id: task_id.to_string(),
            status,
            agent_id: agent_id.map(String::from),
            timestamp: Utc::now(),
        });
    }

    fn publish_task_graph_completed(&self, graph_id: &str, results: &BTreeMap<String, bool>) {
        self.events.publish(FleetEvent::TaskGraphCompleted {
            graph_id: graph_id.to_string(),
            results: results.clone(),
            timestamp: Utc::now(),
        });
    }

    fn publish_runtime_started(&self, agent_id: &str) {
        self.events.publish(FleetEvent::RuntimeStarted {
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn publish_runtime_exited(&self, agent_id: &str, exit_code: Option<i32>) {
        self.events.publish(FleetEvent::RuntimeExited {
            agent_id: agent_id.to_string(),
            exit_code,
            timestamp: Utc::now(),
        });
    }

    fn publish_runtime_output(&self, agent_id: &str, line: &str) {
        self.events.publish(FleetEvent::RuntimeOutput {
            agent_id: agent_id.to_string(),
            line: line.to_string(),
            timestamp: Utc::now(),
        });
    }
}
