// Fleet Event Log
// Serialisable record of every externally interesting transition, published
// on the broadcast bus for viewports, logs, and tests.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use murmur_types::{ActivityState, RiskLevel, TaskStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    TaskGraphSubmitted {
        graph_id: String,
        node_count: usize,
        edge_count: usize,
        timestamp: DateTime<Utc>,
    },
    TaskGraphRejected {
        reason: String,
        timestamp: DateTime<Utc>,
    },
    TaskNodeStatusChanged {
        graph_id: String,
        task_id: String,
        status: TaskStatus,
        agent_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    TaskDispatchRequested {
        graph_id: String,
        task_id: String,
        timestamp: DateTime<Utc>,
    },
    BidRecorded {
        task_id: String,
        agent_id: String,
        fitness: f64,
        timestamp: DateTime<Utc>,
    },
    TaskAwarded {
        task_id: String,
        agent_id: String,
        timestamp: DateTime<Utc>,
    },
    RiskApprovalRequired {
        task_id: String,
        risk: RiskLevel,
        description: String,
        timestamp: DateTime<Utc>,
    },
    TaskDecompositionRejected {
        task_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    TaskGraphCompleted {
        graph_id: String,
        results: BTreeMap<String, bool>,
        timestamp: DateTime<Utc>,
    },
    AgentSpawned {
        agent_id: String,
        timestamp: DateTime<Utc>,
    },
    AgentStateChanged {
        agent_id: String,
        activity: ActivityState,
        timestamp: DateTime<Utc>,
    },
    AgentDespawned {
        agent_id: String,
        timestamp: DateTime<Utc>,
    },
    RuntimeStarted {
        agent_id: String,
        timestamp: DateTime<Utc>,
    },
    RuntimeExited {
        agent_id: String,
        exit_code: Option<i32>,
        timestamp: DateTime<Utc>,
    },
    RuntimeOutput {
        agent_id: String,
        line: String,
        timestamp: DateTime<Utc>,
    },
    ArtifactRegistered {
        artifact_id: String,
        task_id: String,
        timestamp: DateTime<Utc>,
    },
    ArtifactBlessed {
        artifact_id: String,
        timestamp: DateTime<Utc>,
    },
    SignalPublished {
        key: String,
        publisher_id: String,
        timestamp: DateTime<Utc>,
    },
}
