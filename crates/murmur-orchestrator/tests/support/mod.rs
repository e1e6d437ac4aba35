// Test Support
// Scripted runtime drivers so fleet scenarios run without real agent
// subprocesses: each `send` replays the lines the script produces for that
// prompt, then ends the stream like a real child exiting.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use murmur_core::{FleetConfig, FleetEvent, NullViewport, Result};
use murmur_memory::{KnowledgeSidecar, KnowledgeSidecarConfig};
use murmur_orchestrator::{Fleet, FleetDeps};
use murmur_runtime::{DriverFactory, RuntimeDriver};
use murmur_types::{AgentProfile, RiskApprovalRequired};
use tokio::sync::{broadcast, mpsc};

pub type Script = Arc<dyn Fn(&str, &str) -> Vec<String> + Send + Sync>;

/// A script line that keeps the runtime stream open indefinitely, standing
/// in for a child that never exits.
pub const HANG_MARKER: &str = "<<hang>>";

pub struct ScriptedDriver {
    agent_id: String,
    script: Script,
    pending: Option<mpsc::UnboundedReceiver<String>>,
    started: bool,
}

#[async_trait]
impl RuntimeDriver for ScriptedDriver {
    async fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    async fn stop(&mut self) {
        self.pending = None;
    }

    async fn send(&mut self, prompt: &str) -> Result<()> {
        assert!(self.started, "send before start");
        let lines = (self.script)(&self.agent_id, prompt);
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending = Some(rx);
        tokio::spawn(async move {
            for line in lines {
                if line == HANG_MARKER {
                    // A child that never exits: hold the stream open.
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    continue;
                }
                if tx.send(line).is_err() {
                    return;
                }
            }
            // Dropping tx ends the stream, like a child exiting.
        });
        Ok(())
    }

    fn events(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.pending.take()
    }

    fn is_running(&self) -> bool {
        false
    }
}

pub struct ScriptedFactory {
    script: Script,
}

impl ScriptedFactory {
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(&str, &str) -> Vec<String> + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Arc::new(script),
        })
    }
}

impl DriverFactory for ScriptedFactory {
    fn create(&self, profile: &AgentProfile) -> Result<Box<dyn RuntimeDriver>> {
        Ok(Box::new(ScriptedDriver {
            agent_id: profile.id.clone(),
            script: self.script.clone(),
            pending: None,
            started: false,
        }))
    }
}

/// Short windows so auctions settle fast under test.
pub fn test_config() -> FleetConfig {
    FleetConfig {
        bid_window_ms: 25,
        ..FleetConfig::default()
    }
}

/// A sidecar pointing at a binary that does not exist: queries fail fast and
/// degrade to empty, which is exactly the no-context path.
pub fn absent_sidecar() -> KnowledgeSidecar {
    KnowledgeSidecar::new(KnowledgeSidecarConfig {
        executable: "murmur-test-no-such-sidecar".to_string(),
        timeout_secs: 1,
        top_k: 3,
    })
}

pub fn fleet_with(
    config: FleetConfig,
    factory: Arc<ScriptedFactory>,
    approver_tx: Option<mpsc::UnboundedSender<RiskApprovalRequired>>,
) -> Fleet {
    Fleet::spawn(
        config,
        FleetDeps {
            factory,
            sidecar: absent_sidecar(),
            viewport: Arc::new(NullViewport),
            events: murmur_core::EventBus::new(),
            approver_tx,
        },
    )
}

pub fn profile(id: &str, caps: &[&str]) -> AgentProfile {
    AgentProfile {
        id: id.to_string(),
        capabilities: caps.iter().map(|c| c.to_string()).collect(),
        visual: Default::default(),
        runtime_id: "scripted".to_string(),
        model: None,
        capacity: None,
        blackboard_keys: Vec::new(),
    }
}

/// Block until the graph announces completion, returning its ledger.
pub async fn await_completion(
    events: &mut broadcast::Receiver<FleetEvent>,
    graph_id: &str,
    timeout: Duration,
) -> BTreeMap<String, bool> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("graph did not complete in time");
        let event = tokio::time::timeout(remaining, events.recv())
            .await
            .expect("graph did not complete in time")
            .expect("event bus closed");
        if let FleetEvent::TaskGraphCompleted {
            graph_id: completed_id,
            results,
            ..
        } = event
        {
            if completed_id == graph_id {
                return results;
            }
        }
    }
}

/// Collect events for a fixed interval, for negative assertions.
pub async fn drain_events(
    events: &mut broadcast::Receiver<FleetEvent>,
    window: Duration,
) -> Vec<FleetEvent> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let Some(remaining) = deadline.checked_duration_since(tokio::time::Instant::now()) else {
            return seen;
        };
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) => seen.push(event),
            _ => return seen,
        }
    }
}
