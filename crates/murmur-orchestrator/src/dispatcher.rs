// Dispatcher
// Sealed-bid auction per task: broadcast availability to capable agents,
// collect bids inside a bounded window, rank, gate critical-risk awards on
// the configured approver, and confirm awards to the orchestrator.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use murmur_core::{EventBus, FleetConfig, FleetEvent, SkillRegistry};
use murmur_types::{
    Bid, RiskApprovalRequired, RiskLevel, TaskAssigned, TaskAvailable, TaskBudget,
    TaskDispatchRequest, TaskFailed,
};
use tokio::sync::mpsc;

use crate::mailbox::{
    AgentMsg, DispatcherHandle, DispatcherMsg, OrchestratorHandle, OrchestratorMsg,
    SupervisorHandle,
};

struct Auction {
    request: TaskDispatchRequest,
    capable: Vec<String>,
    bids: Vec<Bid>,
    bidders: HashSet<String>,
}

struct PendingAward {
    request: TaskDispatchRequest,
    winner: String,
}

pub(crate) struct Dispatcher {
    config: Arc<FleetConfig>,
    skills: SkillRegistry,
    supervisor: SupervisorHandle,
    orchestrator: OrchestratorHandle,
    events: EventBus,
    /// External channel told about held critical-risk awards
    approver_tx: Option<mpsc::UnboundedSender<RiskApprovalRequired>>,
    handle: DispatcherHandle,
    auctions: HashMap<String, Auction>,
    pending_approvals: HashMap<String, PendingAward>,
    /// Tasks already assigned; at most one `TaskAssigned` per task id
    awarded: HashSet<String>,
}

pub(crate) fn spawn(
    config: Arc<FleetConfig>,
    skills: SkillRegistry,
    supervisor: SupervisorHandle,
    orchestrator: OrchestratorHandle,
    events: EventBus,
    approver_tx: Option<mpsc::UnboundedSender<RiskApprovalRequired>>,
    mut rx: mpsc::UnboundedReceiver<DispatcherMsg>,
    handle: DispatcherHandle,
) {
    tokio::spawn(async move {
        let mut dispatcher = Dispatcher {
            config,
            skills,
            supervisor,
            orchestrator,
            events,
            approver_tx,
            handle,
            auctions: HashMap::new(),
            pending_approvals: HashMap::new(),
            awarded: HashSet::new(),
        };
        while let Some(message) = rx.recv().await {
            dispatcher.handle_message(message).await;
        }
    });
}

impl Dispatcher {
    async fn handle_message(&mut self, message: DispatcherMsg) {
        match message {
            DispatcherMsg::TaskRequest(request) => self.on_task_request(request).await,
            DispatcherMsg::Bid(bid) => self.on_bid(bid),
            DispatcherMsg::BidWindowExpired { task_id } => self.on_window_expired(&task_id),
            DispatcherMsg::RiskApproved(approval) => {
                if approval.approver != self.config.approver_id {
                    tracing::warn!(
                        "ignoring risk approval for {} from unconfigured source {}",
                        approval.task_id,
                        approval.approver
                    );
                    return;
                }
                if let Some(pending) = self.pending_approvals.remove(&approval.task_id) {
                    self.award(pending.request, pending.winner);
                }
            }
            DispatcherMsg::RiskDenied(denial) => {
                if denial.approver != self.config.approver_id {
                    tracing::warn!(
                        "ignoring risk denial for {} from unconfigured source {}",
                        denial.task_id,
                        denial.approver
                    );
                    return;
                }
                if self.pending_approvals.remove(&denial.task_id).is_some() {
                    self.fail_task(&denial.task_id, "risk approval denied", Vec::new());
                }
            }
            DispatcherMsg::RiskApprovalTimedOut { task_id } => {
                if self.pending_approvals.remove(&task_id).is_some() {
                    self.fail_task(&task_id, "risk approval timed out", Vec::new());
                }
            }
        }
    }

    async fn on_task_request(&mut self, request: TaskDispatchRequest) {
        let task_id = request.task_id.clone();
        if self.awarded.contains(&task_id) || self.auctions.contains_key(&task_id) {
            tracing::debug!("duplicate dispatch request for {task_id} ignored");
            return;
        }

        let capable = match self.skills.find_capable(&request.required_capabilities).await {
            Ok(capable) => capable,
            Err(e) => {
                tracing::error!("skill registry unavailable: {e}");
                Vec::new()
            }
        };
        if capable.is_empty() {
            self.fail_task(
                &task_id,
                "no capable agents",
                request.required_capabilities.clone(),
            );
            return;
        }

        let window_ms = request.bid_window_ms.unwrap_or(self.config.bid_window_ms);
        for agent_id in &capable {
            self.supervisor.route(
                agent_id.clone(),
                AgentMsg::TaskAvailable(TaskAvailable {
                    task_id: task_id.clone(),
                    description: request.description.clone(),
                    required_capabilities: request.required_capabilities.clone(),
                    bid_window_ms: window_ms,
                }),
            );
        }

        self.auctions.insert(
            task_id.clone(),
            Auction {
                request,
                capable,
                bids: Vec::new(),
                bidders: HashSet::new(),
            },
        );

        let handle = self.handle.clone();
        if window_ms == 0 {
            handle.send(DispatcherMsg::BidWindowExpired { task_id });
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(window_ms)).await;
                handle.send(DispatcherMsg::BidWindowExpired { task_id });
            });
        }
    }

    fn on_bid(&mut self, bid: Bid) {
        let Some(auction) = self.auctions.get_mut(&bid.task_id) else {
            tracing::debug!(
                "late bid from {} for {} rejected (window closed)",
                bid.agent_id,
                bid.task_id
            );
            return;
        };
        if !auction.capable.iter().any(|id| *id == bid.agent_id) {
            tracing::debug!(
                "bid from {} for {} rejected (capability mismatch)",
                bid.agent_id,
                bid.task_id
            );
            return;
        }
        if !auction.bidders.insert(bid.agent_id.clone()) {
            tracing::debug!(
                "duplicate bid from {} for {} rejected",
                bid.agent_id,
                bid.task_id
            );
            return;
        }
        self.events.publish(FleetEvent::BidRecorded {
            task_id: bid.task_id.clone(),
            agent_id: bid.agent_id.clone(),
            fitness: bid.fitness,
            timestamp: Utc::now(),
        });
        auction.bids.push(bid);
    }

    fn on_window_expired(&mut self, task_id: &str) {
        let Some(mut auction) = self.auctions.remove(task_id) else {
            return;
        };

        auction.bids.sort_by(rank_bids);
        let winner = match auction.bids.first() {
            Some(best) => best.agent_id.clone(),
            // First-match fallback: capable list is sorted by agent id.
            None => match auction.capable.first() {
                Some(agent_id) => {
                    tracing::debug!("no bids for {task_id}; first-match fallback to {agent_id}");
                    agent_id.clone()
                }
                None => {
                    self.fail_task(
                        task_id,
                        "no capable agents",
                        auction.request.required_capabilities.clone(),
                    );
                    return;
                }
            },
        };

        for bid in &auction.bids {
            if bid.agent_id != winner {
                self.supervisor.route(
                    bid.agent_id.clone(),
                    AgentMsg::TaskBidRejected {
                        task_id: task_id.to_string(),
                    },
                );
            }
        }

        if TaskBudget::risk(auction.request.budget.as_ref()) == RiskLevel::Critical {
            self.hold_for_approval(auction.request, winner);
            return;
        }
        self.award(auction.request, winner);
    }

    fn hold_for_approval(&mut self, request: TaskDispatchRequest, winner: String) {
        let task_id = request.task_id.clone();
        let notification = RiskApprovalRequired {
            task_id: task_id.clone(),
            risk: RiskLevel::Critical,
            description: request.description.clone(),
        };
        self.events.publish(FleetEvent::RiskApprovalRequired {
            task_id: task_id.clone(),
            risk: RiskLevel::Critical,
            description: request.description.clone(),
            timestamp: Utc::now(),
        });
        if let Some(approver_tx) = &self.approver_tx {
            let _ = approver_tx.send(notification);
        }
        self.pending_approvals
            .insert(task_id.clone(), PendingAward { request, winner });

        let handle = self.handle.clone();
        let timeout = Duration::from_secs(self.config.risk_approval_timeout_secs);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            handle.send(DispatcherMsg::RiskApprovalTimedOut { task_id });
        });
    }

    fn award(&mut self, request: TaskDispatchRequest, winner: String) {
        let task_id = request.task_id.clone();
        if !self.awarded.insert(task_id.clone()) {
            return;
        }

        self.supervisor.route(
            winner.clone(),
            AgentMsg::TaskAwardedTo {
                task_id: task_id.clone(),
            },
        );
        self.supervisor.route(
            winner.clone(),
            AgentMsg::TaskAssigned(TaskAssigned {
                graph_id: request.graph_id.clone(),
                task_id: task_id.clone(),
                description: request.description.clone(),
                required_capabilities: request.required_capabilities.clone(),
                budget: request.budget.clone(),
            }),
        );
        self.events.publish(FleetEvent::TaskAwarded {
            task_id: task_id.clone(),
            agent_id: winner.clone(),
            timestamp: Utc::now(),
        });
        self.orchestrator.send(OrchestratorMsg::TaskReadyForDispatch {
            task_id,
            agent_id: winner,
        });
    }

    fn fail_task(&self, task_id: &str, reason: &str, unmet_capabilities: Vec<String>) {
        self.orchestrator.task_failed(TaskFailed {
            task_id: task_id.to_string(),
            reason: reason.to_string(),
            unmet_capabilities,
        });
    }
}

/// Lexicographic bid ranking: fitness descending, active-task count
/// ascending, estimated duration ascending, agent id as the deterministic
/// tiebreak.
fn rank_bids(a: &Bid, b: &Bid) -> Ordering {
    b.fitness
        .partial_cmp(&a.fitness)
        .unwrap_or(Ordering::Equal)
        .then(a.active_task_count.cmp(&b.active_task_count))
        .then(a.estimated_duration_ms.cmp(&b.estimated_duration_ms))
        .then(a.agent_id.cmp(&b.agent_id))
}
