// Graph State
// The orchestrator's owned view of one submitted task graph: validation,
// ready-set computation, decomposition insertion, cancellation traversal,
// and the completion ledger. Pure state transitions; no channels here.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use murmur_types::{
    ProposedSubplan, StopCondition, TaskBudget, TaskGraph, TaskStatus,
};

/// One node as tracked by the orchestrator.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub id: String,
    pub description: String,
    pub required_capabilities: Vec<String>,
    pub budget: Option<TaskBudget>,
    pub status: TaskStatus,
    pub depth: u32,
    pub assigned_agent: Option<String>,
    /// Decomposition parent, when this node is a subtask
    pub parent: Option<String>,
    /// Decomposition children, when this node decomposed
    pub children: Vec<String>,
    pub stop_condition: StopCondition,
    /// Agent owed a `SubtasksCompleted` once the children settle
    pub decomposed_by: Option<String>,
    /// `UserDecision` stop condition: set once the external message arrives
    pub user_decision_received: bool,
    pub summary: String,
}

impl NodeRecord {
    fn success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// A node cancelled during dependent traversal, with the agent holding it
/// if it was dispatched.
#[derive(Debug, Clone)]
pub struct CancelledNode {
    pub task_id: String,
    pub assigned_agent: Option<String>,
}

#[derive(Debug)]
pub struct GraphState {
    pub id: String,
    pub budget: Option<TaskBudget>,
    nodes: Vec<NodeRecord>,
    index: HashMap<String, usize>,
    edges_out: HashMap<String, Vec<String>>,
    edges_in: HashMap<String, Vec<String>>,
    /// Count of edges retained at submission plus decomposition inserts
    edge_count: usize,
    pub deadline_fired: bool,
}

impl GraphState {
    /// Validate a submitted graph and build the tracked state.
    ///
    /// Rejections: duplicate node ids ("duplicate id") and cyclic edge
    /// relations ("cycle detected"). Edges naming unknown endpoints are
    /// silently dropped; the returned count says how many were.
    pub fn build(graph: TaskGraph) -> Result<(GraphState, usize), String> {
        let id = if graph.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            graph.id
        };

        let mut index = HashMap::new();
        for (i, node) in graph.nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(format!("duplicate id: {}", node.id));
            }
        }

        let mut edges_out: HashMap<String, Vec<String>> = HashMap::new();
        let mut edges_in: HashMap<String, Vec<String>> = HashMap::new();
        let mut retained = 0usize;
        let mut dropped = 0usize;
        for edge in &graph.edges {
            if index.contains_key(&edge.from) && index.contains_key(&edge.to) {
                edges_out
                    .entry(edge.from.clone())
                    .or_default()
                    .push(edge.to.clone());
                edges_in
                    .entry(edge.to.clone())
                    .or_default()
                    .push(edge.from.clone());
                retained += 1;
            } else {
                dropped += 1;
            }
        }

        if Self::has_cycle(&index, &edges_out) {
            return Err("cycle detected".to_string());
        }

        let nodes = graph
            .nodes
            .into_iter()
            .map(|node| {
                let in_degree = edges_in.get(&node.id).map(Vec::len).unwrap_or(0);
                NodeRecord {
                    status: if in_degree == 0 {
                        TaskStatus::Ready
                    } else {
                        TaskStatus::Pending
                    },
                    id: node.id,
                    description: node.description,
                    required_capabilities: node.required_capabilities,
                    budget: node.budget,
                    depth: 0,
                    assigned_agent: None,
                    parent: None,
                    children: Vec::new(),
                    stop_condition: StopCondition::default(),
                    decomposed_by: None,
                    user_decision_received: false,
                    summary: String::new(),
                }
            })
            .collect();

        Ok((
            GraphState {
                id,
                budget: graph.budget,
                nodes,
                index,
                edges_out,
                edges_in,
                edge_count: retained,
                deadline_fired: false,
            },
            dropped,
        ))
    }

    fn has_cycle(index: &HashMap<String, usize>, edges_out: &HashMap<String, Vec<String>>) -> bool {
        // Kahn's algorithm over the retained edges.
        let mut in_degree: HashMap<&str, usize> =
            index.keys().map(|id| (id.as_str(), 0)).collect();
        for targets in edges_out.values() {
            for to in targets {
                if let Some(count) = in_degree.get_mut(to.as_str()) {
                    *count += 1;
                }
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            if let Some(targets) = edges_out.get(id) {
                for to in targets {
                    if let Some(count) = in_degree.get_mut(to.as_str()) {
                        *count -= 1;
                        if *count == 0 {
                            queue.push_back(to.as_str());
                        }
                    }
                }
            }
        }
        visited != index.len()
    }

    pub fn node(&self, id: &str) -> Option<&NodeRecord> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut NodeRecord> {
        self.index.get(id).copied().map(move |i| &mut self.nodes[i])
    }

    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn ready_ids(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|node| node.status == TaskStatus::Ready)
            .map(|node| node.id.clone())
            .collect()
    }

    /// Transition a node. Terminal statuses are final: a transition out of
    /// one is refused and reported as `false`.
    pub fn set_status(&mut self, id: &str, status: TaskStatus) -> bool {
        match self.node_mut(id) {
            Some(node) if !node.status.is_terminal() => {
                node.status = status;
                true
            }
            _ => false,
        }
    }

    fn dependencies_satisfied(&self, id: &str) -> bool {
        self.edges_in
            .get(id)
            .map(|deps| {
                deps.iter()
                    .all(|dep| self.node(dep).map(NodeRecord::success).unwrap_or(false))
            })
            .unwrap_or(true)
    }

    /// Pending dependents of `completed_id` whose dependencies are now all
    /// satisfied become `Ready`; their ids are returned for dispatch.
    pub fn promote_ready_after(&mut self, completed_id: &str) -> Vec<String> {
        let dependents = self.edges_out.get(completed_id).cloned().unwrap_or_default();
        let mut promoted = Vec::new();
        for dependent in dependents {
            let pending = self
                .node(&dependent)
                .map(|n| n.status == TaskStatus::Pending)
                .unwrap_or(false);
            if pending && self.dependencies_satisfied(&dependent) {
                self.set_status(&dependent, TaskStatus::Ready);
                promoted.push(dependent);
            }
        }
        promoted
    }

    /// Validate and apply a decomposition proposal per the admission rules.
    ///
    /// Returns the inserted subtask ids in proposal order. On rejection the
    /// graph is unchanged and the reason is returned for the proposing agent.
    pub fn insert_subplan(
        &mut self,
        parent_id: &str,
        agent_id: &str,
        subplan: &ProposedSubplan,
        max_depth: u32,
        max_subtasks: usize,
        max_total_nodes: usize,
    ) -> Result<Vec<String>, String> {
        let parent_depth = match self.node(parent_id) {
            Some(parent) if parent.status == TaskStatus::Dispatched => parent.depth,
            Some(_) => return Err("parent is not dispatched".to_string()),
            None => return Err(format!("unknown parent task: {parent_id}")),
        };

        if parent_depth + 1 > max_depth {
            return Err(format!("decomposition too deep (max depth {max_depth})"));
        }
        if subplan.subtasks.len() > max_subtasks {
            return Err(format!(
                "too many subtasks ({} > {max_subtasks})",
                subplan.subtasks.len()
            ));
        }
        if self.nodes.len() + subplan.subtasks.len() > max_total_nodes {
            return Err(format!("graph node limit exceeded (max {max_total_nodes})"));
        }
        for (position, subtask) in subplan.subtasks.iter().enumerate() {
            if subtask.depends_on.iter().any(|&dep| dep >= position) {
                return Err(
                    "subplan dependencies must reference earlier subtasks".to_string()
                );
            }
        }

        let child_ids: Vec<String> = (0..subplan.subtasks.len())
            .map(|i| format!("{parent_id}/sub-{i}"))
            .collect();
        // Which subtasks some later subtask depends on; the rest are tails.
        let mut has_internal_dependent: HashSet<usize> = HashSet::new();
        for subtask in &subplan.subtasks {
            has_internal_dependent.extend(subtask.depends_on.iter().copied());
        }

        for (position, subtask) in subplan.subtasks.iter().enumerate() {
            let child_id = child_ids[position].clone();
            self.index.insert(child_id.clone(), self.nodes.len());
            self.nodes.push(NodeRecord {
                id: child_id.clone(),
                description: subtask.description.clone(),
                required_capabilities: subtask.required_capabilities.clone(),
                budget: subtask.budget.clone(),
                status: if subtask.depends_on.is_empty() {
                    TaskStatus::Ready
                } else {
                    TaskStatus::Pending
                },
                depth: parent_depth + 1,
                assigned_agent: None,
                parent: Some(parent_id.to_string()),
                children: Vec::new(),
                stop_condition: StopCondition::default(),
                decomposed_by: None,
                user_decision_received: false,
                summary: String::new(),
            });

            for &dep in &subtask.depends_on {
                self.add_edge(&child_ids[dep], &child_id);
            }
            if !has_internal_dependent.contains(&position) {
                self.add_edge(&child_id, parent_id);
            }
        }

        let stop_condition = subplan.stop_condition.unwrap_or_default();
        if let Some(parent) = self.node_mut(parent_id) {
            parent.status = TaskStatus::WaitingForSubtasks;
            parent.children = child_ids.clone();
            parent.stop_condition = stop_condition;
            parent.decomposed_by = Some(agent_id.to_string());
            parent.user_decision_received = false;
        }

        Ok(child_ids)
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        self.edges_out
            .entry(from.to_string())
            .or_default()
            .push(to.to_string());
        self.edges_in
            .entry(to.to_string())
            .or_default()
            .push(from.to_string());
        self.edge_count += 1;
    }

    /// Breadth-first cancellation of everything depending on `root`:
    /// outgoing-edge closures plus the subtask children of anything
    /// cancelled on the way. The edge a tail subtask carries back to its
    /// decomposition parent is NOT followed; a child's failure reaches its
    /// parent through sibling bookkeeping, not cancellation.
    pub fn cancel_dependents(&mut self, root: &str) -> Vec<CancelledNode> {
        let mut cancelled = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();

        self.enqueue_dependents(root, &mut queue, &mut seen);

        while let Some(id) = queue.pop_front() {
            let Some(node) = self.node(&id) else { continue };
            if !node.status.is_terminal() {
                let assigned_agent = node.assigned_agent.clone();
                self.set_status(&id, TaskStatus::Cancelled);
                cancelled.push(CancelledNode {
                    task_id: id.clone(),
                    assigned_agent,
                });
            }
            self.enqueue_dependents(&id, &mut queue, &mut seen);
        }
        cancelled
    }

    fn enqueue_dependents(
        &self,
        id: &str,
        queue: &mut VecDeque<String>,
        seen: &mut HashSet<String>,
    ) {
        let parent_of_id = self.node(id).and_then(|n| n.parent.clone());
        if let Some(targets) = self.edges_out.get(id) {
            for to in targets {
                if parent_of_id.as_deref() == Some(to.as_str()) {
                    continue;
                }
                if seen.insert(to.clone()) {
                    queue.push_back(to.clone());
                }
            }
        }
        if let Some(node) = self.node(id) {
            for child in &node.children {
                if seen.insert(child.clone()) {
                    queue.push_back(child.clone());
                }
            }
        }
    }

    pub fn all_terminal(&self) -> bool {
        self.nodes.iter().all(|node| node.status.is_terminal())
    }

    /// Completion ledger: `true` only for `Completed`.
    pub fn results(&self) -> BTreeMap<String, bool> {
        self.nodes
            .iter()
            .map(|node| (node.id.clone(), node.success()))
            .collect()
    }

    /// All of a parent's children have settled.
    pub fn children_all_terminal(&self, parent_id: &str) -> bool {
        self.node(parent_id)
            .map(|parent| {
                parent.children.iter().all(|child| {
                    self.node(child)
                        .map(|n| n.status.is_terminal())
                        .unwrap_or(true)
                })
            })
            .unwrap_or(false)
    }

    /// Non-terminal siblings of the parent's children, for `FirstSuccess`.
    pub fn unfinished_children(&self, parent_id: &str) -> Vec<String> {
        self.node(parent_id)
            .map(|parent| {
                parent
                    .children
                    .iter()
                    .filter(|child| {
                        self.node(child)
                            .map(|n| !n.status.is_terminal())
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Counts per status, for snapshots and the viewport.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct GraphProgress {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub dispatched: usize,
    pub waiting_for_subtasks: usize,
    pub synthesizing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl GraphProgress {
    pub fn of(graph: &GraphState) -> Self {
        let mut progress = GraphProgress {
            total: graph.node_count(),
            ..Default::default()
        };
        for node in graph.nodes() {
            match node.status {
                TaskStatus::Pending => progress.pending += 1,
                TaskStatus::Ready => progress.ready += 1,
                TaskStatus::Dispatched => progress.dispatched += 1,
                TaskStatus::WaitingForSubtasks => progress.waiting_for_subtasks += 1,
                TaskStatus::Synthesizing => progress.synthesizing += 1,
                TaskStatus::Completed => progress.completed += 1,
                TaskStatus::Failed => progress.failed += 1,
                TaskStatus::Cancelled => progress.cancelled += 1,
            }
        }
        progress
    }

    pub fn completion_fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_types::{SubtaskSpec, TaskEdge, TaskNode};

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> TaskGraph {
        TaskGraph {
            id: String::new(),
            nodes: nodes
                .iter()
                .map(|id| TaskNode::new(*id, format!("task {id}")))
                .collect(),
            edges: edges
                .iter()
                .map(|(from, to)| TaskEdge::new(*from, *to))
                .collect(),
            budget: None,
        }
    }

    fn subplan(specs: &[(&str, &[usize])]) -> ProposedSubplan {
        ProposedSubplan {
            reason: "split".to_string(),
            subtasks: specs
                .iter()
                .map(|(description, deps)| SubtaskSpec {
                    description: description.to_string(),
                    required_capabilities: Vec::new(),
                    depends_on: deps.to_vec(),
                    budget: None,
                })
                .collect(),
            stop_condition: None,
        }
    }

    #[test]
    fn duplicate_ids_rejected() {
        let result = GraphState::build(graph(&["a", "a"], &[]));
        assert!(result.unwrap_err().contains("duplicate id"));
    }

    #[test]
    fn cycles_rejected() {
        let result = GraphState::build(graph(&["a", "b"], &[("a", "b"), ("b", "a")]));
        assert!(result.unwrap_err().contains("cycle"));
    }

    #[test]
    fn unknown_edges_dropped_silently() {
        let (state, dropped) =
            GraphState::build(graph(&["a", "b"], &[("a", "b"), ("a", "ghost")])).unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(state.edge_count(), 1);
    }

    #[test]
    fn roots_start_ready_rest_pending() {
        let (state, _) = GraphState::build(graph(&["a", "b", "c"], &[("a", "b")])).unwrap();
        assert_eq!(state.node("a").unwrap().status, TaskStatus::Ready);
        assert_eq!(state.node("b").unwrap().status, TaskStatus::Pending);
        assert_eq!(state.node("c").unwrap().status, TaskStatus::Ready);
    }

    #[test]
    fn terminal_status_is_final() {
        let (mut state, _) = GraphState::build(graph(&["a"], &[])).unwrap();
        assert!(state.set_status("a", TaskStatus::Completed));
        assert!(!state.set_status("a", TaskStatus::Failed));
        assert_eq!(state.node("a").unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn completion_promotes_dependents() {
        let (mut state, _) =
            GraphState::build(graph(&["a", "b", "c"], &[("a", "c"), ("b", "c")])).unwrap();
        state.set_status("a", TaskStatus::Completed);
        assert!(state.promote_ready_after("a").is_empty());
        state.set_status("b", TaskStatus::Completed);
        assert_eq!(state.promote_ready_after("b"), vec!["c"]);
        assert_eq!(state.node("c").unwrap().status, TaskStatus::Ready);
    }

    #[test]
    fn subplan_insertion_wires_edges_and_parent() {
        let (mut state, _) = GraphState::build(graph(&["t1"], &[])).unwrap();
        state.set_status("t1", TaskStatus::Dispatched);
        let children = state
            .insert_subplan("t1", "agent-1", &subplan(&[("s1", &[]), ("s2", &[0])]), 3, 10, 100)
            .unwrap();
        assert_eq!(children, vec!["t1/sub-0", "t1/sub-1"]);
        assert_eq!(state.node("t1").unwrap().status, TaskStatus::WaitingForSubtasks);
        assert_eq!(state.node("t1/sub-0").unwrap().status, TaskStatus::Ready);
        assert_eq!(state.node("t1/sub-1").unwrap().status, TaskStatus::Pending);
        assert_eq!(state.node("t1/sub-0").unwrap().depth, 1);
        // sub-0 has an internal dependent, so only sub-1 is a tail.
        assert_eq!(state.node("t1").unwrap().children.len(), 2);
    }

    #[test]
    fn subplan_depth_cap() {
        let (mut state, _) = GraphState::build(graph(&["t1"], &[])).unwrap();
        state.node_mut("t1").unwrap().depth = 3;
        state.set_status("t1", TaskStatus::Dispatched);
        let err = state
            .insert_subplan("t1", "a", &subplan(&[("s", &[])]), 3, 10, 100)
            .unwrap_err();
        assert!(err.contains("too deep"));
        assert_eq!(state.node("t1").unwrap().status, TaskStatus::Dispatched);
    }

    #[test]
    fn subplan_fanout_and_total_caps() {
        let (mut state, _) = GraphState::build(graph(&["t1"], &[])).unwrap();
        state.set_status("t1", TaskStatus::Dispatched);
        let specs: Vec<(&str, &[usize])> = vec![("s", &[]); 3];
        assert!(state
            .insert_subplan("t1", "a", &subplan(&specs), 3, 2, 100)
            .unwrap_err()
            .contains("too many subtasks"));
        // 1 existing + 3 proposed over a limit of 4 is accepted exactly.
        assert!(state
            .insert_subplan("t1", "a", &subplan(&specs), 3, 10, 4)
            .is_ok());
        let (mut state, _) = GraphState::build(graph(&["t1"], &[])).unwrap();
        state.set_status("t1", TaskStatus::Dispatched);
        assert!(state
            .insert_subplan("t1", "a", &subplan(&specs), 3, 10, 3)
            .unwrap_err()
            .contains("node limit"));
    }

    #[test]
    fn subplan_forward_reference_rejected() {
        let (mut state, _) = GraphState::build(graph(&["t1"], &[])).unwrap();
        state.set_status("t1", TaskStatus::Dispatched);
        let err = state
            .insert_subplan("t1", "a", &subplan(&[("s1", &[1]), ("s2", &[])]), 3, 10, 100)
            .unwrap_err();
        assert!(err.contains("earlier subtasks"));
    }

    #[test]
    fn cancel_dependents_covers_transitive_closure() {
        let (mut state, _) = GraphState::build(
            graph(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("a", "d")]),
        )
        .unwrap();
        state.set_status("a", TaskStatus::Failed);
        let cancelled = state.cancel_dependents("a");
        let ids: Vec<&str> = cancelled.iter().map(|c| c.task_id.as_str()).collect();
        assert!(ids.contains(&"b"));
        assert!(ids.contains(&"c"));
        assert!(ids.contains(&"d"));
        assert_eq!(state.node("b").unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn cancel_skips_terminal_nodes() {
        let (mut state, _) = GraphState::build(graph(&["a", "b"], &[("a", "b")])).unwrap();
        state.set_status("b", TaskStatus::Completed);
        state.set_status("a", TaskStatus::Failed);
        let cancelled = state.cancel_dependents("a");
        assert!(cancelled.is_empty());
        assert_eq!(state.node("b").unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn failed_subtask_does_not_cancel_waiting_parent() {
        let (mut state, _) = GraphState::build(graph(&["t1"], &[])).unwrap();
        state.set_status("t1", TaskStatus::Dispatched);
        state
            .insert_subplan("t1", "a", &subplan(&[("s1", &[]), ("s2", &[])]), 3, 10, 100)
            .unwrap();
        state.set_status("t1/sub-0", TaskStatus::Failed);
        let cancelled = state.cancel_dependents("t1/sub-0");
        assert!(cancelled.is_empty());
        assert_eq!(
            state.node("t1").unwrap().status,
            TaskStatus::WaitingForSubtasks
        );
    }

    #[test]
    fn cancelling_parent_cancels_children() {
        let (mut state, _) =
            GraphState::build(graph(&["t0", "t1"], &[("t0", "t1")])).unwrap();
        state.set_status("t1", TaskStatus::Dispatched);
        state
            .insert_subplan("t1", "a", &subplan(&[("s1", &[])]), 3, 10, 100)
            .unwrap();
        state.set_status("t0", TaskStatus::Failed);
        let cancelled = state.cancel_dependents("t0");
        let ids: Vec<&str> = cancelled.iter().map(|c| c.task_id.as_str()).collect();
        assert!(ids.contains(&"t1"));
        assert!(ids.contains(&"t1/sub-0"));
    }

    #[test]
    fn empty_graph_is_terminal_with_empty_ledger() {
        let (state, _) = GraphState::build(graph(&[], &[])).unwrap();
        assert!(state.all_terminal());
        assert!(state.results().is_empty());
    }

    #[test]
    fn ledger_maps_only_completed_to_true() {
        let (mut state, _) = GraphState::build(graph(&["a", "b", "c"], &[])).unwrap();
        state.set_status("a", TaskStatus::Completed);
        state.set_status("b", TaskStatus::Failed);
        state.set_status("c", TaskStatus::Cancelled);
        let results = state.results();
        assert_eq!(results["a"], true);
        assert_eq!(results["b"], false);
        assert_eq!(results["c"], false);
    }
}
