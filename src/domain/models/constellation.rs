//! Constellation (C8): the task DAG container and its invariant-preserving
//! operations.
//!
//! All mutation methods here are synchronous and return `Result<_, DagError>`;
//! none of them touch the network or the device registry — `Constellation` is
//! pure domain state. The scheduler (C10) and editor (C9) are the only
//! callers.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::error::DagError;

use super::edge::DependencyEdge;
use super::task::{TaskNode, TaskNodeStatus, TaskPriority};

/// Aggregate state of a constellation, recomputed after every task
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstellationState {
    Created,
    Ready,
    Executing,
    Completed,
    Failed,
    PartiallyFailed,
}

impl ConstellationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::PartiallyFailed => "partially_failed",
        }
    }
}

/// Summary statistics returned by `Constellation::statistics`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstellationStats {
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub running: usize,
    pub pending: usize,
    pub longest_path_len: usize,
    pub max_width: usize,
    /// total work (task count) / critical path length; 0.0 when empty.
    pub parallelism_ratio: f64,
}

/// A DAG of tasks with typed dependency edges, plus its aggregate state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constellation {
    pub constellation_id: Uuid,
    pub name: String,
    pub tasks: HashMap<Uuid, TaskNode>,
    pub edges: HashMap<Uuid, DependencyEdge>,
    pub state: ConstellationState,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Constellation {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            constellation_id: Uuid::new_v4(),
            name: name.into(),
            tasks: HashMap::new(),
            edges: HashMap::new(),
            state: ConstellationState::Created,
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    // ---- Task mutation --------------------------------------------------

    pub fn add_task(&mut self, task: TaskNode) -> Result<Uuid, DagError> {
        if self.tasks.contains_key(&task.task_id) {
            return Err(DagError::DuplicateTask(task.task_id));
        }
        let id = task.task_id;
        self.tasks.insert(id, task);
        self.touch();
        self.recompute_state();
        Ok(id)
    }

    pub fn remove_task(&mut self, task_id: Uuid) -> Result<(), DagError> {
        let task = self.tasks.get(&task_id).ok_or(DagError::TaskNotFound(task_id))?;
        if task.status == TaskNodeStatus::Running || task.status.is_terminal() {
            return Err(DagError::TaskNotRemovable(task_id));
        }

        let incoming: Vec<Uuid> = task.incoming_deps.clone();
        let outgoing: Vec<Uuid> = task.outgoing_deps.clone();
        for edge_id in incoming.into_iter().chain(outgoing) {
            self.remove_edge_unchecked(edge_id);
        }

        self.tasks.remove(&task_id);
        self.touch();
        self.recompute_state();
        Ok(())
    }

    /// Apply a partial update to a task. Rejects mutation of a `Running`
    /// task. The closure receives a mutable reference to the task; it should
    /// not set `status` directly — that's reserved for `mark_started` /
    /// `mark_completed`.
    pub fn update_task(
        &mut self,
        task_id: Uuid,
        patch: impl FnOnce(&mut TaskNode),
    ) -> Result<(), DagError> {
        let task = self.tasks.get_mut(&task_id).ok_or(DagError::TaskNotFound(task_id))?;
        if task.status == TaskNodeStatus::Running {
            return Err(DagError::TaskRunning(task_id));
        }
        patch(task);
        task.updated_at = Utc::now();
        self.touch();
        Ok(())
    }

    // ---- Edge mutation ----------------------------------------------------

    pub fn add_edge(&mut self, edge: DependencyEdge) -> Result<Uuid, DagError> {
        if edge.from_task_id == edge.to_task_id {
            return Err(DagError::SelfLoop(edge.from_task_id));
        }
        if !self.tasks.contains_key(&edge.from_task_id) {
            return Err(DagError::MissingEndpoint(edge.from_task_id));
        }
        if !self.tasks.contains_key(&edge.to_task_id) {
            return Err(DagError::MissingEndpoint(edge.to_task_id));
        }
        if self.would_create_cycle(edge.from_task_id, edge.to_task_id) {
            return Err(DagError::CycleDetected);
        }

        let id = edge.edge_id;
        self.tasks.get_mut(&edge.from_task_id).unwrap().outgoing_deps.push(id);
        self.tasks.get_mut(&edge.to_task_id).unwrap().incoming_deps.push(id);
        self.edges.insert(id, edge);
        self.touch();
        Ok(id)
    }

    pub fn remove_edge(&mut self, edge_id: Uuid) -> Result<(), DagError> {
        let edge = self.edges.get(&edge_id).ok_or(DagError::EdgeNotFound(edge_id))?;
        let to = edge.to_task_id;
        if let Some(target) = self.tasks.get(&to) {
            if target.status == TaskNodeStatus::Running {
                return Err(DagError::TaskRunning(to));
            }
        }
        self.remove_edge_unchecked(edge_id);
        self.touch();
        Ok(())
    }

    fn remove_edge_unchecked(&mut self, edge_id: Uuid) {
        if let Some(edge) = self.edges.remove(&edge_id) {
            if let Some(from) = self.tasks.get_mut(&edge.from_task_id) {
                from.outgoing_deps.retain(|e| *e != edge_id);
            }
            if let Some(to) = self.tasks.get_mut(&edge.to_task_id) {
                to.incoming_deps.retain(|e| *e != edge_id);
            }
        }
    }

    /// DFS from `to_task_id` along outgoing edges, looking for `from_task_id`;
    /// if found, adding `from_task_id -> to_task_id` would close a cycle.
    fn would_create_cycle(&self, from_task_id: Uuid, to_task_id: Uuid) -> bool {
        let mut stack = vec![to_task_id];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == from_task_id {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(task) = self.tasks.get(&current) {
                for edge_id in &task.outgoing_deps {
                    if let Some(edge) = self.edges.get(edge_id) {
                        stack.push(edge.to_task_id);
                    }
                }
            }
        }
        false
    }

    // ---- Ordering & readiness ---------------------------------------------

    /// Kahn's algorithm producing a total order across present nodes, with a
    /// stable tie-break of (priority desc, created_at asc, task_id asc).
    pub fn topological_order(&self) -> Result<Vec<Uuid>, DagError> {
        let mut in_degree: HashMap<Uuid, usize> = HashMap::new();
        for (id, task) in &self.tasks {
            in_degree.insert(*id, task.incoming_deps.len());
        }

        let mut ready: Vec<Uuid> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| *id)
            .collect();
        self.sort_by_key(&mut ready);

        let mut result = Vec::with_capacity(self.tasks.len());
        let mut frontier: VecDeque<Uuid> = ready.into_iter().collect();

        while let Some(id) = frontier.pop_front() {
            result.push(id);
            let task = &self.tasks[&id];
            let mut newly_ready = Vec::new();
            for edge_id in &task.outgoing_deps {
                let to = self.edges[edge_id].to_task_id;
                let deg = in_degree.get_mut(&to).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    newly_ready.push(to);
                }
            }
            self.sort_by_key(&mut newly_ready);
            for id in newly_ready {
                frontier.push_back(id);
            }
        }

        if result.len() != self.tasks.len() {
            return Err(DagError::CycleDetected);
        }
        Ok(result)
    }

    fn sort_by_key(&self, ids: &mut [Uuid]) {
        ids.sort_by_key(|id| self.tasks[id].order_key());
    }

    /// Tasks whose status is Pending/WaitingDependency and whose every
    /// incoming edge is satisfied.
    pub fn ready_tasks(&mut self) -> Vec<Uuid> {
        let candidate_ids: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|(_, t)| t.status.is_ready_candidate())
            .map(|(id, _)| *id)
            .collect();

        let mut ready = Vec::new();
        for task_id in candidate_ids {
            let incoming: Vec<Uuid> = self.tasks[&task_id].incoming_deps.clone();
            let mut all_satisfied = true;
            for edge_id in incoming {
                let (from_status, from_result) = {
                    let edge = &self.edges[&edge_id];
                    let source = &self.tasks[&edge.from_task_id];
                    (source.status, source.result.clone())
                };
                let satisfied = self
                    .edges
                    .get_mut(&edge_id)
                    .unwrap()
                    .evaluate(from_status, from_result.as_ref());
                if !satisfied {
                    all_satisfied = false;
                }
            }
            if all_satisfied {
                ready.push(task_id);
            }
        }

        self.sort_by_key(&mut ready);
        ready
    }

    // ---- Status transitions -------------------------------------------------

    pub fn mark_started(&mut self, task_id: Uuid) -> Result<(), DagError> {
        let task = self.tasks.get_mut(&task_id).ok_or(DagError::TaskNotFound(task_id))?;
        if !task.status.is_ready_candidate() {
            return Err(DagError::InvalidStartState(task_id, task.status.as_str().to_string()));
        }
        task.status = TaskNodeStatus::Running;
        task.started_at = Some(Utc::now());
        task.updated_at = Utc::now();
        self.touch();
        self.recompute_state();
        Ok(())
    }

    pub fn mark_completed(
        &mut self,
        task_id: Uuid,
        success: bool,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), DagError> {
        let task = self.tasks.get_mut(&task_id).ok_or(DagError::TaskNotFound(task_id))?;
        if task.status != TaskNodeStatus::Running {
            return Err(DagError::InvalidCompleteState(task_id, task.status.as_str().to_string()));
        }
        task.status = if success { TaskNodeStatus::Completed } else { TaskNodeStatus::Failed };
        task.result = result;
        task.error = error;
        task.ended_at = Some(Utc::now());
        task.updated_at = Utc::now();
        self.touch();
        self.recompute_state();
        Ok(())
    }

    /// Mark a non-terminal task `Cancelled` (used by scheduler cancellation
    /// and by the "unreachable predicate" policy for tasks no edge can ever
    /// satisfy).
    pub fn mark_cancelled(&mut self, task_id: Uuid) -> Result<(), DagError> {
        let task = self.tasks.get_mut(&task_id).ok_or(DagError::TaskNotFound(task_id))?;
        if task.status.is_terminal() {
            return Ok(());
        }
        task.status = TaskNodeStatus::Cancelled;
        task.ended_at = Some(Utc::now());
        task.updated_at = Utc::now();
        self.touch();
        self.recompute_state();
        Ok(())
    }

    /// Recompute `state` from task statuses.
    pub fn recompute_state(&mut self) {
        let total = self.tasks.len();
        if total == 0 {
            self.state = ConstellationState::Created;
            return;
        }

        let mut terminal = 0usize;
        let mut succeeded = 0usize;
        let mut failed = 0usize;
        let mut running = 0usize;
        for task in self.tasks.values() {
            match task.status {
                TaskNodeStatus::Completed => {
                    terminal += 1;
                    succeeded += 1;
                }
                TaskNodeStatus::Failed | TaskNodeStatus::Cancelled => {
                    terminal += 1;
                    failed += 1;
                }
                TaskNodeStatus::Running => running += 1,
                _ => {}
            }
        }

        self.state = if terminal == total {
            if failed == 0 {
                ConstellationState::Completed
            } else if succeeded == 0 {
                ConstellationState::Failed
            } else {
                ConstellationState::PartiallyFailed
            }
        } else if running > 0 {
            ConstellationState::Executing
        } else {
            ConstellationState::Ready
        };
    }

    pub fn is_complete(&self) -> bool {
        matches!(
            self.state,
            ConstellationState::Completed | ConstellationState::Failed | ConstellationState::PartiallyFailed
        )
    }

    // ---- Statistics ---------------------------------------------------------

    pub fn statistics(&self) -> ConstellationStats {
        let mut stats = ConstellationStats { total_tasks: self.tasks.len(), ..Default::default() };
        for task in self.tasks.values() {
            match task.status {
                TaskNodeStatus::Completed => stats.completed += 1,
                TaskNodeStatus::Failed => stats.failed += 1,
                TaskNodeStatus::Cancelled => stats.cancelled += 1,
                TaskNodeStatus::Running => stats.running += 1,
                _ => stats.pending += 1,
            }
        }

        let (longest, width) = self.longest_path_and_width();
        stats.longest_path_len = longest;
        stats.max_width = width;
        stats.parallelism_ratio = if longest > 0 {
            stats.total_tasks as f64 / longest as f64
        } else {
            0.0
        };
        stats
    }

    fn longest_path_and_width(&self) -> (usize, usize) {
        let Ok(order) = self.topological_order() else {
            return (0, 0);
        };
        let mut dist: HashMap<Uuid, usize> = HashMap::new();
        for id in &order {
            dist.insert(*id, 1);
        }
        for id in &order {
            let task = &self.tasks[id];
            let d = dist[id];
            for edge_id in &task.outgoing_deps {
                let to = self.edges[edge_id].to_task_id;
                let entry = dist.entry(to).or_insert(1);
                if d + 1 > *entry {
                    *entry = d + 1;
                }
            }
        }
        let longest = dist.values().copied().max().unwrap_or(0);

        // Width: bucket nodes by longest-path-from-root depth, take the max bucket size.
        let mut width_by_depth: HashMap<usize, usize> = HashMap::new();
        for depth in dist.values() {
            *width_by_depth.entry(*depth).or_insert(0) += 1;
        }
        let width = width_by_depth.values().copied().max().unwrap_or(0);
        (longest, width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::edge::EdgeKind;

    fn task(name: &str) -> TaskNode {
        TaskNode::new(name, "d", 30)
    }

    #[test]
    fn add_and_remove_task() {
        let mut c = Constellation::new("c");
        let id = c.add_task(task("a")).unwrap();
        assert_eq!(c.tasks.len(), 1);
        c.remove_task(id).unwrap();
        assert!(c.tasks.is_empty());
    }

    #[test]
    fn duplicate_task_rejected() {
        let mut c = Constellation::new("c");
        let mut t = task("a");
        let id = t.task_id;
        c.add_task(t.clone()).unwrap();
        t.task_id = id;
        assert_eq!(c.add_task(t).unwrap_err(), DagError::DuplicateTask(id));
    }

    #[test]
    fn self_loop_rejected() {
        let mut c = Constellation::new("c");
        let id = c.add_task(task("a")).unwrap();
        let edge = DependencyEdge::new(id, id, EdgeKind::Unconditional);
        assert_eq!(c.add_edge(edge).unwrap_err(), DagError::SelfLoop(id));
    }

    #[test]
    fn cycle_rejected() {
        let mut c = Constellation::new("c");
        let a = c.add_task(task("a")).unwrap();
        let b = c.add_task(task("b")).unwrap();
        c.add_edge(DependencyEdge::new(a, b, EdgeKind::Unconditional)).unwrap();
        let back = DependencyEdge::new(b, a, EdgeKind::Unconditional);
        assert_eq!(c.add_edge(back).unwrap_err(), DagError::CycleDetected);
    }

    #[test]
    fn remove_task_cascades_edges() {
        let mut c = Constellation::new("c");
        let a = c.add_task(task("a")).unwrap();
        let b = c.add_task(task("b")).unwrap();
        let edge_id = c.add_edge(DependencyEdge::new(a, b, EdgeKind::Unconditional)).unwrap();
        c.remove_task(b).unwrap();
        assert!(!c.edges.contains_key(&edge_id));
        assert!(c.tasks[&a].outgoing_deps.is_empty());
    }

    #[test]
    fn linear_pipeline_ready_tasks_and_state() {
        let mut c = Constellation::new("c");
        let a = c.add_task(task("a")).unwrap();
        let b = c.add_task(task("b")).unwrap();
        c.add_edge(DependencyEdge::new(a, b, EdgeKind::SuccessOnly)).unwrap();

        assert_eq!(c.ready_tasks(), vec![a]);
        c.mark_started(a).unwrap();
        assert_eq!(c.state, ConstellationState::Executing);
        c.mark_completed(a, true, None, None).unwrap();
        assert_eq!(c.ready_tasks(), vec![b]);
        c.mark_started(b).unwrap();
        c.mark_completed(b, true, None, None).unwrap();
        assert_eq!(c.state, ConstellationState::Completed);
    }

    #[test]
    fn partially_failed_when_mixed_terminal_outcomes() {
        let mut c = Constellation::new("c");
        let a = c.add_task(task("a")).unwrap();
        let b = c.add_task(task("b")).unwrap();
        c.mark_started(a).unwrap();
        c.mark_completed(a, true, None, None).unwrap();
        c.mark_started(b).unwrap();
        c.mark_completed(b, false, None, Some("boom".into())).unwrap();
        assert_eq!(c.state, ConstellationState::PartiallyFailed);
    }

    #[test]
    fn running_task_cannot_be_updated_or_removed() {
        let mut c = Constellation::new("c");
        let a = c.add_task(task("a")).unwrap();
        c.mark_started(a).unwrap();
        assert_eq!(c.update_task(a, |_| {}).unwrap_err(), DagError::TaskRunning(a));
        assert_eq!(c.remove_task(a).unwrap_err(), DagError::TaskNotRemovable(a));
    }

    #[test]
    fn topological_order_respects_priority_tie_break() {
        let mut c = Constellation::new("c");
        let low = c.add_task(task("low").with_priority(TaskPriority::Low)).unwrap();
        let crit = c.add_task(task("crit").with_priority(TaskPriority::Critical)).unwrap();
        let order = c.topological_order().unwrap();
        let pos_crit = order.iter().position(|id| *id == crit).unwrap();
        let pos_low = order.iter().position(|id| *id == low).unwrap();
        assert!(pos_crit < pos_low);
    }
}
