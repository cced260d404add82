//! Task node domain model (TaskStar in the source material's naming).
//!
//! A `TaskNode` is one node in a constellation's DAG: an atomic unit of work
//! targeted at one device.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Execution status of a task node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskNodeStatus {
    Pending,
    WaitingDependency,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl Default for TaskNodeStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskNodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::WaitingDependency => "waiting_dependency",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// `status in {Completed, Failed, Cancelled}` is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_ready_candidate(&self) -> bool {
        matches!(self, Self::Pending | Self::WaitingDependency)
    }
}

/// Priority level for task nodes, used to order ready sets and topological
/// tie-breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

/// A node in a constellation's task DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub task_id: Uuid,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tips: Vec<String>,
    pub target_device_id: Option<String>,
    pub device_type: Option<String>,
    #[serde(default)]
    pub required_capabilities: HashSet<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    pub timeout_s: u64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub current_retry: u32,
    #[serde(default)]
    pub task_data: Map<String, Value>,
    pub expected_output_type: Option<String>,
    #[serde(default)]
    pub status: TaskNodeStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Edge ids whose `to_task_id` is this task.
    #[serde(default)]
    pub incoming_deps: Vec<Uuid>,
    /// Edge ids whose `from_task_id` is this task.
    #[serde(default)]
    pub outgoing_deps: Vec<Uuid>,
}

impl TaskNode {
    pub fn new(name: impl Into<String>, description: impl Into<String>, timeout_s: u64) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            tips: Vec::new(),
            target_device_id: None,
            device_type: None,
            required_capabilities: HashSet::new(),
            priority: TaskPriority::default(),
            timeout_s,
            retry_count: 0,
            current_retry: 0,
            task_data: Map::new(),
            expected_output_type: None,
            status: TaskNodeStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            ended_at: None,
            created_at: now,
            updated_at: now,
            incoming_deps: Vec::new(),
            outgoing_deps: Vec::new(),
        }
    }

    pub fn with_target_device(mut self, device_id: impl Into<String>) -> Self {
        self.target_device_id = Some(device_id.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Stable tie-break key for topological ordering: (priority desc, created_at asc, task_id asc).
    pub fn order_key(&self) -> (std::cmp::Reverse<TaskPriority>, DateTime<Utc>, Uuid) {
        (std::cmp::Reverse(self.priority), self.created_at, self.task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_pending_with_no_timestamps() {
        let t = TaskNode::new("t1", "desc", 30);
        assert_eq!(t.status, TaskNodeStatus::Pending);
        assert!(t.started_at.is_none());
        assert!(t.ended_at.is_none());
    }

    #[test]
    fn terminal_statuses_are_identified() {
        assert!(TaskNodeStatus::Completed.is_terminal());
        assert!(TaskNodeStatus::Failed.is_terminal());
        assert!(TaskNodeStatus::Cancelled.is_terminal());
        assert!(!TaskNodeStatus::Running.is_terminal());
        assert!(!TaskNodeStatus::Pending.is_terminal());
    }

    #[test]
    fn order_key_prioritizes_critical_first() {
        let low = TaskNode::new("a", "d", 1).with_priority(TaskPriority::Low);
        let crit = TaskNode::new("b", "d", 1).with_priority(TaskPriority::Critical);
        assert!(crit.order_key() < low.order_key());
    }
}
