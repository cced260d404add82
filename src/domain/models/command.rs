//! Editor command journal types (C9).
//!
//! `EditorCommand` is the data a caller submits; `UndoEntry` is the inverse
//! the editor service records at apply time so it can be replayed on undo
//! without needing a second, hand-written "undo" implementation per command.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use serde_json::{Map, Value};

use super::constellation::Constellation;
use super::edge::DependencyEdge;
use super::task::{TaskNode, TaskPriority};

/// Sparse set of fields to overwrite on an edge; `None` leaves the field
/// untouched, mirroring `TaskPatch`. `condition_description` is doubly
/// wrapped since the field itself is optional: `Some(None)` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgePatch {
    pub condition_description: Option<Option<String>>,
    pub metadata: Option<Map<String, Value>>,
}

impl EdgePatch {
    /// Apply this patch to `edge`, returning the patch that would undo it.
    pub fn apply(&self, edge: &mut DependencyEdge) -> EdgePatch {
        let inverse = EdgePatch {
            condition_description: self.condition_description.is_some().then(|| edge.condition_description.clone()),
            metadata: self.metadata.is_some().then(|| edge.metadata.clone()),
        };
        if let Some(description) = self.condition_description.clone() {
            edge.condition_description = description;
        }
        if let Some(metadata) = self.metadata.clone() {
            edge.metadata = metadata;
        }
        inverse
    }
}

/// Sparse set of fields to overwrite on a task; `None` leaves the field
/// untouched. Used by both `UpdateTask` and its recorded undo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub timeout_s: Option<u64>,
    pub retry_count: Option<u32>,
}

impl TaskPatch {
    /// Apply this patch to `task`, returning the patch that would undo it.
    pub fn apply(&self, task: &mut TaskNode) -> TaskPatch {
        let inverse = TaskPatch {
            name: self.name.is_some().then(|| task.name.clone()),
            description: self.description.is_some().then(|| task.description.clone()),
            priority: self.priority.is_some().then_some(task.priority),
            timeout_s: self.timeout_s.is_some().then_some(task.timeout_s),
            retry_count: self.retry_count.is_some().then_some(task.retry_count),
        };
        if let Some(name) = &self.name {
            task.name = name.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(timeout_s) = self.timeout_s {
            task.timeout_s = timeout_s;
        }
        if let Some(retry_count) = self.retry_count {
            task.retry_count = retry_count;
        }
        inverse
    }
}

/// An editor-level intent, submitted to the `DagEditor` service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EditorCommand {
    AddTask(TaskNode),
    RemoveTask(Uuid),
    UpdateTask { task_id: Uuid, patch: TaskPatch },
    AddEdge(DependencyEdge),
    RemoveEdge(Uuid),
    UpdateEdge { edge_id: Uuid, patch: EdgePatch },
    /// Replace the whole constellation with a freshly assembled one (tasks
    /// and edges supplied together, rather than one `AddTask`/`AddEdge` at a
    /// time) while keeping the existing constellation's identity and undo
    /// history.
    BuildConstellation(Box<Constellation>),
    ClearConstellation,
    /// Replace the live constellation with one decoded from a JSON blob.
    Load(Value),
    /// Serialize the live constellation to a JSON blob. A no-op mutation:
    /// its `UndoEntry` just restores whatever was live before, so `undo`
    /// after a `Save` is a no-op rather than an error.
    Save,
}

/// The inverse of an applied `EditorCommand`, pushed onto the undo stack.
/// Applying an `UndoEntry` exactly reverses the command that produced it.
#[derive(Debug, Clone)]
pub enum UndoEntry {
    RemoveTask(Uuid),
    RestoreTask(Box<TaskNode>, Vec<DependencyEdge>),
    UpdateTask { task_id: Uuid, inverse_patch: TaskPatch },
    RemoveEdge(Uuid),
    RestoreEdge(Box<DependencyEdge>),
    UpdateEdge { edge_id: Uuid, inverse_patch: EdgePatch },
    RestoreConstellation(Box<Constellation>),
}
