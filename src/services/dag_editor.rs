//! Command-journaling DAG mutation with undo/redo.
//!
//! One logical writer: all mutation goes through `DagEditor`, which holds
//! the `Constellation` behind a single lock so the scheduler (reading ready
//! sets) and an external Planner (issuing edits) never observe a torn DAG.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};

use crate::domain::error::EditorError;
use crate::domain::models::command::{EditorCommand, UndoEntry};
use crate::domain::models::{Constellation, ConstellationState, TaskNode, TaskNodeStatus};

use super::event_bus::{CoreEvent, EventBus};

type Observer = Box<dyn Fn(&Constellation, &str, &Result<(), EditorError>) + Send + Sync>;

pub struct DagEditor {
    constellation: RwLock<Constellation>,
    undo_stack: Mutex<VecDeque<(EditorCommand, UndoEntry)>>,
    redo_stack: Mutex<VecDeque<(EditorCommand, UndoEntry)>>,
    max_history_size: usize,
    observers: Mutex<Vec<Observer>>,
    event_bus: Arc<EventBus>,
}

impl DagEditor {
    pub fn new(constellation: Constellation, max_history_size: usize, event_bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            constellation: RwLock::new(constellation),
            undo_stack: Mutex::new(VecDeque::new()),
            redo_stack: Mutex::new(VecDeque::new()),
            max_history_size,
            observers: Mutex::new(Vec::new()),
            event_bus,
        })
    }

    pub fn add_observer(&self, observer: Observer) {
        self.observers.lock().unwrap().push(observer);
    }

    pub fn view(&self) -> Constellation {
        self.constellation.read().unwrap().clone()
    }

    /// Serialize the live constellation to an in-memory JSON blob. A plain
    /// read: pair with `do_command(EditorCommand::Save, ..)` only if the
    /// checkpoint itself needs to show up in the undo/redo history.
    pub fn to_blob(&self) -> serde_json::Value {
        crate::domain::models::persistence::to_blob(&self.constellation.read().unwrap())
    }

    /// Direct access to the live constellation for the scheduler's
    /// status-transition calls (`mark_started`/`mark_completed`/
    /// `mark_cancelled`), which are scheduler-owned rather than
    /// Planner-editable and so bypass the undo/redo journal entirely.
    pub fn with_constellation_mut<R>(&self, f: impl FnOnce(&mut Constellation) -> R) -> R {
        let mut constellation = self.constellation.write().unwrap();
        let before = constellation.state;
        let result = f(&mut constellation);
        self.publish_state_change(before, &constellation);
        result
    }

    /// Publishes `ConstellationStateChanged` iff the aggregate state actually
    /// moved; most mutations don't flip it (e.g. adding a second `Pending`
    /// task to an already-`Ready` constellation).
    fn publish_state_change(&self, before: ConstellationState, constellation: &Constellation) {
        if constellation.state != before {
            self.event_bus.publish(CoreEvent::ConstellationStateChanged {
                constellation_id: constellation.constellation_id,
                from: before.as_str().to_string(),
                to: constellation.state.as_str().to_string(),
            });
        }
    }

    /// Execute a new command. Clears the redo stack on success: once a fresh
    /// edit is made, previously undone commands are no longer redoable. A
    /// command that fails leaves the DAG unchanged and is not pushed.
    pub fn do_command(&self, command: EditorCommand, description: &str) -> Result<(), EditorError> {
        let result = self.apply(command.clone()).map(|undo_entry| {
            self.push_undo(command, undo_entry);
            self.redo_stack.lock().unwrap().clear();
        });
        self.notify(description, &result);
        result
    }

    pub fn undo(&self) -> Result<(), EditorError> {
        let Some((command, undo_entry)) = self.undo_stack.lock().unwrap().pop_back() else {
            return Err(EditorError::NothingToUndo);
        };
        let result = self.apply_undo(&undo_entry);
        match &result {
            Ok(()) => {
                self.redo_stack.lock().unwrap().push_back((command, undo_entry));
            }
            Err(_) => {
                self.undo_stack.lock().unwrap().push_back((command, undo_entry));
            }
        }
        self.notify("undo", &result);
        result
    }

    pub fn redo(&self) -> Result<(), EditorError> {
        let Some((command, _)) = self.redo_stack.lock().unwrap().pop_back() else {
            return Err(EditorError::NothingToRedo);
        };
        let result = self.apply(command.clone()).map(|undo_entry| {
            self.push_undo(command, undo_entry);
        });
        self.notify("redo", &result);
        result
    }

    fn push_undo(&self, command: EditorCommand, undo_entry: UndoEntry) {
        let mut stack = self.undo_stack.lock().unwrap();
        stack.push_back((command, undo_entry));
        while stack.len() > self.max_history_size {
            stack.pop_front();
        }
    }

    fn notify(&self, description: &str, result: &Result<(), EditorError>) {
        let constellation = self.constellation.read().unwrap();
        for observer in self.observers.lock().unwrap().iter() {
            observer(&constellation, description, result);
        }
        if result.is_ok() {
            self.event_bus.publish(CoreEvent::ConstellationMutated {
                constellation_id: constellation.constellation_id,
                summary: description.to_string(),
            });
        }
    }

    /// Apply one command, returning its inverse for the undo stack.
    fn apply(&self, command: EditorCommand) -> Result<UndoEntry, EditorError> {
        let mut constellation = self.constellation.write().unwrap();
        let before = constellation.state;
        let outcome = self.apply_command(&mut constellation, command);
        if outcome.is_ok() {
            self.publish_state_change(before, &constellation);
        }
        outcome
    }

    fn apply_command(&self, constellation: &mut Constellation, command: EditorCommand) -> Result<UndoEntry, EditorError> {
        match command {
            EditorCommand::AddTask(task) => {
                let task_id = constellation.add_task(task)?;
                Ok(UndoEntry::RemoveTask(task_id))
            }
            EditorCommand::RemoveTask(task_id) => {
                let task = constellation.tasks.get(&task_id).cloned().ok_or_else(|| {
                    EditorError::Dag(crate::domain::error::DagError::TaskNotFound(task_id))
                })?;
                let edges: Vec<_> = task
                    .incoming_deps
                    .iter()
                    .chain(task.outgoing_deps.iter())
                    .filter_map(|edge_id| constellation.edges.get(edge_id).cloned())
                    .collect();
                constellation.remove_task(task_id)?;
                Ok(UndoEntry::RestoreTask(Box::new(task), edges))
            }
            EditorCommand::UpdateTask { task_id, patch } => {
                if constellation.tasks.get(&task_id).map(|t| t.status) == Some(TaskNodeStatus::Running) {
                    return Err(EditorError::IllegalState(task_id));
                }
                let mut inverse = None;
                constellation.update_task(task_id, |t| inverse = Some(patch.apply(t)))?;
                Ok(UndoEntry::UpdateTask { task_id, inverse_patch: inverse.unwrap_or_default() })
            }
            EditorCommand::AddEdge(edge) => {
                let edge_id = constellation.add_edge(edge)?;
                Ok(UndoEntry::RemoveEdge(edge_id))
            }
            EditorCommand::RemoveEdge(edge_id) => {
                let edge = constellation.edges.get(&edge_id).cloned().ok_or_else(|| {
                    EditorError::Dag(crate::domain::error::DagError::EdgeNotFound(edge_id))
                })?;
                constellation.remove_edge(edge_id)?;
                Ok(UndoEntry::RestoreEdge(Box::new(edge)))
            }
            EditorCommand::UpdateEdge { edge_id, patch } => {
                let edge = constellation.edges.get_mut(&edge_id).ok_or_else(|| {
                    EditorError::Dag(crate::domain::error::DagError::EdgeNotFound(edge_id))
                })?;
                let inverse_patch = patch.apply(edge);
                Ok(UndoEntry::UpdateEdge { edge_id, inverse_patch })
            }
            EditorCommand::BuildConstellation(built) => {
                if constellation.state == ConstellationState::Executing {
                    return Err(EditorError::CannotClearWhileExecuting);
                }
                let snapshot = constellation.clone();
                *constellation = *built;
                Ok(UndoEntry::RestoreConstellation(Box::new(snapshot)))
            }
            EditorCommand::ClearConstellation => {
                if constellation.state == ConstellationState::Executing {
                    return Err(EditorError::CannotClearWhileExecuting);
                }
                let snapshot = constellation.clone();
                *constellation = Constellation::new(snapshot.name.clone());
                Ok(UndoEntry::RestoreConstellation(Box::new(snapshot)))
            }
            EditorCommand::Load(blob) => {
                if constellation.state == ConstellationState::Executing {
                    return Err(EditorError::CannotClearWhileExecuting);
                }
                let snapshot = constellation.clone();
                *constellation = crate::domain::models::persistence::from_blob(blob).map_err(EditorError::LoadFailed)?;
                Ok(UndoEntry::RestoreConstellation(Box::new(snapshot)))
            }
            EditorCommand::Save => {
                // No mutation: the blob itself comes from `DagEditor::to_blob`.
                // Still journaled so a Planner's save checkpoints show up in
                // the undo/redo history like any other command.
                Ok(UndoEntry::RestoreConstellation(Box::new(constellation.clone())))
            }
        }
    }

    fn apply_undo(&self, undo_entry: &UndoEntry) -> Result<(), EditorError> {
        let mut constellation = self.constellation.write().unwrap();
        let before = constellation.state;
        self.apply_undo_entry(&mut constellation, undo_entry)?;
        self.publish_state_change(before, &constellation);
        Ok(())
    }

    fn apply_undo_entry(&self, constellation: &mut Constellation, undo_entry: &UndoEntry) -> Result<(), EditorError> {
        match undo_entry {
            UndoEntry::RemoveTask(task_id) => {
                constellation.remove_task(*task_id)?;
            }
            UndoEntry::RestoreTask(task, edges) => {
                restore_task(constellation, task)?;
                for edge in edges {
                    constellation.add_edge(edge.clone())?;
                }
            }
            UndoEntry::UpdateTask { task_id, inverse_patch } => {
                constellation.update_task(*task_id, |t| {
                    inverse_patch.apply(t);
                })?;
            }
            UndoEntry::RemoveEdge(edge_id) => {
                constellation.remove_edge(*edge_id)?;
            }
            UndoEntry::RestoreEdge(edge) => {
                constellation.add_edge((**edge).clone())?;
            }
            UndoEntry::UpdateEdge { edge_id, inverse_patch } => {
                let edge = constellation
                    .edges
                    .get_mut(edge_id)
                    .ok_or(crate::domain::error::DagError::EdgeNotFound(*edge_id))?;
                inverse_patch.apply(edge);
            }
            UndoEntry::RestoreConstellation(snapshot) => {
                *constellation = (**snapshot).clone();
            }
        }
        Ok(())
    }
}

/// Re-insert a task exactly as it was (bypassing the duplicate-id check,
/// which would otherwise never pass since `add_task` expects a fresh id).
fn restore_task(constellation: &mut Constellation, task: &TaskNode) -> Result<(), EditorError> {
    constellation.tasks.insert(task.task_id, task.clone());
    constellation.recompute_state();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::command::{EdgePatch, TaskPatch};
    use crate::domain::models::edge::{DependencyEdge, EdgeKind};

    fn task(name: &str) -> TaskNode {
        TaskNode::new(name, "d", 30)
    }

    fn editor_with(constellation: Constellation, max_history_size: usize) -> Arc<DagEditor> {
        DagEditor::new(constellation, max_history_size, Arc::new(EventBus::new(16)))
    }

    #[test]
    fn undo_redo_round_trip_for_add_task_and_edge() {
        let editor = editor_with(Constellation::new("c"), 100);
        let a = task("a");
        let b = task("b");
        let (id_a, id_b) = (a.task_id, b.task_id);

        editor.do_command(EditorCommand::AddTask(a), "add a").unwrap();
        editor.do_command(EditorCommand::AddTask(b), "add b").unwrap();
        editor
            .do_command(EditorCommand::AddEdge(DependencyEdge::new(id_a, id_b, EdgeKind::Unconditional)), "add edge")
            .unwrap();

        assert_eq!(editor.view().tasks.len(), 2);
        editor.undo().unwrap();
        assert_eq!(editor.view().edges.len(), 0);
        editor.undo().unwrap();
        assert_eq!(editor.view().tasks.len(), 1);
        assert!(!editor.view().tasks.contains_key(&id_b));

        editor.redo().unwrap();
        editor.redo().unwrap();
        assert_eq!(editor.view().tasks.len(), 2);
        assert_eq!(editor.view().edges.len(), 1);
    }

    #[test]
    fn new_command_after_undo_clears_redo_stack() {
        let editor = editor_with(Constellation::new("c"), 100);
        editor.do_command(EditorCommand::AddTask(task("a")), "add a").unwrap();
        editor.undo().unwrap();
        editor.do_command(EditorCommand::AddTask(task("c")), "add c").unwrap();
        assert_eq!(editor.redo().unwrap_err(), EditorError::NothingToRedo);
    }

    #[test]
    fn editing_a_running_task_is_blocked() {
        let editor = editor_with(Constellation::new("c"), 100);
        let a = task("a");
        let id = a.task_id;
        editor.do_command(EditorCommand::AddTask(a), "add a").unwrap();
        editor.constellation.write().unwrap().mark_started(id).unwrap();

        let patch = TaskPatch { name: Some("renamed".into()), ..Default::default() };
        let err = editor.do_command(EditorCommand::UpdateTask { task_id: id, patch }, "rename").unwrap_err();
        assert_eq!(err, EditorError::IllegalState(id));
    }

    #[test]
    fn clear_while_executing_is_rejected() {
        let editor = editor_with(Constellation::new("c"), 100);
        let a = task("a");
        let id = a.task_id;
        editor.do_command(EditorCommand::AddTask(a), "add a").unwrap();
        editor.constellation.write().unwrap().mark_started(id).unwrap();

        let err = editor.do_command(EditorCommand::ClearConstellation, "clear").unwrap_err();
        assert_eq!(err, EditorError::CannotClearWhileExecuting);
    }

    #[test]
    fn undo_stack_drops_oldest_beyond_max_history() {
        let editor = editor_with(Constellation::new("c"), 2);
        for i in 0..5 {
            editor.do_command(EditorCommand::AddTask(task(&format!("t{i}"))), "add").unwrap();
        }
        assert_eq!(editor.undo_stack.lock().unwrap().len(), 2);
    }

    #[test]
    fn update_edge_round_trips_through_undo() {
        let editor = editor_with(Constellation::new("c"), 100);
        let a = task("a");
        let b = task("b");
        let (id_a, id_b) = (a.task_id, b.task_id);
        editor.do_command(EditorCommand::AddTask(a), "add a").unwrap();
        editor.do_command(EditorCommand::AddTask(b), "add b").unwrap();
        let edge = DependencyEdge::new(id_a, id_b, EdgeKind::Unconditional);
        let edge_id = edge.edge_id;
        editor.do_command(EditorCommand::AddEdge(edge), "add edge").unwrap();

        let patch = EdgePatch { condition_description: Some(Some("renamed".into())), ..Default::default() };
        editor.do_command(EditorCommand::UpdateEdge { edge_id, patch }, "update edge").unwrap();
        assert_eq!(editor.view().edges[&edge_id].condition_description, Some("renamed".into()));

        editor.undo().unwrap();
        assert_eq!(editor.view().edges[&edge_id].condition_description, None);
    }

    #[test]
    fn save_then_load_restores_an_equivalent_constellation() {
        let editor = editor_with(Constellation::new("c"), 100);
        editor.do_command(EditorCommand::AddTask(task("a")), "add a").unwrap();
        let blob = editor.to_blob();

        editor.do_command(EditorCommand::AddTask(task("b")), "add b").unwrap();
        assert_eq!(editor.view().tasks.len(), 2);

        editor.do_command(EditorCommand::Load(blob), "reload checkpoint").unwrap();
        assert_eq!(editor.view().tasks.len(), 1);
    }

    #[test]
    fn load_of_a_malformed_blob_leaves_the_constellation_unchanged() {
        let editor = editor_with(Constellation::new("c"), 100);
        editor.do_command(EditorCommand::AddTask(task("a")), "add a").unwrap();
        let err = editor
            .do_command(EditorCommand::Load(serde_json::json!({"not": "a constellation"})), "bad load")
            .unwrap_err();
        assert!(matches!(err, EditorError::LoadFailed(_)));
        assert_eq!(editor.view().tasks.len(), 1);
    }

    #[test]
    fn build_constellation_while_executing_is_rejected() {
        let editor = editor_with(Constellation::new("c"), 100);
        let a = task("a");
        let id = a.task_id;
        editor.do_command(EditorCommand::AddTask(a), "add a").unwrap();
        editor.constellation.write().unwrap().mark_started(id).unwrap();

        let err = editor
            .do_command(EditorCommand::BuildConstellation(Box::new(Constellation::new("fresh"))), "rebuild")
            .unwrap_err();
        assert_eq!(err, EditorError::CannotClearWhileExecuting);
    }
}
