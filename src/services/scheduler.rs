//! Ready-task selection, device assignment, and event-driven progression
//! over a constellation's DAG.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::info;
use uuid::Uuid;

use crate::domain::error::SchedulerError;
use crate::domain::models::{AssignmentStrategy, CoordinatorConfig, TaskNode};

use super::connection_coordinator::ConnectionCoordinator;
use super::dag_editor::DagEditor;
use super::event_bus::{CoreEvent, EventBus};
use super::types::{FailureReason, SubmissionOutcome, TaskRequest};

/// Round-robin cursor state, kept outside the editor since it's scheduling
/// metadata rather than DAG state.
#[derive(Default)]
struct RoundRobinState {
    last_index: HashMap<String, usize>,
}

pub struct ConstellationScheduler {
    editor: Arc<DagEditor>,
    coordinator: Arc<ConnectionCoordinator>,
    event_bus: Arc<EventBus>,
    config: CoordinatorConfig,
    cancelled: std::sync::atomic::AtomicBool,
    wake: Notify,
    round_robin: std::sync::Mutex<RoundRobinState>,
}

impl ConstellationScheduler {
    pub fn new(
        editor: Arc<DagEditor>,
        coordinator: Arc<ConnectionCoordinator>,
        event_bus: Arc<EventBus>,
        config: CoordinatorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            editor,
            coordinator,
            event_bus,
            config,
            cancelled: std::sync::atomic::AtomicBool::new(false),
            wake: Notify::new(),
            round_robin: std::sync::Mutex::new(RoundRobinState::default()),
        })
    }

    /// Called by anything that mutates the DAG or observes a task/device
    /// transition, to wake a sleeping scheduler loop early rather than
    /// waiting for the poll interval.
    pub fn notify(&self) {
        self.wake.notify_one();
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
        self.wake.notify_one();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Subscribes to the shared event bus so a `ConstellationMutated`
    /// published by a `DagEditor` (Planner edit, undo/redo, load) wakes this
    /// loop immediately instead of waiting for the next poll tick. Scoped to
    /// this scheduler's own constellation, since the bus is shared process-wide.
    fn spawn_mutation_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        let mut rx = self.event_bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if let CoreEvent::ConstellationMutated { constellation_id, .. } = envelope.event {
                            if constellation_id == scheduler.editor.view().constellation_id {
                                scheduler.notify();
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Main loop; runs until the constellation completes or is cancelled.
    pub async fn run(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mutation_listener = self.spawn_mutation_listener();
        let result = self.run_loop().await;
        mutation_listener.abort();
        result
    }

    async fn run_loop(self: &Arc<Self>) -> Result<(), SchedulerError> {
        loop {
            if self.is_cancelled() {
                self.cancel_all_non_terminal();
                return Err(SchedulerError::Cancelled);
            }

            if self.editor.with_constellation_mut(|c| c.is_complete()) {
                return Ok(());
            }

            let ready = self.editor.with_constellation_mut(|c| c.ready_tasks());
            if ready.is_empty() {
                self.reap_unreachable_predicates();
                self.wait_for_wake().await;
                continue;
            }

            let mut dispatched_any = false;
            for task_id in ready {
                if self.is_cancelled() {
                    break;
                }
                if self.try_dispatch(task_id).await {
                    dispatched_any = true;
                }
            }

            // Every ready task was skipped (no device available for any of
            // them yet) — back off instead of busy-spinning until a device
            // connects or a task completes.
            if !dispatched_any {
                self.wait_for_wake().await;
            }
        }
    }

    async fn wait_for_wake(&self) {
        tokio::select! {
            _ = self.wake.notified() => {}
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
        }
    }

    async fn try_dispatch(self: &Arc<Self>, task_id: Uuid) -> bool {
        let task = match self.editor.view().tasks.get(&task_id).cloned() {
            Some(t) => t,
            None => return false,
        };

        let Some(device_id) = self.select_device(&task) else {
            return false;
        };

        let constellation_id = self.editor.view().constellation_id;
        let started = self.editor.with_constellation_mut(|c| c.mark_started(task_id));
        if started.is_err() {
            // Lost a race with another dispatch pass over the same ready set.
            return false;
        }

        self.event_bus.publish(CoreEvent::TaskStarted { constellation_id, task_id, device_id: device_id.clone() });

        let request = TaskRequest {
            task_id: task.task_id,
            description: task.description.clone(),
            data: task.task_data.clone(),
            timeout_s: task.timeout_s,
        };
        let timeout = Duration::from_secs(task.timeout_s);
        let handle = self.coordinator.submit_task(&device_id, request, timeout);
        let scheduler = self.clone();

        tokio::spawn(async move {
            let outcome = handle.await.unwrap_or(SubmissionOutcome::Failed(FailureReason::Disconnected));
            scheduler.complete_task(constellation_id, task_id, outcome);
        });
        true
    }

    fn complete_task(self: &Arc<Self>, constellation_id: Uuid, task_id: Uuid, outcome: SubmissionOutcome) {
        let (success, result, error) = match outcome {
            SubmissionOutcome::Completed(value) => (true, Some(value), None),
            SubmissionOutcome::Failed(reason) => (false, None, Some(format!("{reason:?}"))),
        };

        let _ = self
            .editor
            .with_constellation_mut(|c| c.mark_completed(task_id, success, result.clone(), error.clone()));

        if success {
            self.event_bus.publish(CoreEvent::TaskCompleted {
                constellation_id,
                task_id,
                result: result.unwrap_or(serde_json::Value::Null),
            });
        } else {
            self.event_bus.publish(CoreEvent::TaskFailed {
                constellation_id,
                task_id,
                error: error.unwrap_or_default(),
            });
        }
        self.notify();
    }

    fn cancel_all_non_terminal(&self) {
        let non_terminal: Vec<Uuid> = self
            .editor
            .view()
            .tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.task_id)
            .collect();
        for task_id in non_terminal {
            let _ = self.editor.with_constellation_mut(|c| c.mark_cancelled(task_id));
        }
    }

    /// A task whose predicates can never be satisfied (every upstream
    /// producer is terminal but the edge never evaluated true) is cancelled
    /// once no further upstream progress is possible, rather than blocking
    /// the constellation forever.
    fn reap_unreachable_predicates(&self) {
        let view = self.editor.view();
        let stalled: Vec<Uuid> = view
            .tasks
            .values()
            .filter(|t| t.status.is_ready_candidate() && !t.incoming_deps.is_empty())
            .filter(|t| {
                t.incoming_deps
                    .iter()
                    .filter_map(|edge_id| view.edges.get(edge_id))
                    .all(|edge| view.tasks.get(&edge.from_task_id).map(|up| up.status.is_terminal()).unwrap_or(true))
            })
            .map(|t| t.task_id)
            .collect();

        for task_id in stalled {
            info!(%task_id, "cancelling task with unreachable predicate");
            let _ = self.editor.with_constellation_mut(|c| c.mark_cancelled(task_id));
        }
    }

    /// An explicit `target_device_id` wins outright; otherwise pick among
    /// capability-matching available devices per the configured assignment
    /// strategy.
    fn select_device(&self, task: &TaskNode) -> Option<String> {
        if let Some(target) = &task.target_device_id {
            return self
                .coordinator
                .registry
                .snapshot(target)
                .ok()
                .filter(|profile| profile.status.is_available())
                .map(|_| target.clone());
        }

        let candidates: Vec<_> = self
            .coordinator
            .registry
            .list(&Default::default())
            .into_iter()
            .filter(|d| d.status.is_available() && d.has_capabilities(&task.required_capabilities))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        match self.config.assignment_strategy {
            AssignmentStrategy::PreferenceTable => {
                let preferred = task
                    .device_type
                    .as_ref()
                    .and_then(|kind| self.config.device_preference_table.get(kind))
                    .filter(|preferred_id| candidates.iter().any(|d| &d.device_id == *preferred_id));
                match preferred {
                    Some(preferred_id) => Some(preferred_id.clone()),
                    None => candidates.into_iter().next().map(|d| d.device_id),
                }
            }
            AssignmentStrategy::CapabilityFirst => candidates
                .into_iter()
                .min_by_key(|d| self.coordinator.queue_depth(&d.device_id))
                .map(|d| d.device_id),
            AssignmentStrategy::RoundRobin => {
                let key = task.device_type.clone().unwrap_or_default();
                let mut rr = self.round_robin.lock().unwrap();
                let idx = rr.last_index.entry(key).or_insert(0);
                let chosen = candidates[*idx % candidates.len()].device_id.clone();
                *idx += 1;
                Some(chosen)
            }
        }
    }
}
