//! Session Runner (C12): owns one constellation's scheduler and editor pair
//! and drives them to completion, reporting an aggregated result.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::domain::error::SchedulerError;
use crate::domain::models::{Constellation, ConstellationStats, CoordinatorConfig};

use super::connection_coordinator::{run_event_loop, ConnectionCoordinator};
use super::dag_editor::DagEditor;
use super::event_bus::EventBus;
use super::scheduler::ConstellationScheduler;
use super::types::RouterEvent;

/// Outcome of running one constellation to completion.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub constellation_id: Uuid,
    pub final_state: crate::domain::models::ConstellationState,
    pub stats: ConstellationStats,
    pub duration: Duration,
}

/// Binds a `DagEditor` (the Planner's mutation surface) to a
/// `ConstellationScheduler` (the execution loop) over one `Constellation`,
/// and owns the coordinator event-loop task that feeds both.
pub struct SessionRunner {
    pub editor: Arc<DagEditor>,
    pub scheduler: Arc<ConstellationScheduler>,
    event_loop_handle: tokio::task::JoinHandle<()>,
}

impl SessionRunner {
    pub fn new(
        constellation: Constellation,
        coordinator: Arc<ConnectionCoordinator>,
        events_rx: mpsc::UnboundedReceiver<RouterEvent>,
        event_bus: Arc<EventBus>,
        config: CoordinatorConfig,
    ) -> Self {
        let editor = DagEditor::new(constellation, config.max_history_size, event_bus.clone());
        let scheduler = ConstellationScheduler::new(editor.clone(), coordinator.clone(), event_bus, config);

        let event_loop_handle = tokio::spawn(run_event_loop(coordinator, events_rx));

        Self { editor, scheduler, event_loop_handle }
    }

    /// Run the scheduler to completion (or cancellation) and report the
    /// final constellation state.
    pub async fn run(&self) -> Result<SessionResult, SchedulerError> {
        let started_at = std::time::Instant::now();
        let constellation_id = self.editor.view().constellation_id;
        info!(%constellation_id, "session starting");

        let outcome = self.scheduler.run().await;
        let view = self.editor.view();
        let result = SessionResult {
            constellation_id,
            final_state: view.state,
            stats: view.statistics(),
            duration: started_at.elapsed(),
        };
        info!(%constellation_id, state = ?result.final_state, elapsed = ?result.duration, "session finished");
        match outcome {
            Ok(()) | Err(SchedulerError::Cancelled) => Ok(result),
            Err(other) => Err(other),
        }
    }

    pub fn cancel(&self) {
        self.scheduler.cancel();
    }

    /// Abort the coordinator event-loop task. Call once the runner's
    /// constellation is done and its devices are being torn down.
    pub fn shutdown(&self) {
        self.event_loop_handle.abort();
    }
}
