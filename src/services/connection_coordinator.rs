//! Composes the registry, router, heartbeat monitor, and per-device queue
//! into the coordinator's outward-facing lifecycle API.
//!
//! Holds one `DeviceSession` per connected device (transport handle plus the
//! shutdown signals for its receive loop and heartbeat loop) and drives the
//! connect/disconnect/reconnect sequences atomically from the caller's view.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::error::RouterError;
use crate::domain::models::{CoordinatorConfig, DeviceProfile, DeviceStatus};
use crate::ports::transport::{Transport, TransportFactory};
use crate::protocol::{
    ClientType, DeviceInfoRequestPayload, Envelope, MessageType, RegisterPayload, StatusValue,
};

use super::device_registry::DeviceRegistry;
use super::device_task_queue::DeviceTaskQueue;
use super::event_bus::EventBus;
use super::heartbeat_monitor::HeartbeatMonitor;
use super::message_router::MessageRouter;
use super::types::{DisconnectReason, FailureReason, RouterEvent, SubmissionOutcome, TaskRequest};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

struct DeviceSession {
    transport: Arc<dyn Transport>,
    router_shutdown: Option<oneshot::Sender<()>>,
    heartbeat_shutdown: Option<oneshot::Sender<()>>,
}

pub struct ConnectionCoordinator {
    pub registry: Arc<DeviceRegistry>,
    transport_factory: Arc<dyn TransportFactory>,
    router: Arc<MessageRouter>,
    queue: Arc<DeviceTaskQueue>,
    config: CoordinatorConfig,
    sessions: DashMap<String, DeviceSession>,
}

impl ConnectionCoordinator {
    pub fn new(
        transport_factory: Arc<dyn TransportFactory>,
        config: CoordinatorConfig,
        event_bus: Arc<EventBus>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RouterEvent>) {
        let (router, events_rx) = MessageRouter::new(event_bus.clone());
        let coordinator = Arc::new(Self {
            registry: Arc::new(DeviceRegistry::new(event_bus)),
            transport_factory,
            router: Arc::new(router),
            queue: Arc::new(DeviceTaskQueue::new()),
            config,
            sessions: DashMap::new(),
        });
        (coordinator, events_rx)
    }

    pub fn register_device(&self, profile: DeviceProfile) -> Result<(), RouterError> {
        Ok(self.registry.register(profile)?)
    }

    pub fn device_status(&self, device_id: &str) -> Result<DeviceProfile, RouterError> {
        Ok(self.registry.snapshot(device_id)?)
    }

    /// Number of submissions currently queued for a device, used by the
    /// scheduler's least-loaded device selection.
    pub fn queue_depth(&self, device_id: &str) -> usize {
        self.queue.len(device_id)
    }

    /// Opens the transport, runs the registration handshake, and starts the
    /// device's receive and heartbeat loops.
    pub async fn connect_device(self: &Arc<Self>, device_id: &str) -> Result<(), RouterError> {
        let profile = self.registry.snapshot(device_id)?;
        if !matches!(profile.status, DeviceStatus::Disconnected | DeviceStatus::Failed) {
            return Err(RouterError::DeviceUnavailable(device_id.to_string()));
        }
        self.registry.set_status(device_id, DeviceStatus::Connecting)?;

        if let Err(err) = self.open_and_handshake(device_id, &profile).await {
            let _ = self.registry.set_status(device_id, DeviceStatus::Failed);
            return Err(err);
        }

        self.registry.set_status(device_id, DeviceStatus::Connected)?;
        self.registry.set_status(device_id, DeviceStatus::Idle)?;
        self.registry.reset_attempts(device_id)?;

        self.drain_queue_for_device(device_id).await;
        Ok(())
    }

    async fn open_and_handshake(self: &Arc<Self>, device_id: &str, profile: &DeviceProfile) -> Result<(), RouterError> {
        let transport: Arc<dyn Transport> =
            Arc::from(self.transport_factory.open(&profile.endpoint_url).await.map_err(RouterError::Transport)?);

        // Step 4: start the receive loop before anything else so a fast
        // registration confirmation can never be missed.
        let (router_shutdown_tx, router_shutdown_rx) = oneshot::channel();
        let router = self.router.clone();
        let loop_transport = transport.clone();
        let loop_device_id = device_id.to_string();
        tokio::spawn(async move {
            router.run_receive_loop(loop_device_id, loop_transport, router_shutdown_rx).await;
        });

        if let Err(err) = self.register_and_await_ack(device_id, &transport, profile).await {
            let _ = router_shutdown_tx.send(());
            let _ = transport.close(None, "handshake failed").await;
            return Err(err);
        }

        self.request_device_info(device_id, &transport).await;

        let (hb_shutdown_tx, hb_shutdown_rx) = oneshot::channel();
        self.spawn_heartbeat_loop(device_id, transport.clone(), hb_shutdown_rx);

        self.sessions.insert(
            device_id.to_string(),
            DeviceSession {
                transport,
                router_shutdown: Some(router_shutdown_tx),
                heartbeat_shutdown: Some(hb_shutdown_tx),
            },
        );
        Ok(())
    }

    async fn register_and_await_ack(
        &self,
        device_id: &str,
        transport: &Arc<dyn Transport>,
        profile: &DeviceProfile,
    ) -> Result<(), RouterError> {
        let ack_rx = self.router.await_heartbeat_ack(device_id);
        let payload = RegisterPayload {
            device_id: device_id.to_string(),
            capabilities: profile.capabilities.iter().cloned().collect(),
            metadata: profile.metadata.clone(),
        };
        let envelope = Envelope::new(
            MessageType::Register,
            StatusValue::Ok,
            ClientType::Device,
            device_id,
            Uuid::new_v4(),
            serde_json::to_value(&payload).unwrap_or_default(),
        );
        self.router.send(transport.as_ref(), &envelope).await?;

        match tokio::time::timeout(HANDSHAKE_TIMEOUT, ack_rx).await {
            Ok(Ok(())) => Ok(()),
            _ => Err(RouterError::RegistrationTimeout),
        }
    }

    async fn request_device_info(&self, device_id: &str, transport: &Arc<dyn Transport>) {
        let info_rx = self.router.await_device_info(device_id);
        let payload = DeviceInfoRequestPayload { request_id: Uuid::new_v4() };
        let envelope = Envelope::new(
            MessageType::DeviceInfoRequest,
            StatusValue::Ok,
            ClientType::Constellation,
            "coordinator",
            Uuid::new_v4(),
            serde_json::to_value(&payload).unwrap_or_default(),
        );
        if self.router.send(transport.as_ref(), &envelope).await.is_err() {
            return;
        }
        if let Ok(Ok(info)) = tokio::time::timeout(HANDSHAKE_TIMEOUT, info_rx).await {
            let _ = self.registry.update_system_info(device_id, info);
        }
    }

    fn spawn_heartbeat_loop(
        self: &Arc<Self>,
        device_id: &str,
        transport: Arc<dyn Transport>,
        shutdown_rx: oneshot::Receiver<()>,
    ) {
        let monitor = HeartbeatMonitor::new(Duration::from_secs(self.config.heartbeat_interval_s));
        let router = self.router.clone();
        let registry = self.registry.clone();
        let device_id = device_id.to_string();
        let router_for_timeout = router.clone();
        tokio::spawn(async move {
            monitor
                .run_loop(device_id, transport, router, registry, shutdown_rx, move |id, reason| {
                    router_for_timeout.notify_disconnected(id, reason);
                })
                .await;
        });
    }

    /// Tears down a device's session: stops its loops, closes the
    /// transport, and updates the registry.
    pub async fn disconnect_device(&self, device_id: &str, reason: DisconnectReason) {
        if let Some((_, mut session)) = self.sessions.remove(device_id) {
            if let Some(tx) = session.heartbeat_shutdown.take() {
                let _ = tx.send(());
            }
            if let Some(tx) = session.router_shutdown.take() {
                let _ = tx.send(());
            }
            let failure_reason = match &reason {
                DisconnectReason::Requested => FailureReason::Cancelled,
                _ => FailureReason::Disconnected,
            };
            self.router.fail_all_pending(device_id, failure_reason);
            let _ = session.transport.close(None, "disconnecting").await;
        }
        let _ = self.registry.set_status(device_id, DeviceStatus::Disconnected);
        info!(device_id, ?reason, "device disconnected");
    }

    /// Handles an involuntary disconnect surfaced via the router's event
    /// channel: tears the session down and schedules a reconnect.
    pub async fn handle_disconnect_event(self: &Arc<Self>, device_id: &str, reason: DisconnectReason) {
        self.disconnect_device(device_id, reason).await;
        self.schedule_reconnect(device_id.to_string());
    }

    fn schedule_reconnect(self: &Arc<Self>, device_id: String) {
        let attempts = self.registry.increment_attempts(&device_id).unwrap_or(1);
        if attempts > self.config.default_max_retries {
            let _ = self.registry.set_status(&device_id, DeviceStatus::Failed);
            warn!(device_id, attempts, "max reconnect attempts exhausted");
            return;
        }

        let delay = self.backoff_delay(attempts);
        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = coordinator.connect_device(&device_id).await {
                error!(device_id, error = %err, "reconnect attempt failed");
                coordinator.schedule_reconnect(device_id);
            }
        });
    }

    fn backoff_delay(&self, attempts: u32) -> Duration {
        let base = self.config.initial_reconnect_delay_s;
        let capped_shift = attempts.saturating_sub(1).min(20);
        let scaled = base.saturating_mul(1u64 << capped_shift);
        Duration::from_secs(scaled.min(self.config.max_reconnect_delay_s))
    }

    /// Submits a task to a device, routing by its current status: dispatch
    /// immediately if idle, enqueue if busy, fail outright otherwise.
    pub fn submit_task(
        self: &Arc<Self>,
        device_id: &str,
        request: TaskRequest,
        timeout: Duration,
    ) -> oneshot::Receiver<SubmissionOutcome> {
        let (tx, rx) = oneshot::channel();
        let deadline = std::time::Instant::now() + timeout;
        match self.registry.snapshot(device_id).map(|p| p.status) {
            Ok(DeviceStatus::Idle) => self.dispatch_now(device_id, request, tx, deadline),
            Ok(DeviceStatus::Busy) => self.queue.enqueue(device_id, request, deadline, tx),
            _ => {
                let _ = tx.send(SubmissionOutcome::Failed(FailureReason::DeviceUnavailable));
            }
        }
        rx
    }

    /// Send `request` immediately and, on terminal resolution, pull the next
    /// queued submission for the same device if one is waiting.
    fn dispatch_now(
        self: &Arc<Self>,
        device_id: &str,
        request: TaskRequest,
        responder: oneshot::Sender<SubmissionOutcome>,
        deadline: std::time::Instant,
    ) {
        let _ = self.registry.set_status(device_id, DeviceStatus::Busy);
        let _ = self.registry.set_current_task(device_id, Some(request.task_id));

        let session_id = Uuid::new_v4();
        let pending_rx = self.router.register_pending_submission(device_id, session_id, request.task_id);
        let router = self.router.clone();
        let registry = self.registry.clone();
        let queue = self.queue.clone();
        let coordinator = self.clone();
        let device_id_owned = device_id.to_string();
        let transport = self.sessions.get(device_id).map(|s| s.transport.clone());

        tokio::spawn(async move {
            if let Some(transport) = transport {
                let envelope = Envelope::new(
                    MessageType::Task,
                    StatusValue::Ok,
                    ClientType::Constellation,
                    "coordinator",
                    session_id,
                    serde_json::to_value(crate::protocol::TaskPayload {
                        task_id: request.task_id,
                        description: request.description,
                        data: request.data,
                    })
                    .unwrap_or_default(),
                )
                .with_target(&device_id_owned);
                let _ = router.send(transport.as_ref(), &envelope).await;
            }

            let outcome = match tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), pending_rx).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => SubmissionOutcome::Failed(FailureReason::Disconnected),
                Err(_) => SubmissionOutcome::Failed(FailureReason::Timeout),
            };
            let _ = registry.set_current_task(&device_id_owned, None);
            let _ = registry.set_status(&device_id_owned, DeviceStatus::Idle);
            let _ = responder.send(outcome);

            if let Some((next_request, next_deadline, next_responder)) = queue.dequeue_one(&device_id_owned) {
                coordinator.dispatch_now(&device_id_owned, next_request, next_responder, next_deadline);
            }
        });
    }

    /// Tasks enqueued while a device was disconnected are resubmitted as
    /// soon as it returns to `Idle`, even though nothing recalls them
    /// explicitly.
    async fn drain_queue_for_device(self: &Arc<Self>, device_id: &str) {
        if self.queue.is_empty(device_id) {
            return;
        }
        if let Ok(profile) = self.registry.snapshot(device_id) {
            if profile.status == DeviceStatus::Idle {
                if let Some((request, deadline, responder)) = self.queue.dequeue_one(device_id) {
                    self.dispatch_now(device_id, request, responder, deadline);
                }
            }
        }
    }
}

/// Drives `events_rx` for the lifetime of the coordinator, translating
/// router-raised events into coordinator actions. Run this as its own
/// spawned task from `main`/`SessionRunner`.
pub async fn run_event_loop(coordinator: Arc<ConnectionCoordinator>, mut events_rx: mpsc::UnboundedReceiver<RouterEvent>) {
    while let Some(event) = events_rx.recv().await {
        match event {
            RouterEvent::Disconnected { device_id, reason } => {
                coordinator.handle_disconnect_event(&device_id, reason).await;
            }
            RouterEvent::DeviceInfoReceived { device_id, info } => {
                let _ = coordinator.registry.update_system_info(&device_id, info);
            }
            RouterEvent::HeartbeatAck { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_doubles_up_to_the_configured_cap() {
        let coordinator_config = CoordinatorConfig { initial_reconnect_delay_s: 5, max_reconnect_delay_s: 300, ..Default::default() };
        let stub = StubCoordinator(coordinator_config);
        assert_eq!(stub.delay(1), Duration::from_secs(5));
        assert_eq!(stub.delay(2), Duration::from_secs(10));
        assert_eq!(stub.delay(3), Duration::from_secs(20));
        assert_eq!(stub.delay(4), Duration::from_secs(40));
        assert_eq!(stub.delay(5), Duration::from_secs(80));
    }

    struct StubCoordinator(CoordinatorConfig);
    impl StubCoordinator {
        fn delay(&self, attempts: u32) -> Duration {
            let base = self.0.initial_reconnect_delay_s;
            let capped_shift = attempts.saturating_sub(1).min(20);
            let scaled = base.saturating_mul(1u64 << capped_shift);
            Duration::from_secs(scaled.min(self.0.max_reconnect_delay_s))
        }
    }
}
