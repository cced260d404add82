//! One receive loop per connected device, dispatching decoded frames and
//! resolving correlated submissions.
//!
//! The pending-submission table is the correlation mechanism: each
//! `(device_id, session_id)` pair is registered once by the submitter and
//! resolved exactly once, by whichever of `TASK_END` / `ERROR` / timeout /
//! disconnect gets there first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde_json::Map;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::error::{ProtocolError, RouterError};
use crate::ports::transport::Transport;
use crate::protocol::{codec, message::StatusValue, CommandResultsPayload, Envelope, MessageType};

use super::event_bus::{CoreEvent, EventBus};
use super::types::{DisconnectReason, FailureReason, RouterEvent, SubmissionOutcome};

type PendingKey = (String, Uuid);

/// A submission awaiting its terminal reply. `task_id` is carried alongside
/// the responder purely so a `COMMAND_RESULTS` continue frame arriving on
/// this session can be attributed to a task without a second lookup table.
struct PendingSubmission {
    task_id: Uuid,
    responder: oneshot::Sender<SubmissionOutcome>,
}

pub struct MessageRouter {
    pending_submissions: DashMap<PendingKey, PendingSubmission>,
    /// At most one outstanding wait per device: used both by the connect
    /// sequence's registration-confirmation wait and by the heartbeat loop.
    heartbeat_waiters: Mutex<HashMap<String, oneshot::Sender<()>>>,
    device_info_waiters: Mutex<HashMap<String, oneshot::Sender<Map<String, serde_json::Value>>>>,
    events_tx: mpsc::UnboundedSender<RouterEvent>,
    event_bus: Arc<EventBus>,
}

impl MessageRouter {
    pub fn new(event_bus: Arc<EventBus>) -> (Self, mpsc::UnboundedReceiver<RouterEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                pending_submissions: DashMap::new(),
                heartbeat_waiters: Mutex::new(HashMap::new()),
                device_info_waiters: Mutex::new(HashMap::new()),
                events_tx,
                event_bus,
            },
            events_rx,
        )
    }

    pub fn register_pending_submission(
        &self,
        device_id: &str,
        session_id: Uuid,
        task_id: Uuid,
    ) -> oneshot::Receiver<SubmissionOutcome> {
        let (tx, rx) = oneshot::channel();
        self.pending_submissions.insert((device_id.to_string(), session_id), PendingSubmission { task_id, responder: tx });
        rx
    }

    pub fn await_heartbeat_ack(&self, device_id: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.heartbeat_waiters.lock().unwrap().insert(device_id.to_string(), tx);
        rx
    }

    pub fn await_device_info(&self, device_id: &str) -> oneshot::Receiver<Map<String, serde_json::Value>> {
        let (tx, rx) = oneshot::channel();
        self.device_info_waiters.lock().unwrap().insert(device_id.to_string(), tx);
        rx
    }

    /// Resolve all outstanding submissions for a device as `Failed(reason)`.
    /// Called by the coordinator's disconnect handler.
    pub fn fail_all_pending(&self, device_id: &str, reason: FailureReason) {
        let keys: Vec<PendingKey> = self
            .pending_submissions
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|(id, _)| id == device_id)
            .collect();
        for key in keys {
            if let Some((_, entry)) = self.pending_submissions.remove(&key) {
                let _ = entry.responder.send(SubmissionOutcome::Failed(reason.clone()));
            }
        }
    }

    /// Decode and dispatch one frame. Protocol errors are logged and the
    /// frame is dropped; the session stays open (the error threshold policy
    /// lives in the coordinator, which counts these).
    pub fn dispatch(&self, device_id: &str, raw_frame: &str) -> Result<(), ProtocolError> {
        let envelope = codec::decode(raw_frame)?;
        match envelope.message_type {
            MessageType::Heartbeat if envelope.status == StatusValue::Ok => {
                if let Some(tx) = self.heartbeat_waiters.lock().unwrap().remove(device_id) {
                    let _ = tx.send(());
                }
                let _ = self.events_tx.send(RouterEvent::HeartbeatAck { device_id: device_id.to_string() });
            }
            MessageType::DeviceInfoResponse => {
                let payload: crate::protocol::DeviceInfoResponsePayload =
                    codec::decode_payload(&envelope, MessageType::DeviceInfoResponse)?;
                if let Some(tx) = self.device_info_waiters.lock().unwrap().remove(device_id) {
                    let _ = tx.send(payload.device_info.clone());
                }
                let _ = self.events_tx.send(RouterEvent::DeviceInfoReceived {
                    device_id: device_id.to_string(),
                    info: payload.device_info,
                });
            }
            MessageType::CommandResults if envelope.status == StatusValue::Continue => {
                let payload: CommandResultsPayload =
                    codec::decode_payload(&envelope, MessageType::CommandResults)?;
                let key = (device_id.to_string(), envelope.session_id);
                match self.pending_submissions.get(&key) {
                    Some(entry) => {
                        self.event_bus.publish(CoreEvent::CommandOutputReceived {
                            device_id: device_id.to_string(),
                            task_id: entry.task_id,
                            session_id: envelope.session_id,
                            output: payload.action_results,
                        });
                    }
                    None => {
                        debug!(device_id, session_id = %envelope.session_id, "command_results continue frame with no pending submission");
                    }
                }
            }
            MessageType::TaskEnd => {
                let payload: crate::protocol::TaskEndPayload =
                    codec::decode_payload(&envelope, MessageType::TaskEnd)?;
                let outcome = match envelope.status {
                    StatusValue::Completed => SubmissionOutcome::Completed(payload.result),
                    _ => SubmissionOutcome::Failed(FailureReason::TaskError(
                        payload.error.unwrap_or_else(|| "task failed".to_string()),
                    )),
                };
                self.resolve_submission(device_id, envelope.session_id, outcome);
            }
            MessageType::Error => {
                let payload: crate::protocol::ErrorPayload =
                    codec::decode_payload(&envelope, MessageType::Error)?;
                self.resolve_submission(
                    device_id,
                    envelope.session_id,
                    SubmissionOutcome::Failed(FailureReason::TaskError(payload.message)),
                );
            }
            other => {
                debug!(device_id, message_type = ?other, "frame ignored by router");
            }
        }
        Ok(())
    }

    fn resolve_submission(&self, device_id: &str, session_id: Uuid, outcome: SubmissionOutcome) {
        let key = (device_id.to_string(), session_id);
        match self.pending_submissions.remove(&key) {
            Some((_, entry)) => {
                let _ = entry.responder.send(outcome);
            }
            None => warn!(device_id, %session_id, "no pending submission for terminal reply"),
        }
    }

    /// Run the per-device receive loop until the peer closes, a transport
    /// error occurs, or `shutdown_rx` fires. Started before the registration
    /// handshake so the confirmation can never be lost to a race.
    pub async fn run_receive_loop(
        &self,
        device_id: String,
        transport: std::sync::Arc<dyn Transport>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => {
                    debug!(device_id, "receive loop stopped by shutdown signal");
                    return;
                }
                frame = transport.recv() => {
                    match frame {
                        Ok(raw) => {
                            if let Err(err) = self.dispatch(&device_id, &raw) {
                                warn!(device_id, error = %err, "dropping malformed frame");
                            }
                        }
                        Err(transport_err) => {
                            let reason = DisconnectReason::TransportError(transport_err.to_string());
                            let _ = self.events_tx.send(RouterEvent::Disconnected {
                                device_id: device_id.clone(),
                                reason,
                            });
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Raise a `Disconnected` event from a source other than the receive
    /// loop itself (the heartbeat monitor, on timeout).
    pub fn notify_disconnected(&self, device_id: String, reason: DisconnectReason) {
        let _ = self.events_tx.send(RouterEvent::Disconnected { device_id, reason });
    }

    /// Encode and send one envelope via `transport`.
    pub async fn send(&self, transport: &dyn Transport, envelope: &Envelope) -> Result<(), RouterError> {
        let wire = codec::encode(envelope).map_err(RouterError::Protocol)?;
        transport.send(&wire).await.map_err(RouterError::Transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_resolves_task_end_as_completed() {
        let (router, _events) = MessageRouter::new(Arc::new(EventBus::new(16)));
        let session_id = Uuid::new_v4();
        let rx = router.register_pending_submission("w", session_id, Uuid::new_v4());

        let envelope = serde_json::json!({
            "type": "TASK_END",
            "status": "completed",
            "timestamp": "2024-01-01T00:00:00Z",
            "client_type": "device",
            "client_id": "w",
            "session_id": session_id,
            "payload": {"result": {"ok": true}},
        })
        .to_string();

        router.dispatch("w", &envelope).unwrap();
        let outcome = rx.try_recv().unwrap();
        assert_eq!(outcome, SubmissionOutcome::Completed(serde_json::json!({"ok": true})));
    }

    #[test]
    fn dispatch_without_pending_entry_does_not_panic() {
        let (router, _events) = MessageRouter::new(Arc::new(EventBus::new(16)));
        let envelope = serde_json::json!({
            "type": "TASK_END",
            "status": "completed",
            "timestamp": "2024-01-01T00:00:00Z",
            "client_type": "device",
            "client_id": "w",
            "session_id": Uuid::new_v4(),
            "payload": {"result": {}},
        })
        .to_string();
        assert!(router.dispatch("w", &envelope).is_ok());
    }

    #[test]
    fn malformed_frame_is_reported_and_session_unaffected() {
        let (router, _events) = MessageRouter::new(Arc::new(EventBus::new(16)));
        assert!(router.dispatch("w", "not json").is_err());
    }

    #[test]
    fn continue_frame_publishes_partial_output_for_the_owning_task() {
        let event_bus = Arc::new(EventBus::new(16));
        let (router, _events) = MessageRouter::new(event_bus.clone());
        let mut bus_rx = event_bus.subscribe();
        let session_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        let _rx = router.register_pending_submission("w", session_id, task_id);

        let envelope = serde_json::json!({
            "type": "COMMAND_RESULTS",
            "status": "continue",
            "timestamp": "2024-01-01T00:00:00Z",
            "client_type": "device",
            "client_id": "w",
            "session_id": session_id,
            "payload": {"action_results": [{"action": "screenshot", "status": "completed", "result": {}}]},
        })
        .to_string();

        router.dispatch("w", &envelope).unwrap();

        let published = bus_rx.try_recv().unwrap();
        match published.event {
            CoreEvent::CommandOutputReceived { task_id: published_task_id, output, .. } => {
                assert_eq!(published_task_id, task_id);
                assert_eq!(output.len(), 1);
            }
            other => panic!("expected CommandOutputReceived, got {other:?}"),
        }
    }

    #[test]
    fn continue_frame_with_no_pending_submission_does_not_panic() {
        let (router, _events) = MessageRouter::new(Arc::new(EventBus::new(16)));
        let envelope = serde_json::json!({
            "type": "COMMAND_RESULTS",
            "status": "continue",
            "timestamp": "2024-01-01T00:00:00Z",
            "client_type": "device",
            "client_id": "w",
            "session_id": Uuid::new_v4(),
            "payload": {"action_results": []},
        })
        .to_string();
        assert!(router.dispatch("w", &envelope).is_ok());
    }
}
