//! End-to-end test harness: a simulated device that drives the far end of a
//! `MockTransport` pair, answering AIP frames the way a real device agent
//! would (handshake ack, device info, task completion, heartbeat ack).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use constellation_core::adapters::mock_transport::{MockTransport, MockTransportFactory};
use constellation_core::protocol::{
    ClientType, DeviceInfoResponsePayload, Envelope, MessageType, StatusValue, TaskEndPayload,
};
use constellation_core::ports::transport::Transport;
use serde_json::Value;
use uuid::Uuid;

/// Per-task behavior a simulated device applies to `TASK` frames.
pub enum TaskBehavior {
    Succeed(Value),
    Fail(String),
    /// Receives the task but never answers it, modeling a connection that
    /// drops mid-execution.
    Silent,
}

/// Drives the device-facing half of a mock session until dropped, replying
/// to every AIP frame type a real device agent would answer.
pub struct SimulatedDevice {
    pub device_id: String,
    pub tasks_received: Arc<AtomicU32>,
    handle: tokio::task::JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

impl SimulatedDevice {
    /// Registers a fresh coordinator/device mock pair under `endpoint_url`
    /// in `factory`, then spawns a loop answering the device side.
    pub fn spawn(
        factory: &MockTransportFactory,
        device_id: impl Into<String>,
        endpoint_url: impl Into<String>,
        behavior: impl Fn(Uuid) -> TaskBehavior + Send + Sync + 'static,
    ) -> Self {
        let device_id = device_id.into();
        let (coordinator_side, device_side) = MockTransport::pair();
        factory.seed(endpoint_url, coordinator_side);

        let tasks_received = Arc::new(AtomicU32::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let loop_device_id = device_id.clone();
        let loop_tasks = tasks_received.clone();
        let loop_stop = stop.clone();

        let handle = tokio::spawn(async move {
            run_device_loop(device_side, loop_device_id, behavior, loop_tasks, loop_stop).await;
        });

        Self { device_id, tasks_received, handle, stop }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.handle.abort();
    }
}

async fn run_device_loop(
    transport: MockTransport,
    device_id: String,
    behavior: impl Fn(Uuid) -> TaskBehavior,
    tasks_received: Arc<AtomicU32>,
    stop: Arc<AtomicBool>,
) {
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let Ok(raw) = transport.recv().await else { return };
        let Ok(envelope) = constellation_core::protocol::decode(&raw) else { continue };

        let reply = match envelope.message_type {
            MessageType::Register | MessageType::Heartbeat => Some(Envelope::new(
                MessageType::Heartbeat,
                StatusValue::Ok,
                ClientType::Device,
                &device_id,
                Uuid::new_v4(),
                Value::Null,
            )),
            MessageType::DeviceInfoRequest => Some(Envelope::new(
                MessageType::DeviceInfoResponse,
                StatusValue::Ok,
                ClientType::Device,
                &device_id,
                envelope.session_id,
                serde_json::to_value(DeviceInfoResponsePayload {
                    device_id: device_id.clone(),
                    device_info: serde_json::Map::new(),
                })
                .unwrap(),
            )),
            MessageType::Task => {
                tasks_received.fetch_add(1, Ordering::SeqCst);
                match behavior(envelope.session_id) {
                    TaskBehavior::Succeed(result) => Some(Envelope::new(
                        MessageType::TaskEnd,
                        StatusValue::Completed,
                        ClientType::Device,
                        &device_id,
                        envelope.session_id,
                        serde_json::to_value(TaskEndPayload { result, error: None }).unwrap(),
                    )),
                    TaskBehavior::Fail(error) => Some(Envelope::new(
                        MessageType::TaskEnd,
                        StatusValue::Failed,
                        ClientType::Device,
                        &device_id,
                        envelope.session_id,
                        serde_json::to_value(TaskEndPayload { result: Value::Null, error: Some(error) }).unwrap(),
                    )),
                    TaskBehavior::Silent => None,
                }
            }
            _ => None,
        };

        if let Some(reply) = reply {
            let wire = constellation_core::protocol::encode(&reply).unwrap();
            if transport.send(&wire).await.is_err() {
                return;
            }
        }
    }
}
