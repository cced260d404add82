//! Per-device periodic liveness probe.
//!
//! One cooperative loop per connected device: send, wait up to
//! `2 × interval` for the ack, disconnect on timeout, otherwise touch the
//! registry and sleep out the interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

use crate::domain::models::DeviceStatus;
use crate::ports::transport::Transport;
use crate::protocol::{ClientType, Envelope, MessageType, StatusValue};

use super::device_registry::DeviceRegistry;
use super::message_router::MessageRouter;
use super::types::DisconnectReason;

pub struct HeartbeatMonitor {
    interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Run until `shutdown_rx` fires or a heartbeat ack times out, in which
    /// case `on_timeout` is invoked with `DisconnectReason::HeartbeatTimeout`
    /// and the loop returns.
    pub async fn run_loop(
        &self,
        device_id: String,
        transport: Arc<dyn Transport>,
        router: Arc<MessageRouter>,
        registry: Arc<DeviceRegistry>,
        mut shutdown_rx: oneshot::Receiver<()>,
        on_timeout: impl Fn(String, DisconnectReason) + Send,
    ) {
        let timeout = self.interval * 2;
        loop {
            let session_id = Uuid::new_v4();
            let envelope = Envelope::new(
                MessageType::Heartbeat,
                StatusValue::Ok,
                ClientType::Constellation,
                "coordinator",
                session_id,
                serde_json::Value::Null,
            );

            let ack_rx = router.await_heartbeat_ack(&device_id);
            if router.send(transport.as_ref(), &envelope).await.is_err() {
                on_timeout(device_id.clone(), DisconnectReason::TransportError("heartbeat send failed".into()));
                return;
            }

            tokio::select! {
                biased;
                _ = &mut shutdown_rx => {
                    return;
                }
                ack = tokio::time::timeout(timeout, ack_rx) => {
                    match ack {
                        Ok(Ok(())) => {
                            let _ = registry.touch_heartbeat(&device_id);
                        }
                        _ => {
                            warn!(device_id, "heartbeat timed out, disconnecting");
                            on_timeout(device_id.clone(), DisconnectReason::HeartbeatTimeout);
                            return;
                        }
                    }
                }
            }

            tokio::select! {
                biased;
                _ = &mut shutdown_rx => return,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

/// Returns whether a device's status still warrants scheduling heartbeats —
/// a thin guard used by the coordinator before spawning the loop.
pub fn should_monitor(status: DeviceStatus) -> bool {
    status.is_available()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_monitor_only_live_statuses() {
        assert!(should_monitor(DeviceStatus::Idle));
        assert!(should_monitor(DeviceStatus::Busy));
        assert!(!should_monitor(DeviceStatus::Disconnected));
        assert!(!should_monitor(DeviceStatus::Failed));
    }
}
