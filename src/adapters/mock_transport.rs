//! In-memory `Transport` double for tests and integration scenarios: two
//! `MockTransport` ends joined by channels, so a test can drive both the
//! coordinator side and the simulated-device side of a session.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::domain::error::TransportError;
use crate::ports::transport::{Transport, TransportFactory};

/// One end of an in-memory duplex pipe carrying whole text frames.
pub struct MockTransport {
    outgoing: mpsc::UnboundedSender<String>,
    incoming: Mutex<mpsc::UnboundedReceiver<String>>,
    closed: std::sync::atomic::AtomicBool,
}

impl MockTransport {
    /// Build a connected pair: `(coordinator_side, device_side)`. Sending on
    /// one end is received on the other.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self { outgoing: a_tx, incoming: Mutex::new(a_rx), closed: std::sync::atomic::AtomicBool::new(false) },
            Self { outgoing: b_tx, incoming: Mutex::new(b_rx), closed: std::sync::atomic::AtomicBool::new(false) },
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(TransportError::AlreadyClosed);
        }
        self.outgoing.send(frame.to_string()).map_err(|_| TransportError::ClosedByPeer { code: None, reason: String::new() })
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut incoming = self.incoming.lock().await;
        incoming.recv().await.ok_or(TransportError::ClosedByPeer { code: None, reason: String::new() })
    }

    async fn close(&self, _code: Option<u16>, _reason: &str) -> Result<(), TransportError> {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out pre-seeded `MockTransport` halves keyed by endpoint URL, so
/// tests can register a device's paired "device side" before connecting.
pub struct MockTransportFactory {
    pending: std::sync::Mutex<std::collections::HashMap<String, MockTransport>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self { pending: std::sync::Mutex::new(std::collections::HashMap::new()) }
    }

    /// Registers the coordinator-side half to hand back for `endpoint_url`,
    /// keeping the device-side half for the test to drive directly.
    pub fn seed(&self, endpoint_url: impl Into<String>, coordinator_side: MockTransport) {
        self.pending.lock().unwrap().insert(endpoint_url.into(), coordinator_side);
    }
}

impl Default for MockTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn open(&self, endpoint_url: &str) -> Result<Box<dyn Transport>, TransportError> {
        self.pending
            .lock()
            .unwrap()
            .remove(endpoint_url)
            .map(|transport| Box::new(transport) as Box<dyn Transport>)
            .ok_or_else(|| TransportError::ConnectionRefused(format!("no mock session seeded for {endpoint_url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn paired_transports_deliver_frames_both_ways() {
        let (a, b) = MockTransport::pair();
        a.send("hello").await.unwrap();
        assert_eq!(b.recv().await.unwrap(), "hello");

        b.send("world").await.unwrap();
        assert_eq!(a.recv().await.unwrap(), "world");
    }

    #[tokio::test]
    async fn closed_transport_rejects_further_sends() {
        let (a, _b) = MockTransport::pair();
        a.close(None, "done").await.unwrap();
        assert!(matches!(a.send("late").await, Err(TransportError::AlreadyClosed)));
    }

    #[tokio::test]
    async fn factory_hands_out_seeded_session_once() {
        let factory = MockTransportFactory::new();
        let (coordinator_side, _device_side) = MockTransport::pair();
        factory.seed("wss://device-1", coordinator_side);

        assert!(factory.open("wss://device-1").await.is_ok());
        assert!(factory.open("wss://device-1").await.is_err());
    }
}
