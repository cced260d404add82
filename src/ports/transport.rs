//! Transport port (C2): thin adapter over a single WebSocket session.
//!
//! Transport knows nothing about AIP — it moves whole text frames. One
//! session per device; the concrete adapter lives under `adapters/`.

use async_trait::async_trait;

use crate::domain::error::TransportError;

/// An open session with exactly one peer.
///
/// All methods take `&self`: the heartbeat loop sends concurrently with the
/// receive loop reading, so a shared `Arc<dyn Transport>` must work without a
/// coordinator-held lock. Concrete adapters hold the split sink/stream
/// halves behind their own interior mutability.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one frame. Frames are whole UTF-8 JSON documents; the transport
    /// does not fragment or buffer across calls.
    async fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Receive the next frame, suspending until one arrives. Must only be
    /// called from one task at a time (the owning receive loop).
    ///
    /// Returns `TransportError::ClosedByPeer` when the peer closes cleanly;
    /// any other I/O failure surfaces as `TransportError::IoError`.
    async fn recv(&self) -> Result<String, TransportError>;

    /// Close the session. Idempotent: closing an already-closed session is
    /// not an error.
    async fn close(&self, code: Option<u16>, reason: &str) -> Result<(), TransportError>;
}

/// Opens new `Transport` sessions against an endpoint URL.
///
/// Kept separate from `Transport` itself so a mock factory can hand out
/// pre-seeded sessions without modeling a real connect handshake.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, endpoint_url: &str) -> Result<Box<dyn Transport>, TransportError>;
}
