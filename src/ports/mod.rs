//! Ports: trait boundaries the services depend on and the adapters implement.

pub mod transport;

pub use transport::{Transport, TransportFactory};
