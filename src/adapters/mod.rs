//! Concrete adapters implementing the ports. `websocket_transport` is the
//! production adapter; `mock_transport` backs tests and integration scenarios.

pub mod mock_transport;
pub mod websocket_transport;

pub use mock_transport::{MockTransport, MockTransportFactory};
pub use websocket_transport::{WebSocketTransport, WebSocketTransportFactory};
