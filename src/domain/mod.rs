//! Domain layer: pure data models and the error taxonomy.
//!
//! Contains no infrastructure concerns — no sockets, no file I/O, no async
//! runtime dependency beyond the types needed to describe time and identity.

pub mod error;
pub mod models;

pub use error::{
    ConfigError, DagError, EditorError, ProtocolError, RegistryError, RouterError,
    SchedulerError, TransportError,
};
