//! Constellation control plane core: a WebSocket device-fleet coordinator
//! that schedules DAG-structured task constellations onto connected devices.
//!
//! Hexagonal layering: `domain` is pure data and errors, `protocol` is the
//! AIP wire schema, `ports` are the trait boundaries, `adapters` are the
//! concrete implementations of those ports, `services` are the stateful
//! coordinator/scheduler components, and `infrastructure` is process
//! bootstrap (config, logging).

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod ports;
pub mod protocol;
pub mod services;
