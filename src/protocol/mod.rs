//! AIP protocol codec (C3): message schema plus (de)serialization.

pub mod codec;
pub mod message;

pub use codec::{decode, decode_payload, encode};
pub use message::{
    ActionResult, ActionSpec, ClientType, CommandPayload, CommandResultsPayload,
    DeviceInfoRequestPayload, DeviceInfoResponsePayload, Envelope, ErrorPayload, MessageType,
    RegisterPayload, StatusValue, TaskEndPayload, TaskPayload,
};
