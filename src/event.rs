//! Event types shared by the worker and the processor.
//!
//! A [`QueueMessage`] arrives from the stream with an opaque `data` value.
//! [`QueueMessage::decode`] turns it into an [`EventEnvelope`] (event type tag
//! plus raw payload), and [`EventEnvelope::decode_data`] interprets the payload
//! once the router knows what shape to expect.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "EventType": "create_appointment",
//!   "Data": {"ScheduleID": 1, "DoctorID": 2, "DateTime": "2024-01-01T10:00:00Z"}
//! }
//! ```
//!
//! `Data` may also be a JSON-encoded string holding the same object.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{ProcessError, ProcessResult};

/// Tag identifying what an event asks the processor to do.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Book a new appointment slot
    CreateAppointment,

    /// Change an existing appointment (no handler registered)
    UpdateAppointment,

    /// Any tag this service does not know about
    Unknown(String),
}

impl EventType {
    pub const CREATE_APPOINTMENT: &'static str = "create_appointment";
    pub const UPDATE_APPOINTMENT: &'static str = "update_appointment";

    /// The wire tag for this event type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::CreateAppointment => Self::CREATE_APPOINTMENT,
            Self::UpdateAppointment => Self::UPDATE_APPOINTMENT,
            Self::Unknown(tag) => tag,
        }
    }
}

impl Default for EventType {
    /// An absent tag behaves like an empty, unrecognised one.
    fn default() -> Self {
        Self::Unknown(String::new())
    }
}

impl From<&str> for EventType {
    fn from(tag: &str) -> Self {
        match tag {
            Self::CREATE_APPOINTMENT => Self::CreateAppointment,
            Self::UPDATE_APPOINTMENT => Self::UpdateAppointment,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from(tag.as_str()))
    }
}

/// A message delivered by the queue.
///
/// The `data` field is opaque to the transport; only the decoder gives it a
/// shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    #[serde(alias = "Data")]
    pub data: Value,
}

impl QueueMessage {
    /// Wrap an arbitrary payload
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    /// Decode the payload into a typed [`EventEnvelope`].
    ///
    /// No side effects; fails with [`ProcessError::Decode`] when the payload
    /// is not an object or a field has the wrong type.
    pub fn decode(&self) -> ProcessResult<EventEnvelope> {
        EventEnvelope::deserialize(&self.data).map_err(|source| ProcessError::Decode {
            what: "event envelope",
            source,
        })
    }
}

/// Decoded event: a type tag and a not-yet-interpreted payload.
///
/// Missing fields take their zero values, so an envelope without a tag is
/// routed as an unknown event rather than rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(
        rename = "event_type",
        alias = "EventType",
        alias = "eventType",
        default
    )]
    pub event_type: EventType,

    #[serde(alias = "Data", default)]
    pub data: Value,
}

impl EventEnvelope {
    pub fn new(event_type: EventType, data: Value) -> Self {
        Self { event_type, data }
    }

    /// Interpret the raw payload as `T`.
    ///
    /// A string payload is treated as JSON text and parsed first.
    pub fn decode_data<T: DeserializeOwned>(&self, what: &'static str) -> ProcessResult<T> {
        let decoded = match &self.data {
            Value::String(raw) => serde_json::from_str(raw),
            other => T::deserialize(other),
        };

        decoded.map_err(|source| ProcessError::Decode { what, source })
    }
}

/// Persisted record of one inbound message and its eventual outcome.
///
/// Once `outcome` is set the event is terminal and is never processed again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub message_id: String,
    pub event_type: String,
    pub data: String,
    #[serde(default)]
    pub outcome: Option<String>,
}

impl Event {
    /// A fresh, unprocessed event record
    pub fn new(
        id: u64,
        message_id: impl Into<String>,
        event_type: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            id,
            message_id: message_id.into(),
            event_type: event_type.into(),
            data: data.into(),
            outcome: None,
        }
    }

    /// Whether an outcome has already been stamped on this event
    pub fn is_processed(&self) -> bool {
        self.outcome.is_some()
    }
}
