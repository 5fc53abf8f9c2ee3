//! Redis stream entry parsing.
//!
//! Producers append entries like:
//!
//! ```text
//! XADD appointments:events * messageId <uuid> data '{"EventType":"create_appointment","Data":{...}}'
//! ```
//!
//! `messageId` correlates the delivery with its persisted event record. When
//! it is missing the stream entry id is used instead.

use deadpool_redis::redis::{RedisError, Value as RedisValue};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::event::QueueMessage;

/// Field holding the correlation id
pub const MESSAGE_ID_FIELD: &str = "messageId";

/// Field holding the JSON envelope
pub const DATA_FIELD: &str = "data";

/// Pause before retrying after a connection or stream read failure.
pub const READ_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Why a stream entry could not be turned into a message.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error("stream entry has no '{0}' field")]
    MissingField(&'static str),

    #[error("stream entry field '{field}' is not valid JSON: {source}")]
    InvalidJson {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// A delivery ready to be handed to the processor.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Stream entry id, used for XACK
    pub entry_id: String,

    /// Correlation id of the persisted event
    pub message_id: String,

    pub message: QueueMessage,
}

/// Turn a raw stream entry into a [`Delivery`].
pub fn parse_entry(
    entry_id: &str,
    map: &HashMap<String, RedisValue>,
) -> Result<Delivery, EntryError> {
    let raw = get_optional_str_field(map, DATA_FIELD).ok_or(EntryError::MissingField(DATA_FIELD))?;

    let data: Value = serde_json::from_str(&raw).map_err(|source| EntryError::InvalidJson {
        field: DATA_FIELD,
        source,
    })?;

    let message_id =
        get_optional_str_field(map, MESSAGE_ID_FIELD).unwrap_or_else(|| entry_id.to_string());

    Ok(Delivery {
        entry_id: entry_id.to_string(),
        message_id,
        message: QueueMessage::new(data),
    })
}

/// A blocking read that simply returned no entries.
///
/// Anything else is a real failure and the consumer backs off for
/// [`READ_ERROR_BACKOFF`] before reading again.
pub fn is_idle_read(error: &RedisError) -> bool {
    is_idle_read_message(&error.to_string())
}

fn is_idle_read_message(message: &str) -> bool {
    message.contains("timed out") || message.contains("response was nil")
}

/// Extract a non-empty string field from Redis stream data.
fn get_optional_str_field(map: &HashMap<String, RedisValue>, key: &str) -> Option<String> {
    map.get(key).and_then(|val| match val {
        RedisValue::BulkString(bytes) => {
            let s = String::from_utf8_lossy(bytes).to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        }
        RedisValue::SimpleString(s) => {
            if s.is_empty() {
                None
            } else {
                Some(s.clone())
            }
        }
        _ => None,
    })
}
