//! Storage contracts consumed by the reconciler.
//!
//! The processor does not own storage. It talks to two collaborators:
//!
//! - [`EventRepository`]: the persisted record of each inbound message
//! - [`AppointmentRepository`]: booked appointments
//!
//! ## Built-in Implementations
//!
//! - [`memory`]: in-process maps, used by tests and local runs
//! - [`redis`]: JSON values in Redis, used by the worker
//!
//! Both enforce the one-appointment-per-slot rule inside `create` and report a
//! violation as [`RepositoryError::Conflict`].

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::appointment::Appointment;
use crate::context::Context;
use crate::event::Event;

pub use memory::{InMemoryAppointmentRepository, InMemoryEventRepository};
pub use self::redis::{RedisAppointmentRepository, RedisEventRepository};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Errors reported by repository implementations.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// No record matches the lookup
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// The appointment slot is already taken
    #[error("appointment slot already booked: {0}")]
    Conflict(String),

    /// Could not reach the storage backend
    #[error("storage connection error: {0}")]
    Connection(String),

    /// The storage backend rejected or failed a command
    #[error("storage command error: {0}")]
    Backend(String),

    /// Stored value could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// "No row" is data, not failure, at the conflict-check site.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Access to persisted event records.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Load the event correlated with a queue message.
    ///
    /// Returns [`RepositoryError::NotFound`] if no event has that message id.
    async fn get_by_message_id(&self, ctx: &Context, message_id: &str) -> RepositoryResult<Event>;

    /// Persist changes to an existing event.
    async fn update(&self, ctx: &Context, event: &Event) -> RepositoryResult<Event>;
}

/// Access to booked appointments.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    /// Find the appointment occupying a slot.
    ///
    /// Returns [`RepositoryError::NotFound`] if the slot is free.
    async fn get_by_ids_and_date_time(
        &self,
        ctx: &Context,
        schedule_id: u64,
        doctor_id: u64,
        date_time: DateTime<Utc>,
    ) -> RepositoryResult<Appointment>;

    /// Store a new appointment and return it with its assigned id.
    ///
    /// Returns [`RepositoryError::Conflict`] if the slot is already taken.
    async fn create(&self, ctx: &Context, appointment: &Appointment) -> RepositoryResult<Appointment>;
}
