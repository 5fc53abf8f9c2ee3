//! # Appointment Creator
//!
//! Event-driven appointment booking. Each queue message describing an
//! appointment request is checked against storage and either books the slot
//! or records that it was already taken, exactly once per event.
//!
//! ## Architecture
//!
//! ```text
//! Redis Stream -> Worker -> EventProcessor -> EventRouter -> AppointmentReconciler
//!                                                                 │
//!                                        EventRepository / AppointmentRepository
//! ```
//!
//! ## Modules
//!
//! - [`event`]: Queue message envelope, event types and the persisted event record
//! - [`appointment`]: Appointment payload and status
//! - [`router`]: Event-type dispatch
//! - [`reconciler`]: Idempotent appointment booking and outcome persistence
//! - [`processor`]: The per-message entry point
//! - [`repository`]: Storage contracts plus in-memory and Redis implementations
//! - [`context`]: Cancellation and deadlines for collaborator calls

pub mod appointment;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod processor;
pub mod reconciler;
pub mod repository;
pub mod router;
pub mod shutdown;
pub mod stream;

// Re-export commonly used types at crate root
pub use appointment::{Appointment, AppointmentStatus};
pub use context::Context;
pub use error::{ProcessError, ProcessResult};
pub use event::{Event, EventEnvelope, EventType, QueueMessage};
pub use processor::EventProcessor;
pub use reconciler::{AppointmentReconciler, CreateAppointmentHandler, Outcome, Reconciliation};
pub use router::{Dispatch, EventRouter};

/// Redis stream carrying appointment events
pub const EVENT_STREAM_NAME: &str = "appointments:events";

/// Default consumer group name
pub const DEFAULT_CONSUMER_GROUP: &str = "appointment_creators";
