//! Event Router - maps an event type to its handler.
//!
//! Dispatch is a plain `match` over [`EventType`]; every supported type is
//! bound to a handler at compile time.
//!
//! ```text
//! Event type          | Handler
//! --------------------|------------------------------------------
//! create_appointment  | CreateAppointmentHandler (reconciler)
//! update_appointment  | none, dropped
//! anything else       | none, dropped
//! ```
//!
//! Dropped events are logged at error level and reported as success: they are
//! not retried and not escalated.
//!
//! # Example
//!
//! ```rust,ignore
//! use appointment_creator::{EventRouter, AppointmentReconciler};
//! use std::sync::Arc;
//!
//! let router = EventRouter::new(Arc::new(AppointmentReconciler::new(events, appointments)));
//! let dispatch = router.dispatch(&ctx, "msg-1", &envelope).await?;
//! ```

use std::sync::Arc;
use tracing::{debug, error, info};

use crate::appointment::Appointment;
use crate::context::Context;
use crate::error::ProcessResult;
use crate::event::{EventEnvelope, EventType};
use crate::reconciler::{CreateAppointmentHandler, Reconciliation};

/// Result of routing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler ran to completion
    Reconciled(Reconciliation),

    /// No handler exists for this event type; nothing was done
    Dropped { event_type: String },
}

/// Routes decoded events to their handlers.
///
/// Holds only shared handler references, so it can be wrapped in `Arc` and
/// used from many tasks at once.
#[derive(Clone)]
pub struct EventRouter {
    create_appointment: Arc<dyn CreateAppointmentHandler>,
}

impl EventRouter {
    pub fn new(create_appointment: Arc<dyn CreateAppointmentHandler>) -> Self {
        Self { create_appointment }
    }

    /// Dispatch an event to its handler.
    ///
    /// # Error Handling
    ///
    /// - Unknown event type: logged, returns `Ok(Dispatch::Dropped)`
    /// - Malformed payload for a known type: [`crate::ProcessError::Decode`]
    /// - Handler errors are returned unchanged
    pub async fn dispatch(
        &self,
        ctx: &Context,
        message_id: &str,
        envelope: &EventEnvelope,
    ) -> ProcessResult<Dispatch> {
        debug!(
            message_id = %message_id,
            event_type = %envelope.event_type,
            "Checking handler for event type"
        );

        match &envelope.event_type {
            EventType::CreateAppointment => {
                let appointment: Appointment = envelope.decode_data("appointment payload")?;

                let reconciliation = self
                    .create_appointment
                    .handle_create_appointment(ctx, message_id, appointment)
                    .await?;

                info!(
                    message_id = %message_id,
                    result = ?reconciliation,
                    "Event processed successfully"
                );

                Ok(Dispatch::Reconciled(reconciliation))
            }
            other => {
                error!(
                    message_id = %message_id,
                    event_type = %other,
                    "Event handler not found"
                );

                Ok(Dispatch::Dropped {
                    event_type: other.to_string(),
                })
            }
        }
    }
}
