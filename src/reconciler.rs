//! Appointment reconciliation.
//!
//! [`AppointmentReconciler`] books one appointment per event, exactly once:
//!
//! ```text
//! load event by message id ──► outcome set? ──yes──► done (AlreadyProcessed)
//!                                   │ no
//!                                   ▼
//!                       slot lookup (not found = free)
//!                         │                     │
//!                       free                  taken
//!                         ▼                     │
//!                 create appointment            │
//!                 (conflict = taken) ───────────┤
//!                         │                     │
//!                         ▼                     ▼
//!             outcome "created"        outcome "already booked"
//!                         └──────► persist event outcome
//! ```
//!
//! The outcome write is always the last step. If anything before it fails the
//! event stays unprocessed and a redelivery starts over.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::appointment::{Appointment, AppointmentStatus};
use crate::context::Context;
use crate::error::{ProcessError, ProcessResult};
use crate::event::Event;
use crate::repository::{AppointmentRepository, EventRepository};

/// Terminal result stamped onto an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    AppointmentCreated,
    AppointmentAlreadyBooked,
}

impl Outcome {
    pub const APPOINTMENT_CREATED: &'static str = "appointment created successfully";
    pub const APPOINTMENT_ALREADY_BOOKED: &'static str = "appointment already booked";

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppointmentCreated => Self::APPOINTMENT_CREATED,
            Self::AppointmentAlreadyBooked => Self::APPOINTMENT_ALREADY_BOOKED,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a successful reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// A new appointment was stored
    Created,
    /// The slot was taken; nothing was written but the outcome
    AlreadyBooked,
    /// The event already had an outcome; nothing was written
    AlreadyProcessed,
}

/// Handler for `create_appointment` events.
///
/// The router depends on this trait rather than the concrete reconciler.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CreateAppointmentHandler: Send + Sync {
    async fn handle_create_appointment(
        &self,
        ctx: &Context,
        message_id: &str,
        appointment: Appointment,
    ) -> ProcessResult<Reconciliation>;
}

/// Reconciles appointment requests against storage.
///
/// Holds no mutable state; all coordination is pushed to the repositories.
pub struct AppointmentReconciler {
    event_repository: Arc<dyn EventRepository>,
    appointment_repository: Arc<dyn AppointmentRepository>,
}

impl AppointmentReconciler {
    pub fn new(
        event_repository: Arc<dyn EventRepository>,
        appointment_repository: Arc<dyn AppointmentRepository>,
    ) -> Self {
        Self {
            event_repository,
            appointment_repository,
        }
    }

    /// Returns `true` if the appointment was stored, `false` if its slot is taken.
    async fn book(&self, ctx: &Context, message_id: &str, appointment: &Appointment) -> ProcessResult<bool> {
        info!(message_id = %message_id, "Checking if appointment already exists");

        match ctx
            .run(self.appointment_repository.get_by_ids_and_date_time(
                ctx,
                appointment.schedule_id,
                appointment.doctor_id,
                appointment.date_time,
            ))
            .await
        {
            Ok(existing) => {
                warn!(
                    message_id = %message_id,
                    existing_id = ?existing.id,
                    "Appointment date and time already booked"
                );
                return Ok(false);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                error!(
                    message_id = %message_id,
                    error = %e,
                    "Error checking if appointment already exists"
                );
                return Err(e);
            }
        }

        info!(message_id = %message_id, "Appointment does not exist, creating");

        match ctx.run(self.appointment_repository.create(ctx, appointment)).await {
            Ok(created) => {
                info!(
                    message_id = %message_id,
                    appointment_id = ?created.id,
                    "Appointment created"
                );
                Ok(true)
            }
            Err(ProcessError::Repository(e)) if e.is_conflict() => {
                // Lost the race to a concurrent create for the same slot
                warn!(message_id = %message_id, error = %e, "Appointment slot taken during create");
                Ok(false)
            }
            Err(e) => {
                error!(message_id = %message_id, error = %e, "Error creating appointment");
                Err(e)
            }
        }
    }

    /// Stamp the outcome and persist the event.
    #[instrument(skip(self, ctx, event), fields(event_id = event.id))]
    async fn update_event(
        &self,
        ctx: &Context,
        message_id: &str,
        mut event: Event,
        outcome: Outcome,
    ) -> ProcessResult<()> {
        info!(message_id = %message_id, outcome = %outcome, "Updating event");

        event.outcome = Some(outcome.as_str().to_string());

        if let Err(e) = ctx.run(self.event_repository.update(ctx, &event)).await {
            error!(message_id = %message_id, error = %e, "Error updating event");
            return Err(e);
        }

        info!(message_id = %message_id, "Event updated successfully");
        Ok(())
    }
}

#[async_trait]
impl CreateAppointmentHandler for AppointmentReconciler {
    #[instrument(
        skip(self, ctx, appointment),
        fields(schedule_id = appointment.schedule_id, doctor_id = appointment.doctor_id)
    )]
    async fn handle_create_appointment(
        &self,
        ctx: &Context,
        message_id: &str,
        appointment: Appointment,
    ) -> ProcessResult<Reconciliation> {
        info!(message_id = %message_id, "Loading event for message received");

        let event = match ctx
            .run(self.event_repository.get_by_message_id(ctx, message_id))
            .await
        {
            Ok(event) => event,
            Err(e) => {
                error!(message_id = %message_id, error = %e, "Error loading event");
                return Err(e);
            }
        };

        if event.is_processed() {
            warn!(
                message_id = %message_id,
                outcome = ?event.outcome,
                "Event already processed"
            );
            return Ok(Reconciliation::AlreadyProcessed);
        }

        let mut appointment = appointment;
        appointment.event_id = Some(event.id);
        appointment.status = AppointmentStatus::WaitingForConfirmation;

        let (outcome, reconciliation) = if self.book(ctx, message_id, &appointment).await? {
            (Outcome::AppointmentCreated, Reconciliation::Created)
        } else {
            (Outcome::AppointmentAlreadyBooked, Reconciliation::AlreadyBooked)
        };

        self.update_event(ctx, message_id, event, outcome).await?;

        Ok(reconciliation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MockAppointmentRepository, MockEventRepository, RepositoryError};
    use chrono::{DateTime, TimeZone, Utc};
    use std::time::Duration;

    fn slot_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    fn request() -> Appointment {
        Appointment::new(1, 2, slot_time())
    }

    fn pending_event() -> Event {
        Event::new(42, "msg-1", "create_appointment", "{}")
    }

    fn reconciler(
        events: MockEventRepository,
        appointments: MockAppointmentRepository,
    ) -> AppointmentReconciler {
        AppointmentReconciler::new(Arc::new(events), Arc::new(appointments))
    }

    #[test]
    fn test_outcome_strings() {
        assert_eq!(
            Outcome::AppointmentCreated.as_str(),
            "appointment created successfully"
        );
        assert_eq!(
            Outcome::AppointmentAlreadyBooked.to_string(),
            "appointment already booked"
        );
    }

    #[tokio::test]
    async fn test_creates_appointment_when_slot_free() {
        let mut events = MockEventRepository::new();
        let mut appointments = MockAppointmentRepository::new();

        events
            .expect_get_by_message_id()
            .withf(|_, message_id| message_id == "msg-1")
            .times(1)
            .returning(|_, _| Ok(pending_event()));

        appointments
            .expect_get_by_ids_and_date_time()
            .withf(|_, schedule_id, doctor_id, at| {
                *schedule_id == 1 && *doctor_id == 2 && *at == slot_time()
            })
            .times(1)
            .returning(|_, _, _, _| Err(RepositoryError::not_found("appointment", "slot")));

        appointments
            .expect_create()
            .withf(|_, appointment: &Appointment| {
                appointment.event_id == Some(42)
                    && appointment.status == AppointmentStatus::WaitingForConfirmation
                    && appointment.occupies(1, 2, slot_time())
            })
            .times(1)
            .returning(|_, appointment| {
                let mut created = appointment.clone();
                created.id = Some(7);
                Ok(created)
            });

        events
            .expect_update()
            .withf(|_, event: &Event| {
                event.id == 42 && event.outcome.as_deref() == Some(Outcome::APPOINTMENT_CREATED)
            })
            .times(1)
            .returning(|_, event| Ok(event.clone()));

        let result = reconciler(events, appointments)
            .handle_create_appointment(&Context::background(), "msg-1", request())
            .await;

        assert_eq!(result.unwrap(), Reconciliation::Created);
    }

    #[tokio::test]
    async fn test_marks_already_booked_when_slot_taken() {
        let mut events = MockEventRepository::new();
        let mut appointments = MockAppointmentRepository::new();

        events
            .expect_get_by_message_id()
            .times(1)
            .returning(|_, _| Ok(pending_event()));

        appointments
            .expect_get_by_ids_and_date_time()
            .times(1)
            .returning(|_, s, d, at| {
                let mut existing = Appointment::new(s, d, at);
                existing.id = Some(1);
                Ok(existing)
            });

        appointments.expect_create().never();

        events
            .expect_update()
            .withf(|_, event: &Event| {
                event.outcome.as_deref() == Some(Outcome::APPOINTMENT_ALREADY_BOOKED)
            })
            .times(1)
            .returning(|_, event| Ok(event.clone()));

        let result = reconciler(events, appointments)
            .handle_create_appointment(&Context::background(), "msg-1", request())
            .await;

        assert_eq!(result.unwrap(), Reconciliation::AlreadyBooked);
    }

    #[tokio::test]
    async fn test_skips_event_with_outcome() {
        let mut events = MockEventRepository::new();
        let mut appointments = MockAppointmentRepository::new();

        events.expect_get_by_message_id().times(1).returning(|_, _| {
            let mut event = pending_event();
            event.outcome = Some(Outcome::APPOINTMENT_CREATED.to_string());
            Ok(event)
        });
        events.expect_update().never();
        appointments.expect_get_by_ids_and_date_time().never();
        appointments.expect_create().never();

        let result = reconciler(events, appointments)
            .handle_create_appointment(&Context::background(), "msg-1", request())
            .await;

        assert_eq!(result.unwrap(), Reconciliation::AlreadyProcessed);
    }

    #[tokio::test]
    async fn test_event_lookup_failure_propagates() {
        let mut events = MockEventRepository::new();
        let mut appointments = MockAppointmentRepository::new();

        events
            .expect_get_by_message_id()
            .times(1)
            .returning(|_, id| Err(RepositoryError::not_found("event", id)));
        events.expect_update().never();
        appointments.expect_get_by_ids_and_date_time().never();
        appointments.expect_create().never();

        let result = reconciler(events, appointments)
            .handle_create_appointment(&Context::background(), "msg-404", request())
            .await;

        let err = result.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_conflict_check_failure_propagates() {
        let mut events = MockEventRepository::new();
        let mut appointments = MockAppointmentRepository::new();

        events
            .expect_get_by_message_id()
            .times(1)
            .returning(|_, _| Ok(pending_event()));
        appointments
            .expect_get_by_ids_and_date_time()
            .times(1)
            .returning(|_, _, _, _| Err(RepositoryError::Connection("refused".into())));
        appointments.expect_create().never();
        events.expect_update().never();

        let result = reconciler(events, appointments)
            .handle_create_appointment(&Context::background(), "msg-1", request())
            .await;

        assert!(matches!(
            result,
            Err(ProcessError::Repository(RepositoryError::Connection(_)))
        ));
    }

    #[tokio::test]
    async fn test_create_failure_leaves_outcome_unset() {
        let mut events = MockEventRepository::new();
        let mut appointments = MockAppointmentRepository::new();

        events
            .expect_get_by_message_id()
            .times(1)
            .returning(|_, _| Ok(pending_event()));
        appointments
            .expect_get_by_ids_and_date_time()
            .times(1)
            .returning(|_, _, _, _| Err(RepositoryError::not_found("appointment", "slot")));
        appointments
            .expect_create()
            .times(1)
            .returning(|_, _| Err(RepositoryError::Backend("disk full".into())));
        events.expect_update().never();

        let result = reconciler(events, appointments)
            .handle_create_appointment(&Context::background(), "msg-1", request())
            .await;

        assert!(matches!(
            result,
            Err(ProcessError::Repository(RepositoryError::Backend(_)))
        ));
    }

    #[tokio::test]
    async fn test_create_conflict_treated_as_already_booked() {
        let mut events = MockEventRepository::new();
        let mut appointments = MockAppointmentRepository::new();

        events
            .expect_get_by_message_id()
            .times(1)
            .returning(|_, _| Ok(pending_event()));
        appointments
            .expect_get_by_ids_and_date_time()
            .times(1)
            .returning(|_, _, _, _| Err(RepositoryError::not_found("appointment", "slot")));
        appointments
            .expect_create()
            .times(1)
            .returning(|_, a| Err(RepositoryError::Conflict(a.slot())));
        events
            .expect_update()
            .withf(|_, event: &Event| {
                event.outcome.as_deref() == Some(Outcome::APPOINTMENT_ALREADY_BOOKED)
            })
            .times(1)
            .returning(|_, event| Ok(event.clone()));

        let result = reconciler(events, appointments)
            .handle_create_appointment(&Context::background(), "msg-1", request())
            .await;

        assert_eq!(result.unwrap(), Reconciliation::AlreadyBooked);
    }

    #[tokio::test]
    async fn test_outcome_update_failure_propagates() {
        let mut events = MockEventRepository::new();
        let mut appointments = MockAppointmentRepository::new();

        events
            .expect_get_by_message_id()
            .times(1)
            .returning(|_, _| Ok(pending_event()));
        appointments
            .expect_get_by_ids_and_date_time()
            .times(1)
            .returning(|_, _, _, _| Err(RepositoryError::not_found("appointment", "slot")));
        appointments
            .expect_create()
            .times(1)
            .returning(|_, a| Ok(a.clone()));
        events
            .expect_update()
            .times(1)
            .returning(|_, _| Err(RepositoryError::Backend("READONLY".into())));

        let result = reconciler(events, appointments)
            .handle_create_appointment(&Context::background(), "msg-1", request())
            .await;

        assert!(matches!(
            result,
            Err(ProcessError::Repository(RepositoryError::Backend(_)))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_context_touches_nothing() {
        let mut events = MockEventRepository::new();
        let mut appointments = MockAppointmentRepository::new();

        events.expect_get_by_message_id().never();
        events.expect_update().never();
        appointments.expect_get_by_ids_and_date_time().never();
        appointments.expect_create().never();

        let ctx = Context::background();
        ctx.cancel();

        let result = reconciler(events, appointments)
            .handle_create_appointment(&ctx, "msg-1", request())
            .await;

        assert!(matches!(result, Err(ProcessError::Cancelled)));
    }

    /// A repository that never answers, to check the deadline is honoured.
    struct StalledEvents;

    #[async_trait]
    impl EventRepository for StalledEvents {
        async fn get_by_message_id(
            &self,
            _ctx: &Context,
            _message_id: &str,
        ) -> crate::repository::RepositoryResult<Event> {
            std::future::pending().await
        }

        async fn update(
            &self,
            _ctx: &Context,
            event: &Event,
        ) -> crate::repository::RepositoryResult<Event> {
            Ok(event.clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_repository_hits_deadline() {
        let mut appointments = MockAppointmentRepository::new();
        appointments.expect_get_by_ids_and_date_time().never();
        appointments.expect_create().never();

        let reconciler = AppointmentReconciler::new(Arc::new(StalledEvents), Arc::new(appointments));
        let ctx = Context::background().with_timeout(Duration::from_secs(5));

        let result = reconciler
            .handle_create_appointment(&ctx, "msg-1", request())
            .await;

        assert!(matches!(result, Err(ProcessError::DeadlineExceeded)));
    }
}
