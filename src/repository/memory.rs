//! In-memory repositories.
//!
//! Useful for tests and for running the processor without a storage backend.
//! Write counters let callers assert exactly which side effects happened.
//!
//! # Example
//!
//! ```rust,ignore
//! use appointment_creator::repository::{InMemoryAppointmentRepository, InMemoryEventRepository};
//! use appointment_creator::event::Event;
//!
//! let events = InMemoryEventRepository::new();
//! events.insert(Event::new(1, "msg-1", "create_appointment", "{}")).await;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use super::{AppointmentRepository, EventRepository, RepositoryError, RepositoryResult};
use crate::appointment::Appointment;
use crate::context::Context;
use crate::event::Event;

/// Event records keyed by message id.
#[derive(Debug, Default)]
pub struct InMemoryEventRepository {
    events: RwLock<HashMap<String, Event>>,
    updates: AtomicUsize,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an event record, replacing any record with the same message id.
    pub async fn insert(&self, event: Event) {
        self.events
            .write()
            .await
            .insert(event.message_id.clone(), event);
    }

    /// Current state of an event record
    pub async fn get(&self, message_id: &str) -> Option<Event> {
        self.events.read().await.get(message_id).cloned()
    }

    /// Number of successful `update` calls
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn get_by_message_id(&self, _ctx: &Context, message_id: &str) -> RepositoryResult<Event> {
        self.events
            .read()
            .await
            .get(message_id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("event", message_id))
    }

    async fn update(&self, _ctx: &Context, event: &Event) -> RepositoryResult<Event> {
        let mut events = self.events.write().await;

        let stored = events
            .get_mut(&event.message_id)
            .ok_or_else(|| RepositoryError::not_found("event", event.message_id.clone()))?;
        *stored = event.clone();
        self.updates.fetch_add(1, Ordering::SeqCst);

        debug!(message_id = %event.message_id, outcome = ?event.outcome, "Event updated");
        Ok(event.clone())
    }
}

/// Appointments held in a vector, unique per slot.
#[derive(Debug)]
pub struct InMemoryAppointmentRepository {
    appointments: RwLock<Vec<Appointment>>,
    next_id: AtomicU64,
    creates: AtomicUsize,
}

impl InMemoryAppointmentRepository {
    pub fn new() -> Self {
        Self {
            appointments: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            creates: AtomicUsize::new(0),
        }
    }

    /// Seed an appointment without going through the uniqueness check.
    pub async fn insert(&self, mut appointment: Appointment) -> Appointment {
        if appointment.id.is_none() {
            appointment.id = Some(self.next_id.fetch_add(1, Ordering::SeqCst));
        }
        self.appointments.write().await.push(appointment.clone());
        appointment
    }

    /// Snapshot of every stored appointment
    pub async fn all(&self) -> Vec<Appointment> {
        self.appointments.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.appointments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.appointments.read().await.is_empty()
    }

    /// Number of successful `create` calls
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryAppointmentRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AppointmentRepository for InMemoryAppointmentRepository {
    async fn get_by_ids_and_date_time(
        &self,
        _ctx: &Context,
        schedule_id: u64,
        doctor_id: u64,
        date_time: DateTime<Utc>,
    ) -> RepositoryResult<Appointment> {
        self.appointments
            .read()
            .await
            .iter()
            .find(|a| a.occupies(schedule_id, doctor_id, date_time))
            .cloned()
            .ok_or_else(|| {
                RepositoryError::not_found(
                    "appointment",
                    format!("schedule={schedule_id} doctor={doctor_id} at={}", date_time.to_rfc3339()),
                )
            })
    }

    async fn create(&self, _ctx: &Context, appointment: &Appointment) -> RepositoryResult<Appointment> {
        // Check and insert under one write lock so the slot stays unique
        let mut appointments = self.appointments.write().await;

        if appointments
            .iter()
            .any(|a| a.occupies(appointment.schedule_id, appointment.doctor_id, appointment.date_time))
        {
            return Err(RepositoryError::Conflict(appointment.slot()));
        }

        let mut created = appointment.clone();
        created.id = Some(self.next_id.fetch_add(1, Ordering::SeqCst));
        appointments.push(created.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);

        debug!(appointment_id = ?created.id, slot = %created.slot(), "Appointment stored");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn slot_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_event_lookup_and_update() {
        let repo = InMemoryEventRepository::new();
        let ctx = Context::background();
        repo.insert(Event::new(1, "msg-1", "create_appointment", "{}")).await;

        let mut event = repo.get_by_message_id(&ctx, "msg-1").await.unwrap();
        assert_eq!(event.id, 1);

        event.outcome = Some("done".to_string());
        repo.update(&ctx, &event).await.unwrap();

        assert_eq!(repo.get("msg-1").await.unwrap().outcome.as_deref(), Some("done"));
        assert_eq!(repo.update_count(), 1);
    }

    #[tokio::test]
    async fn test_event_not_found() {
        let repo = InMemoryEventRepository::new();
        let ctx = Context::background();

        let err = repo.get_by_message_id(&ctx, "missing").await.unwrap_err();
        assert!(err.is_not_found());

        let err = repo
            .update(&ctx, &Event::new(9, "missing", "create_appointment", "{}"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(repo.update_count(), 0);
    }

    #[tokio::test]
    async fn test_appointment_create_assigns_id() {
        let repo = InMemoryAppointmentRepository::new();
        let ctx = Context::background();

        let created = repo
            .create(&ctx, &Appointment::new(1, 2, slot_time()))
            .await
            .unwrap();
        assert_eq!(created.id, Some(1));

        let found = repo
            .get_by_ids_and_date_time(&ctx, 1, 2, slot_time())
            .await
            .unwrap();
        assert_eq!(found, created);
        assert_eq!(repo.create_count(), 1);
    }

    #[tokio::test]
    async fn test_appointment_slot_conflict() {
        let repo = InMemoryAppointmentRepository::new();
        let ctx = Context::background();
        repo.insert(Appointment::new(1, 2, slot_time())).await;

        let err = repo
            .create(&ctx, &Appointment::new(1, 2, slot_time()))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(repo.len().await, 1);
        assert_eq!(repo.create_count(), 0);
    }

    #[tokio::test]
    async fn test_appointment_lookup_free_slot() {
        let repo = InMemoryAppointmentRepository::new();
        let ctx = Context::background();
        repo.insert(Appointment::new(1, 2, slot_time())).await;

        let err = repo
            .get_by_ids_and_date_time(&ctx, 1, 3, slot_time())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
