//! Redis-backed repositories.
//!
//! Records are stored as JSON strings:
//!
//! ```text
//! {prefix}:event:{message_id}                            -> Event
//! {prefix}:appointment:{schedule}:{doctor}:{secs}.{nanos} -> Appointment
//! {prefix}:appointment:seq                               -> last appointment id
//! ```
//!
//! The slot key doubles as the uniqueness constraint: `create` writes it with
//! `SET NX`, so two concurrent creates for one slot cannot both succeed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::redis::{cmd, FromRedisValue};
use deadpool_redis::{Connection, Pool};
use tracing::{debug, error};

use super::{AppointmentRepository, EventRepository, RepositoryError, RepositoryResult};
use crate::appointment::Appointment;
use crate::context::Context;
use crate::event::Event;

/// Default key prefix for stored records
pub const DEFAULT_KEY_PREFIX: &str = "appointments";

async fn connection(pool: &Pool) -> RepositoryResult<Connection> {
    pool.get().await.map_err(|e| {
        error!(error = %e, "Failed to get Redis connection");
        RepositoryError::Connection(e.to_string())
    })
}

async fn query<T: FromRedisValue>(
    conn: &mut Connection,
    command: &deadpool_redis::redis::Cmd,
) -> RepositoryResult<T> {
    command
        .query_async(conn)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))
}

/// Event records stored under `{prefix}:event:{message_id}`.
#[derive(Clone)]
pub struct RedisEventRepository {
    pool: Pool,
    prefix: String,
}

impl RedisEventRepository {
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn key(&self, message_id: &str) -> String {
        format!("{}:event:{}", self.prefix, message_id)
    }
}

#[async_trait]
impl EventRepository for RedisEventRepository {
    async fn get_by_message_id(&self, _ctx: &Context, message_id: &str) -> RepositoryResult<Event> {
        let mut conn = connection(&self.pool).await?;

        let raw: Option<String> = query(&mut conn, cmd("GET").arg(self.key(message_id))).await?;
        let raw = raw.ok_or_else(|| RepositoryError::not_found("event", message_id))?;

        Ok(serde_json::from_str(&raw)?)
    }

    async fn update(&self, _ctx: &Context, event: &Event) -> RepositoryResult<Event> {
        let mut conn = connection(&self.pool).await?;
        let payload = serde_json::to_string(event)?;

        // XX: only overwrite an existing record
        let reply: Option<String> = query(
            &mut conn,
            cmd("SET").arg(self.key(&event.message_id)).arg(&payload).arg("XX"),
        )
        .await?;

        if reply.is_none() {
            return Err(RepositoryError::not_found("event", event.message_id.clone()));
        }

        debug!(message_id = %event.message_id, outcome = ?event.outcome, "Event updated");
        Ok(event.clone())
    }
}

/// Appointments stored one key per slot.
#[derive(Clone)]
pub struct RedisAppointmentRepository {
    pool: Pool,
    prefix: String,
}

impl RedisAppointmentRepository {
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn slot_key(&self, schedule_id: u64, doctor_id: u64, date_time: DateTime<Utc>) -> String {
        slot_key(&self.prefix, schedule_id, doctor_id, date_time)
    }

    fn sequence_key(&self) -> String {
        format!("{}:appointment:seq", self.prefix)
    }
}

/// Slot key at full timestamp precision; two instants share a key only when equal.
fn slot_key(prefix: &str, schedule_id: u64, doctor_id: u64, date_time: DateTime<Utc>) -> String {
    format!(
        "{}:appointment:{}:{}:{}.{:09}",
        prefix,
        schedule_id,
        doctor_id,
        date_time.timestamp(),
        date_time.timestamp_subsec_nanos()
    )
}

#[async_trait]
impl AppointmentRepository for RedisAppointmentRepository {
    async fn get_by_ids_and_date_time(
        &self,
        _ctx: &Context,
        schedule_id: u64,
        doctor_id: u64,
        date_time: DateTime<Utc>,
    ) -> RepositoryResult<Appointment> {
        let mut conn = connection(&self.pool).await?;
        let key = self.slot_key(schedule_id, doctor_id, date_time);

        let raw: Option<String> = query(&mut conn, cmd("GET").arg(&key)).await?;
        let raw = raw.ok_or_else(|| RepositoryError::not_found("appointment", key))?;

        Ok(serde_json::from_str(&raw)?)
    }

    async fn create(&self, _ctx: &Context, appointment: &Appointment) -> RepositoryResult<Appointment> {
        let mut conn = connection(&self.pool).await?;

        let id: u64 = query(&mut conn, cmd("INCR").arg(self.sequence_key())).await?;
        let mut created = appointment.clone();
        created.id = Some(id);

        let key = self.slot_key(created.schedule_id, created.doctor_id, created.date_time);
        let payload = serde_json::to_string(&created)?;

        let reply: Option<String> =
            query(&mut conn, cmd("SET").arg(&key).arg(&payload).arg("NX")).await?;

        if reply.is_none() {
            debug!(key = %key, "Slot key already present");
            return Err(RepositoryError::Conflict(created.slot()));
        }

        debug!(appointment_id = id, key = %key, "Appointment stored");
        Ok(created)
    }
}
