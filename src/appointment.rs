//! Appointment payload and record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    /// Booked by this service, awaiting confirmation downstream
    #[default]
    WaitingForConfirmation,
    Confirmed,
    Cancelled,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WaitingForConfirmation => "waiting_for_confirmation",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A booking linking a schedule, a doctor and a point in time.
///
/// At most one appointment exists per `(schedule_id, doctor_id, date_time)`.
/// Inbound payloads carry only the slot; `event_id` and `status` are stamped
/// when the appointment is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    /// Storage-assigned identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    #[serde(alias = "ScheduleID")]
    pub schedule_id: u64,

    #[serde(alias = "DoctorID")]
    pub doctor_id: u64,

    #[serde(alias = "DateTime")]
    pub date_time: DateTime<Utc>,

    /// Event that created this appointment
    #[serde(default, alias = "EventID")]
    pub event_id: Option<u64>,

    #[serde(default, alias = "Status")]
    pub status: AppointmentStatus,
}

impl Appointment {
    /// A new request for a slot, not yet linked to an event
    pub fn new(schedule_id: u64, doctor_id: u64, date_time: DateTime<Utc>) -> Self {
        Self {
            id: None,
            schedule_id,
            doctor_id,
            date_time,
            event_id: None,
            status: AppointmentStatus::default(),
        }
    }

    /// Whether this appointment occupies the given slot.
    pub fn occupies(&self, schedule_id: u64, doctor_id: u64, date_time: DateTime<Utc>) -> bool {
        self.schedule_id == schedule_id && self.doctor_id == doctor_id && self.date_time == date_time
    }

    /// Human-readable slot key, used in logs and error messages
    pub fn slot(&self) -> String {
        format!(
            "schedule={} doctor={} at={}",
            self.schedule_id,
            self.doctor_id,
            self.date_time.to_rfc3339()
        )
    }
}
