use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{AppointmentStatus, DayOfWeek, TimeOfDay};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    /// The requested slot overlaps an active appointment.
    #[error("slot conflicts with appointment: {0}")]
    Conflict(Ulid),
    #[error("{time} on {date} is outside business hours")]
    OutsideBusinessHours { date: NaiveDate, time: TimeOfDay },
    #[error("cannot move appointment from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("cannot delete salon {0}: it has active appointments")]
    HasActiveAppointments(Ulid),
    #[error("business hours on {0:?} must open before they close")]
    InvalidHours(DayOfWeek),
    #[error("invalid input: {0}")]
    Invalid(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}
