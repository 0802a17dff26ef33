use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::fits_hours;
use super::lookup::{active_appointments, IndexSet};
use super::{EngineError, SalonState};

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_text(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Invalid(what));
    }
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

pub(crate) fn validate_optional(value: Option<&str>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

pub(crate) fn validate_duration(duration: Minute) -> Result<(), EngineError> {
    if duration == 0 {
        return Err(EngineError::Invalid("duration must be positive"));
    }
    if duration > MAX_DURATION_MINUTES {
        return Err(EngineError::LimitExceeded("duration too long"));
    }
    Ok(())
}

pub(crate) fn validate_price(price: u64) -> Result<(), EngineError> {
    if price > MAX_PRICE {
        return Err(EngineError::LimitExceeded("price too large"));
    }
    Ok(())
}

/// Reject `span` if it overlaps any of `active`, ignoring `exclude`.
pub(crate) fn check_no_conflict(
    active: &[&Appointment],
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for a in active {
        if Some(a.id) == exclude {
            continue;
        }
        if a.span().overlaps(span) {
            return Err(EngineError::Conflict(a.id));
        }
    }
    Ok(())
}

/// Full slot check for placing `duration` minutes at `date`/`time`:
/// within business hours, and clear of every active appointment.
pub(crate) fn check_slot(
    rs: &SalonState,
    date: NaiveDate,
    time: TimeOfDay,
    duration: Minute,
    exclude: Option<Ulid>,
    indexes: IndexSet,
    now: Ms,
) -> Result<(), EngineError> {
    if !fits_hours(rs.salon.hours.for_date(date), time, duration) {
        return Err(EngineError::OutsideBusinessHours { date, time });
    }
    let active = active_appointments(rs, date, indexes, now);
    let result = check_no_conflict(&active, &Span::at(time, duration), exclude);
    if let Err(EngineError::Conflict(existing)) = &result {
        tracing::debug!(salon_id = %rs.salon.id, %date, %time, "slot taken by {existing}");
        metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
    }
    result
}
