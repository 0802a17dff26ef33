use chrono::NaiveDate;
use thiserror::Error;
use tracing::warn;

use crate::model::*;

use super::SalonState;

/// Which composite appointment indexes the store maintains. A query whose
/// shape needs a missing index fails with [`LookupError::MissingIndex`]
/// instead of scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSet {
    /// salon + date + status
    pub salon_date_status: bool,
    /// salon + date
    pub salon_date: bool,
}

impl Default for IndexSet {
    fn default() -> Self {
        Self {
            salon_date_status: true,
            salon_date: true,
        }
    }
}

impl IndexSet {
    pub fn none() -> Self {
        Self {
            salon_date_status: false,
            salon_date: false,
        }
    }

    /// Parse a comma-separated index list (`salon_date_status,salon_date`).
    /// Unknown names are returned alongside the result.
    pub fn parse(list: &str) -> (Self, Vec<String>) {
        let mut set = Self::none();
        let mut unknown = Vec::new();
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match name {
                "salon_date_status" => set.salon_date_status = true,
                "salon_date" => set.salon_date = true,
                other => unknown.push(other.to_string()),
            }
        }
        (set, unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("query needs a composite index on ({0})")]
    MissingIndex(&'static str),
}

/// Appointment queries a salon's store understands, most selective first.
#[derive(Debug, Clone, Copy)]
pub enum AppointmentQuery<'a> {
    ByDateAndStatus {
        date: NaiveDate,
        statuses: &'a [AppointmentStatus],
    },
    ByDate {
        date: NaiveDate,
    },
}

impl SalonState {
    /// Run an indexed query. Never scans: a missing index is an error.
    pub fn query(
        &self,
        query: &AppointmentQuery<'_>,
        indexes: IndexSet,
    ) -> Result<Vec<&Appointment>, LookupError> {
        match *query {
            AppointmentQuery::ByDateAndStatus { date, statuses } => {
                if !indexes.salon_date_status {
                    return Err(LookupError::MissingIndex("salon_id, date, status"));
                }
                Ok(self
                    .on_date(date)
                    .iter()
                    .filter(|a| statuses.contains(&a.status))
                    .collect())
            }
            AppointmentQuery::ByDate { date } => {
                if !indexes.salon_date {
                    return Err(LookupError::MissingIndex("salon_id, date"));
                }
                Ok(self.on_date(date).iter().collect())
            }
        }
    }

    /// Every appointment of the salon. Single-field lookups need no composite index.
    pub fn all_appointments(&self) -> Vec<&Appointment> {
        self.appointments.iter().collect()
    }
}

const ACTIVE_STATUSES: &[AppointmentStatus] =
    &[AppointmentStatus::Pending, AppointmentStatus::Confirmed];

/// Appointments holding a slot on `date` as of `now`.
///
/// Issues the salon + date + status query first; on a missing index drops
/// the status filter, then the date filter, and filters in memory instead.
pub fn active_appointments(
    rs: &SalonState,
    date: NaiveDate,
    indexes: IndexSet,
    now: Ms,
) -> Vec<&Appointment> {
    let preferred = AppointmentQuery::ByDateAndStatus {
        date,
        statuses: ACTIVE_STATUSES,
    };
    let found = match rs.query(&preferred, indexes) {
        Ok(found) => found,
        Err(e) => {
            record_fallback(rs, "salon_date", &e);
            match rs.query(&AppointmentQuery::ByDate { date }, indexes) {
                Ok(found) => found,
                Err(e) => {
                    record_fallback(rs, "salon", &e);
                    rs.all_appointments()
                }
            }
        }
    };
    found
        .into_iter()
        .filter(|a| a.date == date && a.is_active(now))
        .collect()
}

fn record_fallback(rs: &SalonState, level: &'static str, err: &LookupError) {
    warn!(salon_id = %rs.salon.id, "appointment lookup degraded to {level} query: {err}");
    metrics::counter!(crate::observability::LOOKUP_FALLBACKS_TOTAL, "level" => level).increment(1);
}
