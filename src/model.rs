use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds: creation, expiry and send timestamps.
pub type Ms = i64;

/// Minutes since midnight, the only time-of-day unit.
pub type Minute = u32;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

// ── Time of day ──────────────────────────────────────────────────

/// A wall-clock time within a day, `00:00..=24:00`. Text form is `"HH:MM"`.
///
/// `24:00` only makes sense as a closing time; a slot starting there can
/// never fit a positive duration, so no special casing is needed downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(Minute);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time of day {0:?}, expected HH:MM")]
pub struct TimeParseError(pub String);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);

    pub fn from_minutes(minutes: Minute) -> Option<Self> {
        (minutes <= MINUTES_PER_DAY).then_some(Self(minutes))
    }

    pub fn hm(hour: u32, minute: u32) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        Self::from_minutes(hour.checked_mul(60)?.checked_add(minute)?)
    }

    pub fn minutes(self) -> Minute {
        self.0
    }

    /// `self + minutes`, or `None` past the end of the day.
    pub fn checked_add(self, minutes: Minute) -> Option<Self> {
        Self::from_minutes(self.0.checked_add(minutes)?)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for TimeOfDay {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || TimeParseError(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(err)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(err());
        }
        if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let hour: u32 = h.parse().map_err(|_| err())?;
        let minute: u32 = m.parse().map_err(|_| err())?;
        Self::hm(hour, minute).ok_or_else(err)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = TimeParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

// ── Spans ────────────────────────────────────────────────────────

/// Half-open interval `[start, end)` on the minutes-since-midnight timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// The interval occupied by something starting at `start` for `duration` minutes.
    pub fn at(start: TimeOfDay, duration: Minute) -> Self {
        Self::new(start.minutes(), start.minutes() + duration)
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Business hours ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Sunday,
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
    ];

    pub fn of(date: NaiveDate) -> Self {
        date.weekday().into()
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(w: Weekday) -> Self {
        match w {
            Weekday::Sun => DayOfWeek::Sunday,
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub open: TimeOfDay,
    pub close: TimeOfDay,
    #[serde(default)]
    pub closed: bool,
}

impl DayHours {
    pub fn new(open: TimeOfDay, close: TimeOfDay) -> Self {
        Self { open, close, closed: false }
    }

    pub fn closed() -> Self {
        Self {
            open: TimeOfDay::MIDNIGHT,
            close: TimeOfDay::MIDNIGHT,
            closed: true,
        }
    }

    /// Opening window, or `None` when the day is closed or empty.
    pub fn window(&self) -> Option<Span> {
        if self.closed || self.open >= self.close {
            return None;
        }
        Some(Span::new(self.open.minutes(), self.close.minutes()))
    }
}

/// Weekly opening hours. A weekday with no entry is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusinessHours(pub BTreeMap<DayOfWeek, DayHours>);

impl BusinessHours {
    /// Same hours on every listed day.
    pub fn uniform(days: &[DayOfWeek], open: TimeOfDay, close: TimeOfDay) -> Self {
        Self(days.iter().map(|d| (*d, DayHours::new(open, close))).collect())
    }

    pub fn day(&self, day: DayOfWeek) -> Option<&DayHours> {
        self.0.get(&day)
    }

    pub fn for_date(&self, date: NaiveDate) -> Option<&DayHours> {
        self.day(DayOfWeek::of(date))
    }

    pub fn set(&mut self, day: DayOfWeek, hours: DayHours) {
        self.0.insert(day, hours);
    }

    /// Every open day must open strictly before it closes.
    pub fn validate(&self) -> Result<(), DayOfWeek> {
        for (day, hours) in &self.0 {
            if !hours.closed && hours.open >= hours.close {
                return Err(*day);
            }
        }
        Ok(())
    }
}

// ── Domain records ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salon {
    pub id: Ulid,
    pub owner_id: String,
    pub name: String,
    pub address: Option<String>,
    pub hours: BusinessHours,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub salon_id: Ulid,
    pub name: String,
    pub duration_minutes: Minute,
    /// Minor currency units.
    pub price: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Canceled,
    Delayed,
}

impl AppointmentStatus {
    /// Whether an appointment in this status holds its slot.
    pub fn occupies(self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Canceled)
    }

    pub fn can_transition_to(self, to: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, to),
            (Pending, Confirmed | Canceled | Delayed)
                | (Confirmed, Completed | Canceled | Delayed)
                | (Delayed, Confirmed | Canceled | Delayed)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Canceled => "canceled",
            AppointmentStatus::Delayed => "delayed",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub salon_id: Ulid,
    pub service_id: Ulid,
    pub customer_id: String,
    pub date: NaiveDate,
    pub time: TimeOfDay,
    pub duration_minutes: Minute,
    pub price: u64,
    pub status: AppointmentStatus,
    pub payment_ref: Option<String>,
    pub notes: Option<String>,
    pub created_at: Ms,
    /// Pending appointments stop holding their slot at this instant.
    pub expires_at: Option<Ms>,
}

impl Appointment {
    pub fn span(&self) -> Span {
        Span::at(self.time, self.duration_minutes)
    }

    /// Occupies its slot as of `now`: pending (and not yet expired) or confirmed.
    pub fn is_active(&self, now: Ms) -> bool {
        match self.status {
            AppointmentStatus::Pending => self.expires_at.is_none_or(|e| e > now),
            AppointmentStatus::Confirmed => true,
            _ => false,
        }
    }

    pub fn is_expired_pending(&self, now: Ms) -> bool {
        self.status == AppointmentStatus::Pending && self.expires_at.is_some_and(|e| e <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Ulid,
    pub salon_id: Ulid,
    pub customer_id: String,
    pub from_owner: bool,
    pub body: String,
    pub sent_at: Ms,
}

/// The event types, flat where practical. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SalonCreated {
        id: Ulid,
        owner_id: String,
        name: String,
        address: Option<String>,
        hours: BusinessHours,
        created_at: Ms,
    },
    SalonUpdated {
        id: Ulid,
        name: String,
        address: Option<String>,
    },
    SalonDeleted {
        id: Ulid,
    },
    HoursSet {
        salon_id: Ulid,
        hours: BusinessHours,
    },
    ServiceAdded {
        id: Ulid,
        salon_id: Ulid,
        name: String,
        duration_minutes: Minute,
        price: u64,
    },
    ServiceUpdated {
        id: Ulid,
        salon_id: Ulid,
        name: String,
        duration_minutes: Minute,
        price: u64,
    },
    ServiceRemoved {
        id: Ulid,
        salon_id: Ulid,
    },
    AppointmentBooked {
        appointment: Appointment,
    },
    AppointmentStatusChanged {
        id: Ulid,
        salon_id: Ulid,
        status: AppointmentStatus,
        date: NaiveDate,
        time: TimeOfDay,
        payment_ref: Option<String>,
    },
    MessageSent {
        message: Message,
    },
}

impl Event {
    /// The salon this event applies to.
    pub fn salon_id(&self) -> Ulid {
        match self {
            Event::SalonCreated { id, .. }
            | Event::SalonUpdated { id, .. }
            | Event::SalonDeleted { id } => *id,
            Event::HoursSet { salon_id, .. }
            | Event::ServiceAdded { salon_id, .. }
            | Event::ServiceUpdated { salon_id, .. }
            | Event::ServiceRemoved { salon_id, .. }
            | Event::AppointmentStatusChanged { salon_id, .. } => *salon_id,
            Event::AppointmentBooked { appointment } => appointment.salon_id,
            Event::MessageSent { message } => message.salon_id,
        }
    }
}

// ── Query types ──────────────────────────────────────────────────

/// Filter for appointment listings. Every field narrows the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AppointmentFilter {
    pub salon_id: Option<Ulid>,
    pub customer_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentFilter {
    pub fn matches(&self, a: &Appointment) -> bool {
        self.salon_id.is_none_or(|s| s == a.salon_id)
            && self.customer_id.as_deref().is_none_or(|c| c == a.customer_id)
            && self.date.is_none_or(|d| d == a.date)
            && self.status.is_none_or(|s| s == a.status)
    }
}

/// A customer's booking request. Duration and price come from the service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BookingRequest {
    pub salon_id: Ulid,
    pub service_id: Ulid,
    pub customer_id: String,
    pub date: NaiveDate,
    pub time: TimeOfDay,
    pub notes: Option<String>,
}

/// Bookable start times for one salon and date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayAvailability {
    pub salon_id: Ulid,
    pub date: NaiveDate,
    pub duration_minutes: Minute,
    /// `None` when the salon is closed that day.
    pub hours: Option<DayHours>,
    pub slots: Vec<TimeOfDay>,
    pub free_windows: Vec<Span>,
}

/// Requested change on the status-update path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusUpdate {
    pub status: AppointmentStatus,
    /// New date and time, required when delaying.
    pub date: Option<NaiveDate>,
    pub time: Option<TimeOfDay>,
    pub payment_ref: Option<String>,
}

impl StatusUpdate {
    pub fn to(status: AppointmentStatus) -> Self {
        Self {
            status,
            date: None,
            time: None,
            payment_ref: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub customer_id: String,
    pub last_message: Message,
    pub message_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub service_id: Ulid,
    pub name: Option<String>,
    pub bookings: usize,
    pub revenue: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SalonAnalytics {
    pub total_appointments: usize,
    pub by_status: BTreeMap<AppointmentStatus, usize>,
    /// Sum of completed appointment prices.
    pub revenue: u64,
    /// Sum of confirmed (not yet completed) appointment prices.
    pub pending_revenue: u64,
    pub services: Vec<ServiceStats>,
    pub busiest_day: Option<DayOfWeek>,
    pub unique_customers: usize,
}
