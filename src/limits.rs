use crate::model::Minute;

/// Step between candidate slot start times.
pub const SLOT_INTERVAL_MINUTES: Minute = 30;

/// Longest bookable service.
pub const MAX_DURATION_MINUTES: Minute = 12 * 60;

pub const MAX_SALONS: usize = 100_000;
pub const MAX_SERVICES_PER_SALON: usize = 500;
pub const MAX_APPOINTMENTS_PER_SALON: usize = 1_000_000;
pub const MAX_MESSAGES_PER_SALON: usize = 1_000_000;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_ADDRESS_LEN: usize = 500;
pub const MAX_ID_LEN: usize = 128;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_MESSAGE_LEN: usize = 4_000;
pub const MAX_PAYMENT_REF_LEN: usize = 256;

/// Largest accepted service price, in minor currency units.
pub const MAX_PRICE: u64 = 1_000_000_000;

/// Largest encoded event a WAL record may carry.
pub const MAX_WAL_RECORD_BYTES: usize = 16 * 1024 * 1024;
