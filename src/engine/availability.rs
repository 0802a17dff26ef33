use crate::limits::SLOT_INTERVAL_MINUTES;
use crate::model::*;

// ── Slot generation ───────────────────────────────────────────────

/// Candidate start times for one day: from the opening time, every
/// `step` minutes, while `start + duration <= close`.
///
/// Lazy, finite and restartable (clone it to iterate again). Does not look
/// at bookings; callers filter occupied times separately.
#[derive(Debug, Clone)]
pub struct Slots {
    cursor: Minute,
    close: Minute,
    duration: Minute,
    step: Minute,
}

impl Slots {
    pub fn new(hours: Option<&DayHours>, duration: Minute, step: Minute) -> Self {
        debug_assert!(step > 0, "slot step must be positive");
        match hours.and_then(DayHours::window) {
            Some(window) => Self {
                cursor: window.start,
                close: window.end,
                duration,
                step,
            },
            // Closed: cursor past close, so the first `next` yields None.
            None => Self {
                cursor: 1,
                close: 0,
                duration,
                step,
            },
        }
    }

    fn remaining(&self) -> usize {
        match self.close.checked_sub(self.duration) {
            Some(last) if self.cursor <= last => ((last - self.cursor) / self.step) as usize + 1,
            _ => 0,
        }
    }
}

impl Iterator for Slots {
    type Item = TimeOfDay;

    fn next(&mut self) -> Option<TimeOfDay> {
        if self.remaining() == 0 {
            return None;
        }
        let start = self.cursor;
        self.cursor += self.step;
        TimeOfDay::from_minutes(start)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for Slots {}

/// Candidate slots for a day at the standard 30-minute interval.
pub fn slots(hours: Option<&DayHours>, duration: Minute) -> Slots {
    Slots::new(hours, duration, SLOT_INTERVAL_MINUTES)
}

/// `[start, start + duration)` lies within the day's opening window.
pub fn fits_hours(hours: Option<&DayHours>, start: TimeOfDay, duration: Minute) -> bool {
    let Some(window) = hours.and_then(DayHours::window) else {
        return false;
    };
    match start.checked_add(duration) {
        Some(end) => window.start <= start.minutes() && end.minutes() <= window.end,
        None => false,
    }
}

// ── Interval arithmetic ──────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both inputs sorted by start; `to_remove` may overlap itself.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Unbooked parts of the day's opening window.
pub fn free_windows(hours: Option<&DayHours>, occupied: &[Span]) -> Vec<Span> {
    let Some(window) = hours.and_then(DayHours::window) else {
        return Vec::new();
    };
    let mut occupied = occupied.to_vec();
    occupied.sort_by_key(|s| s.start);
    subtract_intervals(&[window], &merge_overlapping(&occupied))
}

/// Candidate slots that do not overlap any occupied span.
pub fn free_slots(hours: Option<&DayHours>, duration: Minute, occupied: &[Span]) -> Vec<TimeOfDay> {
    let free = free_windows(hours, occupied);
    slots(hours, duration)
        .filter(|t| {
            let wanted = Span::at(*t, duration);
            // Windows are disjoint and sorted: only the first one ending at or
            // after `wanted.end` can contain it.
            let idx = free.partition_point(|w| w.end < wanted.end);
            free.get(idx).is_some_and(|w| w.contains_span(&wanted))
        })
        .collect()
}
