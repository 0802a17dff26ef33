use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::{free_slots, free_windows};
use super::conflict::{now_ms, validate_duration};
use super::lookup::active_appointments;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_salon(&self, id: Ulid) -> Result<Salon, EngineError> {
        let rs = self.get_salon_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.salon.clone())
    }

    /// Salons filtered by owner and by a case-insensitive name substring,
    /// sorted by name.
    pub async fn list_salons(&self, owner_id: Option<&str>, name_query: Option<&str>) -> Vec<Salon> {
        let needle = name_query.map(str::to_lowercase);
        let salons: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut found = Vec::new();
        for rs in salons {
            let guard = rs.read().await;
            let salon = &guard.salon;
            if owner_id.is_some_and(|o| o != salon.owner_id) {
                continue;
            }
            if let Some(ref n) = needle
                && !salon.name.to_lowercase().contains(n.as_str())
            {
                continue;
            }
            found.push(salon.clone());
        }
        found.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        found
    }

    pub async fn list_services(&self, salon_id: Ulid) -> Result<Vec<Service>, EngineError> {
        let rs = self
            .get_salon_state(&salon_id)
            .ok_or(EngineError::NotFound(salon_id))?;
        let guard = rs.read().await;
        Ok(guard.services.clone())
    }

    pub async fn service_duration(&self, salon_id: Ulid, service_id: Ulid) -> Result<Minute, EngineError> {
        let rs = self
            .get_salon_state(&salon_id)
            .ok_or(EngineError::NotFound(salon_id))?;
        let guard = rs.read().await;
        guard
            .service(service_id)
            .map(|s| s.duration_minutes)
            .ok_or(EngineError::NotFound(service_id))
    }

    /// Start times on `date` where `duration` minutes fit the business hours
    /// without overlapping an active appointment.
    pub async fn available_slots(
        &self,
        salon_id: Ulid,
        date: NaiveDate,
        duration: Minute,
    ) -> Result<DayAvailability, EngineError> {
        validate_duration(duration)?;
        let rs = self
            .get_salon_state(&salon_id)
            .ok_or(EngineError::NotFound(salon_id))?;
        let guard = rs.read().await;

        let hours = guard.salon.hours.for_date(date).copied();
        let occupied: Vec<Span> = active_appointments(&guard, date, self.options.indexes, now_ms())
            .iter()
            .map(|a| a.span())
            .collect();

        Ok(DayAvailability {
            salon_id,
            date,
            duration_minutes: duration,
            hours,
            slots: free_slots(hours.as_ref(), duration, &occupied),
            free_windows: free_windows(hours.as_ref(), &occupied),
        })
    }

    pub async fn available_slots_for_service(
        &self,
        salon_id: Ulid,
        date: NaiveDate,
        service_id: Ulid,
    ) -> Result<DayAvailability, EngineError> {
        let duration = self.service_duration(salon_id, service_id).await?;
        self.available_slots(salon_id, date, duration).await
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let salon_id = self
            .get_salon_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .get_salon_state(&salon_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        guard.appointment(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Appointments matching `filter`, sorted by date then time.
    pub async fn list_appointments(
        &self,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, EngineError> {
        let salons: Vec<_> = match filter.salon_id {
            Some(id) => vec![self.get_salon_state(&id).ok_or(EngineError::NotFound(id))?],
            None => self.state.iter().map(|e| e.value().clone()).collect(),
        };

        let mut found = Vec::new();
        for rs in salons {
            let guard = rs.read().await;
            let candidates = match filter.date {
                Some(date) => guard.on_date(date),
                None => &guard.appointments[..],
            };
            found.extend(candidates.iter().filter(|a| filter.matches(a)).cloned());
        }
        found.sort_by(|a, b| (a.date, a.time, a.id).cmp(&(b.date, b.time, b.id)));
        Ok(found)
    }

    /// One customer's thread with a salon, oldest first.
    pub async fn conversation(
        &self,
        salon_id: Ulid,
        customer_id: &str,
    ) -> Result<Vec<Message>, EngineError> {
        let rs = self
            .get_salon_state(&salon_id)
            .ok_or(EngineError::NotFound(salon_id))?;
        let guard = rs.read().await;
        Ok(guard
            .messages
            .iter()
            .filter(|m| m.customer_id == customer_id)
            .cloned()
            .collect())
    }

    /// One summary per customer who has messaged the salon, most recent first.
    pub async fn conversations(&self, salon_id: Ulid) -> Result<Vec<ConversationSummary>, EngineError> {
        let rs = self
            .get_salon_state(&salon_id)
            .ok_or(EngineError::NotFound(salon_id))?;
        let guard = rs.read().await;

        // customer -> (message count, index of latest message)
        let mut by_customer: HashMap<&str, (usize, usize)> = HashMap::new();
        for (idx, message) in guard.messages.iter().enumerate() {
            let entry = by_customer
                .entry(message.customer_id.as_str())
                .or_insert((0, idx));
            entry.0 += 1;
            entry.1 = idx;
        }

        let mut latest: Vec<(usize, usize)> = by_customer.into_values().collect();
        latest.sort_by(|a, b| b.1.cmp(&a.1));
        let summaries = latest
            .into_iter()
            .map(|(count, idx)| {
                let last = &guard.messages[idx];
                ConversationSummary {
                    customer_id: last.customer_id.clone(),
                    last_message: last.clone(),
                    message_count: count,
                }
            })
            .collect();
        Ok(summaries)
    }

    /// Totals over appointments dated within `[from, to]` (either bound optional).
    pub async fn salon_analytics(
        &self,
        salon_id: Ulid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<SalonAnalytics, EngineError> {
        if let (Some(f), Some(t)) = (from, to)
            && f > t
        {
            return Err(EngineError::Invalid("analytics range starts after it ends"));
        }
        let rs = self
            .get_salon_state(&salon_id)
            .ok_or(EngineError::NotFound(salon_id))?;
        let guard = rs.read().await;

        let mut out = SalonAnalytics::default();
        let mut per_service: HashMap<Ulid, (usize, u64)> = HashMap::new();
        let mut per_day: BTreeMap<DayOfWeek, usize> = BTreeMap::new();
        let mut customers = HashSet::new();

        let in_range = guard
            .appointments
            .iter()
            .filter(|a| from.is_none_or(|f| a.date >= f) && to.is_none_or(|t| a.date <= t));
        for a in in_range {
            out.total_appointments += 1;
            *out.by_status.entry(a.status).or_default() += 1;
            customers.insert(a.customer_id.as_str());
            match a.status {
                AppointmentStatus::Completed => out.revenue = out.revenue.saturating_add(a.price),
                AppointmentStatus::Confirmed => {
                    out.pending_revenue = out.pending_revenue.saturating_add(a.price)
                }
                _ => {}
            }
            if a.status != AppointmentStatus::Canceled {
                *per_day.entry(DayOfWeek::of(a.date)).or_default() += 1;
            }
            let stats = per_service.entry(a.service_id).or_default();
            stats.0 += 1;
            if a.status == AppointmentStatus::Completed {
                stats.1 = stats.1.saturating_add(a.price);
            }
        }

        out.unique_customers = customers.len();
        // Ties go to the earlier weekday.
        out.busiest_day = per_day
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(day, _)| *day);
        out.services = per_service
            .into_iter()
            .map(|(service_id, (bookings, revenue))| ServiceStats {
                service_id,
                name: guard.service(service_id).map(|s| s.name.clone()),
                bookings,
                revenue,
            })
            .collect();
        out.services.sort_by(|a, b| {
            b.bookings
                .cmp(&a.bookings)
                .then(b.revenue.cmp(&a.revenue))
                .then(a.service_id.cmp(&b.service_id))
        });
        Ok(out)
    }
}
