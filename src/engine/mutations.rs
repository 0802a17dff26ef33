use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_slot, now_ms, validate_duration, validate_optional, validate_price, validate_text,
};
use super::{Engine, EngineError, SalonState, WalCommand};

impl Engine {
    pub async fn create_salon(
        &self,
        id: Ulid,
        owner_id: String,
        name: String,
        address: Option<String>,
        hours: BusinessHours,
    ) -> Result<Salon, EngineError> {
        validate_text(&owner_id, MAX_ID_LEN, "owner id")?;
        validate_text(&name, MAX_NAME_LEN, "salon name")?;
        validate_optional(address.as_deref(), MAX_ADDRESS_LEN, "address")?;
        hours.validate().map_err(EngineError::InvalidHours)?;

        let _commit = self.begin_commit().await;
        if self.state.len() >= MAX_SALONS {
            return Err(EngineError::LimitExceeded("too many salons"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let created_at = now_ms();
        let event = Event::SalonCreated {
            id,
            owner_id: owner_id.clone(),
            name: name.clone(),
            address: address.clone(),
            hours: hours.clone(),
            created_at,
        };
        self.wal_append(&event).await?;
        let salon = Salon {
            id,
            owner_id,
            name,
            address,
            hours,
            created_at,
        };
        self.state
            .insert(id, Arc::new(RwLock::new(SalonState::new(salon.clone()))));
        info!(salon_id = %id, "salon created");
        Ok(salon)
    }

    /// Rename or re-address a salon. `None` leaves a field unchanged.
    pub async fn update_salon(
        &self,
        id: Ulid,
        name: Option<String>,
        address: Option<String>,
    ) -> Result<Salon, EngineError> {
        if let Some(ref n) = name {
            validate_text(n, MAX_NAME_LEN, "salon name")?;
        }
        validate_optional(address.as_deref(), MAX_ADDRESS_LEN, "address")?;

        let _commit = self.begin_commit().await;
        let mut guard = self.salon_write(&id).await?;
        let event = Event::SalonUpdated {
            id,
            name: name.unwrap_or_else(|| guard.salon.name.clone()),
            address: address.or_else(|| guard.salon.address.clone()),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.salon.clone())
    }

    /// Replace the weekly hours. Existing appointments are left where they are.
    pub async fn set_hours(&self, id: Ulid, hours: BusinessHours) -> Result<Salon, EngineError> {
        hours.validate().map_err(EngineError::InvalidHours)?;
        let _commit = self.begin_commit().await;
        let mut guard = self.salon_write(&id).await?;
        let event = Event::HoursSet { salon_id: id, hours };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.salon.clone())
    }

    /// Delete a salon with everything it owns. Refused while any appointment
    /// still holds a slot.
    pub async fn delete_salon(&self, id: Ulid) -> Result<(), EngineError> {
        let _commit = self.begin_commit().await;
        let guard = self.salon_write(&id).await?;
        if guard.has_active_appointments(now_ms()) {
            return Err(EngineError::HasActiveAppointments(id));
        }

        let event = Event::SalonDeleted { id };
        self.wal_append(&event).await?;
        for entity in guard.entity_ids() {
            self.entity_to_salon.remove(&entity);
        }
        self.state.remove(&id);
        info!(salon_id = %id, "salon deleted");
        Ok(())
    }

    pub async fn add_service(
        &self,
        id: Ulid,
        salon_id: Ulid,
        name: String,
        duration_minutes: Minute,
        price: u64,
    ) -> Result<Service, EngineError> {
        validate_text(&name, MAX_NAME_LEN, "service name")?;
        validate_duration(duration_minutes)?;
        validate_price(price)?;

        let _commit = self.begin_commit().await;
        if self.entity_to_salon.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let mut guard = self.salon_write(&salon_id).await?;
        if guard.services.len() >= MAX_SERVICES_PER_SALON {
            return Err(EngineError::LimitExceeded("too many services on salon"));
        }

        let event = Event::ServiceAdded {
            id,
            salon_id,
            name: name.clone(),
            duration_minutes,
            price,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(Service {
            id,
            salon_id,
            name,
            duration_minutes,
            price,
        })
    }

    /// Existing appointments keep the duration and price they were booked with.
    pub async fn update_service(
        &self,
        salon_id: Ulid,
        id: Ulid,
        name: String,
        duration_minutes: Minute,
        price: u64,
    ) -> Result<Service, EngineError> {
        validate_text(&name, MAX_NAME_LEN, "service name")?;
        validate_duration(duration_minutes)?;
        validate_price(price)?;

        let _commit = self.begin_commit().await;
        let mut guard = self.salon_write(&salon_id).await?;
        if guard.service(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ServiceUpdated {
            id,
            salon_id,
            name: name.clone(),
            duration_minutes,
            price,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(Service {
            id,
            salon_id,
            name,
            duration_minutes,
            price,
        })
    }

    pub async fn remove_service(&self, salon_id: Ulid, id: Ulid) -> Result<(), EngineError> {
        let _commit = self.begin_commit().await;
        let mut guard = self.salon_write(&salon_id).await?;
        if guard.service(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ServiceRemoved { id, salon_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Book a service at `date`/`time`. The new appointment is pending.
    ///
    /// Hours and overlap are checked while holding the salon's write lock, so
    /// two concurrent requests for the same slot cannot both succeed.
    pub async fn book_appointment(
        &self,
        id: Ulid,
        request: BookingRequest,
    ) -> Result<Appointment, EngineError> {
        validate_text(&request.customer_id, MAX_ID_LEN, "customer id")?;
        validate_optional(request.notes.as_deref(), MAX_NOTES_LEN, "notes")?;

        let _commit = self.begin_commit().await;
        if self.entity_to_salon.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let mut guard = self.salon_write(&request.salon_id).await?;
        let service = guard
            .service(request.service_id)
            .ok_or(EngineError::NotFound(request.service_id))?
            .clone();
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_SALON {
            return Err(EngineError::LimitExceeded("too many appointments on salon"));
        }

        let now = now_ms();
        check_slot(
            &guard,
            request.date,
            request.time,
            service.duration_minutes,
            None,
            self.options.indexes,
            now,
        )?;

        let appointment = Appointment {
            id,
            salon_id: request.salon_id,
            service_id: service.id,
            customer_id: request.customer_id,
            date: request.date,
            time: request.time,
            duration_minutes: service.duration_minutes,
            price: service.price,
            status: AppointmentStatus::Pending,
            payment_ref: None,
            notes: request.notes,
            created_at: now,
            expires_at: self.options.pending_ttl_ms.and_then(|ttl| now.checked_add(ttl)),
        };
        let event = Event::AppointmentBooked {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_TOTAL).increment(1);
        info!(
            salon_id = %appointment.salon_id,
            appointment_id = %id,
            date = %appointment.date,
            time = %appointment.time,
            "appointment booked"
        );
        Ok(appointment)
    }

    /// Move an appointment through its lifecycle.
    ///
    /// Delaying needs a new date and time, which must fit the hours and not
    /// overlap another active appointment. Confirming a delayed or lapsed
    /// pending appointment re-checks its slot, since it may have been taken.
    pub async fn update_status(
        &self,
        id: Ulid,
        update: StatusUpdate,
    ) -> Result<Appointment, EngineError> {
        validate_optional(update.payment_ref.as_deref(), MAX_PAYMENT_REF_LEN, "payment reference")?;

        let _commit = self.begin_commit().await;
        let (salon_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard
            .appointment(id)
            .ok_or(EngineError::NotFound(id))?
            .clone();
        let (from, to) = (current.status, update.status);
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidTransition { from, to });
        }

        let now = now_ms();
        let indexes = self.options.indexes;
        let (date, time) = match to {
            AppointmentStatus::Delayed => {
                let (Some(date), Some(time)) = (update.date, update.time) else {
                    return Err(EngineError::Invalid("delay needs a new date and time"));
                };
                check_slot(&guard, date, time, current.duration_minutes, Some(id), indexes, now)?;
                (date, time)
            }
            AppointmentStatus::Confirmed
                if from == AppointmentStatus::Delayed || current.is_expired_pending(now) =>
            {
                check_slot(
                    &guard,
                    current.date,
                    current.time,
                    current.duration_minutes,
                    Some(id),
                    indexes,
                    now,
                )?;
                (current.date, current.time)
            }
            _ => (current.date, current.time),
        };

        let event = Event::AppointmentStatusChanged {
            id,
            salon_id,
            status: to,
            date,
            time,
            payment_ref: update.payment_ref.or(current.payment_ref),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!(appointment_id = %id, %from, %to, "appointment status changed");
        guard
            .appointment(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Cancel `id` if it is still a pending appointment whose hold lapsed at
    /// or before `now`. Returns whether anything changed.
    pub async fn expire_pending(&self, id: Ulid, now: Ms) -> Result<bool, EngineError> {
        let _commit = self.begin_commit().await;
        let (salon_id, mut guard) = self.resolve_entity_write(&id).await?;
        let Some(current) = guard.appointment(id) else {
            return Ok(false);
        };
        if !current.is_expired_pending(now) {
            return Ok(false);
        }
        let event = Event::AppointmentStatusChanged {
            id,
            salon_id,
            status: AppointmentStatus::Canceled,
            date: current.date,
            time: current.time,
            payment_ref: current.payment_ref.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::PENDING_EXPIRED_TOTAL).increment(1);
        Ok(true)
    }

    pub async fn send_message(
        &self,
        id: Ulid,
        salon_id: Ulid,
        customer_id: String,
        from_owner: bool,
        body: String,
    ) -> Result<Message, EngineError> {
        validate_text(&customer_id, MAX_ID_LEN, "customer id")?;
        validate_text(&body, MAX_MESSAGE_LEN, "message body")?;

        let _commit = self.begin_commit().await;
        if self.entity_to_salon.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let mut guard = self.salon_write(&salon_id).await?;
        if guard.messages.len() >= MAX_MESSAGES_PER_SALON {
            return Err(EngineError::LimitExceeded("too many messages on salon"));
        }
        let message = Message {
            id,
            salon_id,
            customer_id,
            from_owner,
            body,
            sent_at: now_ms(),
        };
        let event = Event::MessageSent {
            message: message.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(message)
    }

    /// Pending appointments whose hold has lapsed, as `(appointment, salon)`.
    /// Salons locked by a writer are skipped until the next sweep.
    pub fn collect_expired_pending(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut expired = Vec::new();
        for entry in self.state.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for appointment in &guard.appointments {
                    if appointment.is_expired_pending(now) {
                        expired.push((appointment.id, guard.salon.id));
                    }
                }
            }
        }
        expired
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Exclusive: no mutation can sit between its WAL append and its apply.
        let _gate = self.commit_gate.write().await;

        let salons: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for rs in salons {
            let guard = rs.read().await;
            let salon = &guard.salon;
            events.push(Event::SalonCreated {
                id: salon.id,
                owner_id: salon.owner_id.clone(),
                name: salon.name.clone(),
                address: salon.address.clone(),
                hours: salon.hours.clone(),
                created_at: salon.created_at,
            });
            for service in &guard.services {
                events.push(Event::ServiceAdded {
                    id: service.id,
                    salon_id: service.salon_id,
                    name: service.name.clone(),
                    duration_minutes: service.duration_minutes,
                    price: service.price,
                });
            }
            for appointment in &guard.appointments {
                events.push(Event::AppointmentBooked {
                    appointment: appointment.clone(),
                });
            }
            for message in &guard.messages {
                events.push(Event::MessageSent {
                    message: message.clone(),
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
