mod availability;
mod conflict;
mod error;
mod lookup;
mod mutations;
mod queries;

pub use availability::{fits_hours, free_slots, free_windows, merge_overlapping, slots, subtract_intervals, Slots};
pub use error::EngineError;
pub use lookup::{active_appointments, AppointmentQuery, IndexSet, LookupError};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock, RwLockReadGuard};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedSalonState = Arc<RwLock<SalonState>>;

/// Everything known about one salon. Appointments are kept sorted by
/// `(date, time)` so a day's bookings are a contiguous slice.
#[derive(Debug, Clone)]
pub struct SalonState {
    pub salon: Salon,
    pub services: Vec<Service>,
    pub appointments: Vec<Appointment>,
    pub messages: Vec<Message>,
}

impl SalonState {
    pub fn new(salon: Salon) -> Self {
        Self {
            salon,
            services: Vec::new(),
            appointments: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn service(&self, id: Ulid) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn appointment(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    /// Insert maintaining `(date, time)` order.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let key = (appointment.date, appointment.time);
        let pos = self
            .appointments
            .partition_point(|a| (a.date, a.time) <= key);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove_appointment(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    /// Appointments on `date`, via binary search on the sorted list.
    pub fn on_date(&self, date: NaiveDate) -> &[Appointment] {
        let lo = self.appointments.partition_point(|a| a.date < date);
        let hi = self.appointments.partition_point(|a| a.date <= date);
        &self.appointments[lo..hi]
    }

    pub fn has_active_appointments(&self, now: Ms) -> bool {
        self.appointments.iter().any(|a| a.is_active(now))
    }

    /// Ids of every entity owned by this salon.
    fn entity_ids(&self) -> impl Iterator<Item = Ulid> + '_ {
        self.services
            .iter()
            .map(|s| s.id)
            .chain(self.appointments.iter().map(|a| a.id))
            .chain(self.messages.iter().map(|m| m.id))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    pub indexes: IndexSet,
    /// How long a pending appointment holds its slot. `None` = until changed.
    pub pending_ttl_ms: Option<Ms>,
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;

        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break, // channel empty, flush batch
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        // Non-append commands see every append queued before them.
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.rewrite(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedSalonState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: entity (service/appointment/message) id → salon id
    pub(super) entity_to_salon: DashMap<Ulid, Ulid>,
    /// Shared by mutations from WAL append through apply; compaction takes it
    /// exclusively so its snapshot matches what the WAL holds.
    pub(super) commit_gate: RwLock<()>,
    pub(super) options: EngineOptions,
}

/// Apply an event directly to a SalonState (caller holds the lock).
fn apply_to_salon(rs: &mut SalonState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::SalonUpdated { name, address, .. } => {
            rs.salon.name = name.clone();
            rs.salon.address = address.clone();
        }
        Event::HoursSet { hours, .. } => {
            rs.salon.hours = hours.clone();
        }
        Event::ServiceAdded {
            id,
            salon_id,
            name,
            duration_minutes,
            price,
        } => {
            rs.services.push(Service {
                id: *id,
                salon_id: *salon_id,
                name: name.clone(),
                duration_minutes: *duration_minutes,
                price: *price,
            });
            entity_map.insert(*id, *salon_id);
        }
        Event::ServiceUpdated {
            id,
            name,
            duration_minutes,
            price,
            ..
        } => {
            if let Some(service) = rs.services.iter_mut().find(|s| s.id == *id) {
                service.name = name.clone();
                service.duration_minutes = *duration_minutes;
                service.price = *price;
            }
        }
        Event::ServiceRemoved { id, .. } => {
            rs.services.retain(|s| s.id != *id);
            entity_map.remove(id);
        }
        Event::AppointmentBooked { appointment } => {
            entity_map.insert(appointment.id, appointment.salon_id);
            rs.insert_appointment(appointment.clone());
        }
        Event::AppointmentStatusChanged {
            id,
            status,
            date,
            time,
            payment_ref,
            ..
        } => {
            // Remove and reinsert: a delay moves the appointment in the sort order.
            if let Some(mut appointment) = rs.remove_appointment(*id) {
                appointment.status = *status;
                appointment.date = *date;
                appointment.time = *time;
                appointment.payment_ref = payment_ref.clone();
                if *status != AppointmentStatus::Pending {
                    appointment.expires_at = None;
                }
                rs.insert_appointment(appointment);
            }
        }
        Event::MessageSent { message } => {
            entity_map.insert(message.id, message.salon_id);
            rs.messages.push(message.clone());
        }
        // SalonCreated/Deleted are handled at the DashMap level, not here
        Event::SalonCreated { .. } | Event::SalonDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, options: EngineOptions) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            entity_to_salon: DashMap::new(),
            commit_gate: RwLock::new(()),
            options,
        };

        // We're the sole owner of these Arcs during replay, so try_write never
        // contends. Never use blocking_write here: this may run inside a runtime.
        for event in &events {
            match event {
                Event::SalonCreated {
                    id,
                    owner_id,
                    name,
                    address,
                    hours,
                    created_at,
                } => {
                    let salon = Salon {
                        id: *id,
                        owner_id: owner_id.clone(),
                        name: name.clone(),
                        address: address.clone(),
                        hours: hours.clone(),
                        created_at: *created_at,
                    };
                    engine
                        .state
                        .insert(*id, Arc::new(RwLock::new(SalonState::new(salon))));
                }
                Event::SalonDeleted { id } => engine.forget_salon(*id),
                other => {
                    let salon_id = other.salon_id();
                    let Some(rs) = engine.get_salon_state(&salon_id) else {
                        warn!("replay: event for unknown salon {salon_id}, skipping");
                        continue;
                    };
                    match rs.try_write() {
                        Ok(mut guard) => apply_to_salon(&mut guard, other, &engine.entity_to_salon),
                        Err(_) => warn!("replay: salon {salon_id} unexpectedly locked, skipping event"),
                    }
                }
            }
        }

        tracing::info!(
            salons = engine.state.len(),
            events = events.len(),
            "replayed WAL {}",
            wal_path.display()
        );
        Ok(engine)
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) async fn begin_commit(&self) -> RwLockReadGuard<'_, ()> {
        self.commit_gate.read().await
    }

    pub fn get_salon_state(&self, id: &Ulid) -> Option<SharedSalonState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_salon_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_salon.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut SalonState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_salon(rs, event, &self.entity_to_salon);
        Ok(())
    }

    /// Lookup entity → salon, get salon, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<SalonState>), EngineError> {
        let salon_id = self
            .get_salon_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self
            .get_salon_state(&salon_id)
            .ok_or(EngineError::NotFound(salon_id))?;
        let guard = rs.write_owned().await;
        // Deleted while we waited for the lock.
        if !self.state.contains_key(&salon_id) {
            return Err(EngineError::NotFound(*entity_id));
        }
        Ok((salon_id, guard))
    }

    /// Get a salon and acquire its write lock.
    pub(super) async fn salon_write(
        &self,
        salon_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<SalonState>, EngineError> {
        let rs = self
            .get_salon_state(salon_id)
            .ok_or(EngineError::NotFound(*salon_id))?;
        let guard = rs.write_owned().await;
        if !self.state.contains_key(salon_id) {
            return Err(EngineError::NotFound(*salon_id));
        }
        Ok(guard)
    }

    /// Drop a salon and every entity mapping that points at it.
    pub(super) fn forget_salon(&self, id: Ulid) {
        if let Some((_, rs)) = self.state.remove(&id) {
            match rs.try_read() {
                Ok(guard) => {
                    for entity in guard.entity_ids() {
                        self.entity_to_salon.remove(&entity);
                    }
                }
                Err(_) => self.entity_to_salon.retain(|_, salon| *salon != id),
            }
        }
    }
}
