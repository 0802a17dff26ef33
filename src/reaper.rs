use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Engine;

const REAP_INTERVAL: Duration = Duration::from_secs(5);
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Cancel pending appointments whose hold lapsed at or before `now`.
/// Returns how many were canceled.
pub async fn reap_once(engine: &Engine, now: i64) -> usize {
    let mut reaped = 0;
    for (appointment_id, salon_id) in engine.collect_expired_pending(now) {
        match engine.expire_pending(appointment_id, now).await {
            Ok(true) => {
                info!(%salon_id, "reaped expired pending appointment {appointment_id}");
                reaped += 1;
            }
            Ok(false) => {}
            // May have been confirmed or deleted meanwhile
            Err(e) => debug!("reaper skip {appointment_id}: {e}"),
        }
    }
    reaped
}

/// Background task that periodically cancels expired pending appointments.
pub async fn run_reaper(engine: Arc<Engine>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(REAP_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        reap_once(&engine, now).await;
    }
    debug!("reaper stopped");
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "compacted WAL"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
    debug!("compactor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineOptions, IndexSet};
    use crate::model::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn with_ttl(ttl_ms: i64) -> EngineOptions {
        EngineOptions {
            indexes: IndexSet::default(),
            pending_ttl_ms: Some(ttl_ms),
        }
    }

    async fn engine_with_pending(options: EngineOptions) -> (tempfile::TempDir, Arc<Engine>, Ulid) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(Engine::new(dir.path().join("reaper.wal"), options).unwrap());

        let salon = Ulid::new();
        let hours = BusinessHours::uniform(&DayOfWeek::ALL, "09:00".parse().unwrap(), "17:00".parse().unwrap());
        engine
            .create_salon(salon, "owner".into(), "Reaped".into(), None, hours)
            .await
            .unwrap();
        let service = Ulid::new();
        engine
            .add_service(service, salon, "Wash".into(), 30, 0)
            .await
            .unwrap();
        let appt = engine
            .book_appointment(
                Ulid::new(),
                BookingRequest {
                    salon_id: salon,
                    service_id: service,
                    customer_id: "c".into(),
                    date: NaiveDate::from_ymd_opt(2030, 6, 3).unwrap(),
                    time: "10:00".parse().unwrap(),
                    notes: None,
                },
            )
            .await
            .unwrap();
        (dir, engine, appt.id)
    }

    #[tokio::test]
    async fn reaper_cancels_expired_pending() {
        let (_dir, engine, id) = engine_with_pending(with_ttl(1_000)).await;
        let created = engine.get_appointment(id).await.unwrap().created_at;

        assert_eq!(reap_once(&engine, created).await, 0);
        assert_eq!(reap_once(&engine, created + 1_000).await, 1);
        assert_eq!(
            engine.get_appointment(id).await.unwrap().status,
            AppointmentStatus::Canceled
        );
        assert_eq!(reap_once(&engine, created + 2_000).await, 0);
    }

    #[tokio::test]
    async fn reaper_leaves_confirmed_alone() {
        let (_dir, engine, id) = engine_with_pending(with_ttl(60_000)).await;
        engine
            .update_status(id, StatusUpdate::to(AppointmentStatus::Confirmed))
            .await
            .unwrap();
        let created = engine.get_appointment(id).await.unwrap().created_at;
        assert_eq!(reap_once(&engine, created + 120_000).await, 0);
    }

    #[tokio::test]
    async fn default_config_keeps_pending_indefinitely() {
        let options = crate::config::Config::from_lookup(|_| None).engine_options();
        let (_dir, engine, id) = engine_with_pending(options).await;
        let pending = engine.get_appointment(id).await.unwrap();
        assert_eq!(pending.expires_at, None);

        let a_week_later = pending.created_at + 7 * 24 * 3_600_000;
        assert_eq!(reap_once(&engine, a_week_later).await, 0);
        assert_eq!(
            engine.get_appointment(id).await.unwrap().status,
            AppointmentStatus::Pending
        );

        // Still holds its slot.
        let clash = engine
            .book_appointment(
                Ulid::new(),
                BookingRequest {
                    salon_id: pending.salon_id,
                    service_id: pending.service_id,
                    customer_id: "other".into(),
                    date: pending.date,
                    time: "10:15".parse().unwrap(),
                    notes: None,
                },
            )
            .await;
        assert!(matches!(clash, Err(crate::engine::EngineError::Conflict(x)) if x == id));
    }

    #[tokio::test]
    async fn background_tasks_stop_on_cancel() {
        let (_dir, engine, _) = engine_with_pending(with_ttl(60_000)).await;
        let shutdown = CancellationToken::new();
        let reaper = tokio::spawn(run_reaper(engine.clone(), shutdown.clone()));
        let compactor = tokio::spawn(run_compactor(engine, 1, shutdown.clone()));
        shutdown.cancel();
        reaper.await.unwrap();
        compactor.await.unwrap();
    }
}
