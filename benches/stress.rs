use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use salond::engine::{Engine, EngineOptions};
use salond::model::*;

/// Thirty-minute slots between 09:00 and 17:00.
const SLOTS_PER_DAY: u32 = 16;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()
}

/// The `i`th slot counting from 09:00 on the base date.
fn nth_slot(i: u32) -> (NaiveDate, TimeOfDay) {
    let date = base_date() + Days::new((i / SLOTS_PER_DAY) as u64);
    let time = TimeOfDay::from_minutes(9 * 60 + (i % SLOTS_PER_DAY) * 30).unwrap();
    (date, time)
}

/// One salon open 09:00-17:00 daily with a 30-minute service.
async fn setup_salon(engine: &Engine) -> (Ulid, Ulid) {
    let salon = Ulid::new();
    let hours = BusinessHours::uniform(
        &DayOfWeek::ALL,
        TimeOfDay::hm(9, 0).unwrap(),
        TimeOfDay::hm(17, 0).unwrap(),
    );
    engine
        .create_salon(salon, "bench".into(), format!("Bench {salon}"), None, hours)
        .await
        .unwrap();
    let service = Ulid::new();
    engine
        .add_service(service, salon, "Cut".into(), 30, 3000)
        .await
        .unwrap();
    (salon, service)
}

fn booking(salon: Ulid, service: Ulid, slot: u32, customer: &str) -> BookingRequest {
    let (date, time) = nth_slot(slot);
    BookingRequest {
        salon_id: salon,
        service_id: service,
        customer_id: customer.to_string(),
        date,
        time,
        notes: None,
    }
}

async fn phase1_sequential(engine: &Engine) {
    let (salon, service) = setup_salon(engine).await;
    let n = 2000;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        engine
            .book_appointment(Ulid::new(), booking(salon, service, i, "seq"))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(engine: &Arc<Engine>) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            // One salon per task: no lock contention, only WAL group commit.
            let (salon, service) = setup_salon(&engine).await;
            for j in 0..n_per_task {
                engine
                    .book_appointment(Ulid::new(), booking(salon, service, j, "par"))
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contended_slot(engine: &Arc<Engine>) {
    let (salon, service) = setup_salon(engine).await;
    let n_tasks = 50;
    let slots = 64;

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut won = 0u32;
            for slot in 0..slots {
                let req = booking(salon, service, slot, &format!("c{i}"));
                if engine.book_appointment(Ulid::new(), req).await.is_ok() {
                    won += 1;
                }
            }
            won
        }));
    }
    let mut won = 0;
    for h in handles {
        won += h.await.unwrap();
    }

    let elapsed = start.elapsed();
    println!(
        "  {n_tasks} tasks racing for {slots} slots: {won} booked in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(won, slots, "every slot booked exactly once");
}

async fn phase4_read_under_load(engine: &Arc<Engine>) {
    let (salon, service) = setup_salon(engine).await;
    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for i in 0..1000 {
                let _ = engine
                    .book_appointment(Ulid::new(), booking(salon, service, i, "w"))
                    .await;
            }
        })
    };

    let mut latencies = Vec::new();
    let start = Instant::now();
    while !writer.is_finished() {
        let day = base_date() + Days::new((latencies.len() % 60) as u64);
        let t = Instant::now();
        engine.available_slots(salon, day, 30).await.unwrap();
        latencies.push(t.elapsed());
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();
    println!(
        "  {} slot queries during 1000 writes in {:.2}s",
        latencies.len(),
        start.elapsed().as_secs_f64()
    );
    print_latency("read latency", &mut latencies);
}

async fn phase5_compaction(engine: &Engine) {
    let appends = engine.wal_appends_since_compact().await;
    let start = Instant::now();
    engine.compact_wal().await.unwrap();
    println!(
        "  compacted {appends} appends in {:.2}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(Engine::new(dir.path().join("stress.wal"), EngineOptions::default()).unwrap());

    println!("=== salond stress benchmark ===");
    println!("wal: {}\n", dir.path().display());

    println!("[phase 1] sequential write throughput");
    phase1_sequential(&engine).await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent(&engine).await;

    println!("\n[phase 3] contended slots");
    phase3_contended_slot(&engine).await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load(&engine).await;

    println!("\n[phase 5] compaction");
    phase5_compaction(&engine).await;

    println!("\n=== benchmark complete ===");
}
