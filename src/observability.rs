use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: method, route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "salond_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: method, route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "salond_http_request_duration_seconds";

// ── Booking engine ──────────────────────────────────────────────

/// Counter: appointments booked.
pub const BOOKINGS_TOTAL: &str = "salond_bookings_total";

/// Counter: booking or reschedule attempts rejected for overlap.
pub const BOOKING_CONFLICTS_TOTAL: &str = "salond_booking_conflicts_total";

/// Counter: appointment lookups that lacked an index. Labels: level.
pub const LOOKUP_FALLBACKS_TOTAL: &str = "salond_lookup_fallbacks_total";

/// Counter: pending appointments canceled by the reaper.
pub const PENDING_EXPIRED_TOTAL: &str = "salond_pending_expired_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "salond_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "salond_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(bind: &str, port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://{addr}/metrics");
    Ok(())
}
