//! JSON-over-HTTP surface of the booking engine.

mod error;
mod handlers;

pub use error::{ApiError, ApiResult};

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, patch, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/salons", get(handlers::list_salons).post(handlers::create_salon))
        .route(
            "/salons/{id}",
            get(handlers::get_salon)
                .patch(handlers::update_salon)
                .delete(handlers::delete_salon),
        )
        .route("/salons/{id}/hours", put(handlers::set_hours))
        .route(
            "/salons/{id}/services",
            get(handlers::list_services).post(handlers::add_service),
        )
        .route(
            "/salons/{id}/services/{service_id}",
            put(handlers::update_service).delete(handlers::remove_service),
        )
        .route("/salons/{id}/slots", get(handlers::available_slots))
        .route("/salons/{id}/analytics", get(handlers::salon_analytics))
        .route("/salons/{id}/conversations", get(handlers::conversations))
        .route(
            "/salons/{id}/messages",
            get(handlers::conversation).post(handlers::send_message),
        )
        .route(
            "/appointments",
            get(handlers::list_appointments).post(handlers::book_appointment),
        )
        .route("/appointments/{id}", get(handlers::get_appointment))
        .route("/appointments/{id}/status", patch(handlers::update_status))
        .route_layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

/// Request count and latency per matched route.
async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let method = req.method().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        crate::observability::HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        crate::observability::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method,
        "route" => route
    )
    .record(start.elapsed().as_secs_f64());
    response
}
