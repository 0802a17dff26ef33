use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use ulid::Ulid;

use crate::engine::Engine;
use crate::model::*;

use super::{ApiError, ApiResult};

type Shared = State<Arc<Engine>>;
type Body<T> = Result<Json<T>, JsonRejection>;
type Params<T> = Result<Query<T>, QueryRejection>;
type Id = Result<Path<Ulid>, PathRejection>;

// ── Request bodies and query strings ─────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateSalon {
    pub owner_id: String,
    pub name: String,
    pub address: Option<String>,
    #[serde(default)]
    pub hours: BusinessHours,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSalon {
    pub name: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SalonQuery {
    pub owner_id: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServiceBody {
    pub name: String,
    pub duration_minutes: Minute,
    #[serde(default)]
    pub price: u64,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
    pub service_id: Option<Ulid>,
    pub duration: Option<Minute>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerQuery {
    pub customer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct NewMessage {
    pub customer_id: String,
    pub body: String,
    #[serde(default)]
    pub from_owner: bool,
}

// ── Handlers ─────────────────────────────────────────────

pub async fn health(State(engine): Shared) -> Json<Value> {
    Json(json!({ "status": "ok", "salons": engine.state.len() }))
}

pub async fn create_salon(State(engine): Shared, body: Body<CreateSalon>) -> ApiResult<(StatusCode, Json<Salon>)> {
    let Json(body) = body?;
    let salon = engine
        .create_salon(Ulid::new(), body.owner_id, body.name, body.address, body.hours)
        .await?;
    Ok((StatusCode::CREATED, Json(salon)))
}

pub async fn list_salons(State(engine): Shared, query: Params<SalonQuery>) -> ApiResult<Json<Vec<Salon>>> {
    let Query(query) = query?;
    let salons = engine
        .list_salons(query.owner_id.as_deref(), query.q.as_deref())
        .await;
    Ok(Json(salons))
}

pub async fn get_salon(State(engine): Shared, id: Id) -> ApiResult<Json<Salon>> {
    let Path(id) = id?;
    Ok(Json(engine.get_salon(id).await?))
}

pub async fn update_salon(State(engine): Shared, id: Id, body: Body<UpdateSalon>) -> ApiResult<Json<Salon>> {
    let Path(id) = id?;
    let Json(body) = body?;
    Ok(Json(engine.update_salon(id, body.name, body.address).await?))
}

pub async fn delete_salon(State(engine): Shared, id: Id) -> ApiResult<StatusCode> {
    let Path(id) = id?;
    engine.delete_salon(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_hours(State(engine): Shared, id: Id, body: Body<BusinessHours>) -> ApiResult<Json<Salon>> {
    let Path(id) = id?;
    let Json(hours) = body?;
    Ok(Json(engine.set_hours(id, hours).await?))
}

pub async fn list_services(State(engine): Shared, id: Id) -> ApiResult<Json<Vec<Service>>> {
    let Path(id) = id?;
    Ok(Json(engine.list_services(id).await?))
}

pub async fn add_service(
    State(engine): Shared,
    id: Id,
    body: Body<ServiceBody>,
) -> ApiResult<(StatusCode, Json<Service>)> {
    let Path(salon_id) = id?;
    let Json(body) = body?;
    let service = engine
        .add_service(Ulid::new(), salon_id, body.name, body.duration_minutes, body.price)
        .await?;
    Ok((StatusCode::CREATED, Json(service)))
}

pub async fn update_service(
    State(engine): Shared,
    ids: Result<Path<(Ulid, Ulid)>, PathRejection>,
    body: Body<ServiceBody>,
) -> ApiResult<Json<Service>> {
    let Path((salon_id, service_id)) = ids?;
    let Json(body) = body?;
    let service = engine
        .update_service(salon_id, service_id, body.name, body.duration_minutes, body.price)
        .await?;
    Ok(Json(service))
}

pub async fn remove_service(
    State(engine): Shared,
    ids: Result<Path<(Ulid, Ulid)>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path((salon_id, service_id)) = ids?;
    engine.remove_service(salon_id, service_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `?date=` plus either `service_id` or an explicit `duration` in minutes.
pub async fn available_slots(
    State(engine): Shared,
    id: Id,
    query: Params<SlotsQuery>,
) -> ApiResult<Json<DayAvailability>> {
    let Path(salon_id) = id?;
    let Query(query) = query?;
    let day = match (query.service_id, query.duration) {
        (Some(service_id), _) => {
            engine
                .available_slots_for_service(salon_id, query.date, service_id)
                .await?
        }
        (None, Some(duration)) => engine.available_slots(salon_id, query.date, duration).await?,
        (None, None) => {
            return Err(ApiError::BadRequest("service_id or duration is required".into()));
        }
    };
    Ok(Json(day))
}

pub async fn salon_analytics(
    State(engine): Shared,
    id: Id,
    query: Params<RangeQuery>,
) -> ApiResult<Json<SalonAnalytics>> {
    let Path(salon_id) = id?;
    let Query(range) = query?;
    Ok(Json(engine.salon_analytics(salon_id, range.from, range.to).await?))
}

pub async fn conversations(State(engine): Shared, id: Id) -> ApiResult<Json<Vec<ConversationSummary>>> {
    let Path(salon_id) = id?;
    Ok(Json(engine.conversations(salon_id).await?))
}

pub async fn conversation(
    State(engine): Shared,
    id: Id,
    query: Params<CustomerQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let Path(salon_id) = id?;
    let Query(query) = query?;
    Ok(Json(engine.conversation(salon_id, &query.customer_id).await?))
}

pub async fn send_message(
    State(engine): Shared,
    id: Id,
    body: Body<NewMessage>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let Path(salon_id) = id?;
    let Json(body) = body?;
    let message = engine
        .send_message(Ulid::new(), salon_id, body.customer_id, body.from_owner, body.body)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn book_appointment(
    State(engine): Shared,
    body: Body<BookingRequest>,
) -> ApiResult<(StatusCode, Json<Appointment>)> {
    let Json(request) = body?;
    let appointment = engine.book_appointment(Ulid::new(), request).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

pub async fn list_appointments(
    State(engine): Shared,
    query: Params<AppointmentFilter>,
) -> ApiResult<Json<Vec<Appointment>>> {
    let Query(filter) = query?;
    Ok(Json(engine.list_appointments(&filter).await?))
}

pub async fn get_appointment(State(engine): Shared, id: Id) -> ApiResult<Json<Appointment>> {
    let Path(id) = id?;
    Ok(Json(engine.get_appointment(id).await?))
}

pub async fn update_status(
    State(engine): Shared,
    id: Id,
    body: Body<StatusUpdate>,
) -> ApiResult<Json<Appointment>> {
    let Path(id) = id?;
    let Json(update) = body?;
    Ok(Json(engine.update_status(id, update).await?))
}
