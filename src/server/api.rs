//! Booking REST handlers. They go through the same store operations as the
//! tool dispatcher, so the slot invariants hold for both.

use super::AppState;
use crate::store::{
    Appointment, BookingOutcome, CancelOutcome, Doctor, NewAppointment, NewDoctor, Slot,
    TIMESTAMP_FORMAT,
};
use crate::tools::{APPOINTMENT_NOT_FOUND, SLOT_NOT_AVAILABLE};
use axum::extract::{Extension, Json, Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::InternalServerError(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        (status, Json(json!({ "detail": message }))).into_response()
    }
}

impl From<crate::Error> for ApiError {
    fn from(err: crate::Error) -> Self {
        Self::InternalServerError(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct ListDoctorsParams {
    #[serde(default)]
    pub skip: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub specialty: Option<String>,
}

const fn default_limit() -> u32 {
    10
}

#[derive(Debug, Deserialize)]
pub struct ListSlotsParams {
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSlotRequest {
    pub start_time: String,
}

/// Handler for `GET /doctors`.
pub async fn list_doctors_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ListDoctorsParams>,
) -> Result<Json<Vec<Doctor>>, ApiError> {
    tracing::debug!(skip = params.skip, limit = params.limit, specialty = ?params.specialty, "list doctors");
    let doctors = state
        .store
        .run(move |store| match params.specialty.as_deref() {
            Some(specialty) => Ok(store
                .list_doctors(Some(specialty))?
                .into_iter()
                .skip(params.skip as usize)
                .take(params.limit as usize)
                .collect()),
            None => store.list_all_doctors(params.skip, params.limit),
        })
        .await?;
    Ok(Json(doctors))
}

/// Handler for `POST /doctors`.
pub async fn create_doctor_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<NewDoctor>,
) -> Result<(StatusCode, Json<Doctor>), ApiError> {
    if payload.name.trim().is_empty() || payload.specialty.trim().is_empty() {
        return Err(ApiError::BadRequest("name and specialty are required".to_string()));
    }
    let doctor = state.store.run(move |store| store.create_doctor(&payload)).await?;
    tracing::info!(doctor_id = doctor.id, "doctor created");
    Ok((StatusCode::CREATED, Json(doctor)))
}

/// Handler for `GET /doctors/{doctor_id}`.
pub async fn get_doctor_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(doctor_id): Path<i64>,
) -> Result<Json<Doctor>, ApiError> {
    state
        .store
        .run(move |store| store.get_doctor(doctor_id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Doctor not found".to_string()))
}

/// Handler for `DELETE /doctors/{doctor_id}`.
pub async fn delete_doctor_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(doctor_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let removed = state.store.run(move |store| store.delete_doctor(doctor_id)).await?;
    if !removed {
        return Err(ApiError::NotFound("Doctor not found".to_string()));
    }
    tracing::info!(doctor_id, "doctor deleted");
    Ok(Json(json!({ "success": true })))
}

/// Handler for `GET /doctors/{doctor_id}/slots`: free slots only.
pub async fn list_slots_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(doctor_id): Path<i64>,
    Query(params): Query<ListSlotsParams>,
) -> Result<Json<Vec<Slot>>, ApiError> {
    let date = match params.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(raw) => Some(
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| ApiError::BadRequest(format!("invalid date: {raw}")))?,
        ),
        None => None,
    };
    let slots = state
        .store
        .run(move |store| {
            if store.get_doctor(doctor_id)?.is_none() {
                return Ok(None);
            }
            store.list_slots(doctor_id, date).map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("Doctor not found".to_string()))?;
    Ok(Json(slots))
}

/// Handler for `POST /doctors/{doctor_id}/slots`.
pub async fn create_slot_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(doctor_id): Path<i64>,
    Json(payload): Json<CreateSlotRequest>,
) -> Result<(StatusCode, Json<Slot>), ApiError> {
    let start_time = parse_start_time(&payload.start_time)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid start_time: {}", payload.start_time)))?;
    let slot = state
        .store
        .run(move |store| store.create_slot(doctor_id, start_time))
        .await?
        .ok_or_else(|| ApiError::NotFound("Doctor not found".to_string()))?;
    Ok((StatusCode::CREATED, Json(slot)))
}

/// Handler for `GET /appointments`.
pub async fn list_appointments_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    let appointments = state.store.run(|store| store.list_appointments()).await?;
    Ok(Json(appointments))
}

/// Handler for `POST /appointments`.
pub async fn create_appointment_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(mut payload): Json<NewAppointment>,
) -> Result<Json<Appointment>, ApiError> {
    payload.patient_name = payload.patient_name.trim().to_string();
    if payload.patient_name.is_empty() {
        return Err(ApiError::BadRequest("patient_name is required".to_string()));
    }
    tracing::info!(doctor_id = payload.doctor_id, slot_id = payload.slot_id, "booking attempt");
    match state.store.run(move |store| store.book_appointment(&payload)).await? {
        BookingOutcome::Booked(appointment) => Ok(Json(appointment)),
        BookingOutcome::SlotUnavailable => Err(ApiError::BadRequest(SLOT_NOT_AVAILABLE.to_string())),
    }
}

/// Handler for `DELETE /appointments/{appointment_id}`.
pub async fn cancel_appointment_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(appointment_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    match state
        .store
        .run(move |store| store.cancel_appointment(appointment_id))
        .await?
    {
        CancelOutcome::Cancelled { .. } => Ok(Json(json!({ "success": true }))),
        CancelOutcome::NotFound => Err(ApiError::NotFound(APPOINTMENT_NOT_FOUND.to_string())),
    }
}

fn parse_start_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    [TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}
