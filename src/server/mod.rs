//! HTTP surface: call entry, the media stream upgrade, booking REST and the
//! batch speech endpoints.

mod api;
mod calls;
mod speech;

pub use api::ApiError;

use crate::relay::{AiConnector, RelayOptions};
use crate::store::BookingStore;
use crate::transport::rest::SpeechRestAdapter;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Uploads to `/stt` are audio clips; keep them bounded.
const MAX_REQUEST_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: BookingStore,
    pub connector: Arc<dyn AiConnector>,
    pub relay_options: RelayOptions,
    /// `None` when no API key is configured.
    pub speech: Option<SpeechRestAdapter>,
    /// Public base URL used in TwiML stream URLs.
    pub public_url: Option<String>,
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/incoming-call",
            get(calls::incoming_call_handler).post(calls::incoming_call_handler),
        )
        .route("/media-stream", get(calls::media_stream_handler))
        .route(
            "/doctors",
            get(api::list_doctors_handler).post(api::create_doctor_handler),
        )
        .route(
            "/doctors/{doctor_id}",
            get(api::get_doctor_handler).delete(api::delete_doctor_handler),
        )
        .route(
            "/doctors/{doctor_id}/slots",
            get(api::list_slots_handler).post(api::create_slot_handler),
        )
        .route(
            "/appointments",
            get(api::list_appointments_handler).post(api::create_appointment_handler),
        )
        .route(
            "/appointments/{appointment_id}",
            delete(api::cancel_appointment_handler),
        )
        .route("/tts", post(speech::tts_handler))
        .route("/stt", post(speech::stt_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
