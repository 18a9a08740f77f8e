use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use rt_clinic_relay::relay::{AiConnector, AiLink, RelayOptions};
use rt_clinic_relay::server::{AppState, app};
use rt_clinic_relay::store::{BookingStore, DbRuntimeSettings};
use rt_clinic_relay::{Error, Result};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_tungstenite::tungstenite;
use tower::ServiceExt;

struct NoRealtime;

#[async_trait::async_trait]
impl AiConnector for NoRealtime {
    async fn connect(&self) -> Result<AiLink> {
        Err(Error::WebSocket(tungstenite::Error::ConnectionClosed))
    }
}

fn test_app(public_url: Option<&str>) -> Router {
    let settings = DbRuntimeSettings {
        pool_max_size: 1,
        ..DbRuntimeSettings::default()
    };
    let store = BookingStore::open(":memory:", settings).expect("in-memory store");
    app(AppState {
        store,
        connector: Arc::new(NoRealtime),
        relay_options: RelayOptions::default(),
        speech: None,
        public_url: public_url.map(str::to_string),
    })
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri).header(header::HOST, "relay.test");
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let app = test_app(None);
    let (status, body) = send_json(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_incoming_call_points_at_media_stream() {
    let app = test_app(None);
    let request = Request::builder()
        .method("POST")
        .uri("/incoming-call")
        .header(header::HOST, "abc.ngrok.app")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/xml");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let twiml = String::from_utf8(body.to_vec()).unwrap();
    assert!(twiml.contains("<Say>Connecting you, please stay on line.</Say>"));
    assert!(twiml.contains(r#"<Stream url="wss://abc.ngrok.app/media-stream" />"#));
}

#[tokio::test]
async fn test_incoming_call_prefers_public_url() {
    let app = test_app(Some("https://clinic.example.com/"));
    let (status, body) = send(&app, "GET", "/incoming-call", None).await;
    assert_eq!(status, StatusCode::OK);
    let twiml = String::from_utf8(body).unwrap();
    assert!(twiml.contains("wss://clinic.example.com/media-stream"));
}

#[tokio::test]
async fn test_doctor_crud() {
    let app = test_app(None);

    let (status, created) = send_json(
        &app,
        "POST",
        "/doctors",
        Some(json!({ "name": "Dr. Cardioni", "specialty": "Cardiologist", "contact_info": "x@y.z" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_i64().unwrap();
    send_json(
        &app,
        "POST",
        "/doctors",
        Some(json!({ "name": "Dr. Kidd", "specialty": "Pediatrician" })),
    )
    .await;

    let (status, all) = send_json(&app, "GET", "/doctors", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (_, cardio) = send_json(&app, "GET", "/doctors?specialty=cardio", None).await;
    assert_eq!(cardio.as_array().unwrap().len(), 1);
    assert_eq!(cardio[0]["name"], "Dr. Cardioni");

    let (_, page) = send_json(&app, "GET", "/doctors?skip=1&limit=1", None).await;
    assert_eq!(page[0]["name"], "Dr. Kidd");

    let (status, one) = send_json(&app, "GET", &format!("/doctors/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(one["specialty"], "Cardiologist");

    let (status, _) = send_json(&app, "DELETE", &format!("/doctors/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, missing) = send_json(&app, "GET", &format!("/doctors/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing, json!({ "detail": "Doctor not found" }));

    let (status, _) = send_json(&app, "POST", "/doctors", Some(json!({ "name": " ", "specialty": "x" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_slots_and_appointments() {
    let app = test_app(None);
    let (_, doctor) = send_json(
        &app,
        "POST",
        "/doctors",
        Some(json!({ "name": "Dr. Cardioni", "specialty": "Cardiologist" })),
    )
    .await;
    let doctor_id = doctor["id"].as_i64().unwrap();

    let (status, slot) = send_json(
        &app,
        "POST",
        &format!("/doctors/{doctor_id}/slots"),
        Some(json!({ "start_time": "2025-06-02T09:00:00" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let slot_id = slot["id"].as_i64().unwrap();
    send_json(
        &app,
        "POST",
        &format!("/doctors/{doctor_id}/slots"),
        Some(json!({ "start_time": "2025-06-03 09:00:00" })),
    )
    .await;

    let (_, day) = send_json(&app, "GET", &format!("/doctors/{doctor_id}/slots?date=2025-06-02"), None).await;
    assert_eq!(day.as_array().unwrap().len(), 1);
    assert_eq!(day[0]["id"], slot_id);

    let (status, _) = send_json(&app, "GET", "/doctors/999/slots", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send_json(
        &app,
        "POST",
        "/doctors/999/slots",
        Some(json!({ "start_time": "2025-06-02T09:00:00" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let booking = json!({ "doctor_id": doctor_id, "slot_id": slot_id, "patient_name": "Alice" });
    let (status, appointment) = send_json(&app, "POST", "/appointments", Some(booking)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(appointment["patient_name"], "Alice");
    assert_eq!(appointment["status"], "booked");
    let appointment_id = appointment["id"].as_i64().unwrap();

    let again = json!({ "doctor_id": doctor_id, "slot_id": slot_id, "patient_name": "Bob" });
    let (status, body) = send_json(&app, "POST", "/appointments", Some(again)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "detail": "Slot not available" }));

    let (_, listed) = send_json(&app, "GET", "/appointments", None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, body) = send_json(&app, "DELETE", &format!("/appointments/{appointment_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    let (status, body) = send_json(&app, "DELETE", &format!("/appointments/{appointment_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "detail": "Appointment not found" }));
}

#[tokio::test]
async fn test_speech_without_api_key() {
    let app = test_app(None);
    let (status, body) = send_json(&app, "POST", "/tts?text=hello", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("not configured"));
}
