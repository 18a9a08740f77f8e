//! Telephony call entry and the media stream that carries the call audio.

use super::AppState;
use crate::relay::Relay;
use crate::tools::ToolDispatcher;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures::StreamExt;
use std::sync::Arc;

const CONNECTING_PROMPT: &str = "Connecting you, please stay on line.";

/// Handler for `GET|POST /incoming-call`: TwiML that points the call's audio
/// at `/media-stream`.
pub async fn incoming_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let host = stream_host(state.public_url.as_deref(), &headers);
    let stream_url = format!("wss://{host}/media-stream");
    tracing::info!(%stream_url, "incoming call");

    let body = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Response><Say>{CONNECTING_PROMPT}</Say><Connect><Stream url="{}" /></Connect></Response>"#,
        xml_escape(&stream_url)
    );
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

/// Handler for `GET /media-stream`: runs one relay per connection.
pub async fn media_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    tracing::info!("media stream connected");
    let (sink, source) = socket.split();
    let relay = Relay::new(
        Arc::clone(&state.connector),
        ToolDispatcher::new(state.store.clone()),
        state.relay_options.clone(),
    );
    if let Err(err) = relay.run(source, sink).await {
        tracing::warn!(error = %err, "call dropped before it was relayed");
    }
}

/// Host (and port) of the public stream URL, without scheme or path.
fn stream_host(public_url: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(url) = public_url {
        let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
        return without_scheme.trim_end_matches('/').to_string();
    }
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost")
        .to_string()
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
