//! Batch text-to-speech and speech-to-text, proxied to the speech API.

use super::AppState;
use crate::transport::rest::{AudioUpload, SpeechRestAdapter};
use axum::extract::{Extension, Multipart, Query};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct TtsParams {
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SttParams {
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

fn speech_error(message: impl std::fmt::Display) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message.to_string() }))).into_response()
}

fn adapter(state: &AppState) -> Result<&SpeechRestAdapter, Response> {
    state
        .speech
        .as_ref()
        .ok_or_else(|| speech_error("speech API is not configured"))
}

/// Handler for `POST /tts`: returns MP3 audio.
pub async fn tts_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<TtsParams>,
) -> Response {
    let voice = params
        .voice
        .unwrap_or_else(|| state.relay_options.profile.voice.to_string());
    tracing::info!(chars = params.text.chars().count(), %voice, "tts requested");

    let adapter = match adapter(&state) {
        Ok(adapter) => adapter,
        Err(response) => return response,
    };
    match adapter.synthesize(&params.text, &voice).await {
        Ok(audio) => ([(header::CONTENT_TYPE, "audio/mpeg")], audio).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "tts failed");
            speech_error(err)
        }
    }
}

/// Handler for `POST /stt`: expects a multipart `audio` field.
pub async fn stt_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<SttParams>,
    mut multipart: Multipart,
) -> Response {
    let mut upload = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("audio") => {
                let file_name = field.file_name().unwrap_or("audio").to_string();
                let content_type = field.content_type().map(ToString::to_string);
                match field.bytes().await {
                    Ok(bytes) => {
                        upload = Some(AudioUpload {
                            file_name,
                            content_type,
                            bytes: bytes.to_vec(),
                        });
                    }
                    Err(err) => return speech_error(err),
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(err) => return speech_error(err),
        }
    }
    let Some(upload) = upload else {
        return speech_error("missing multipart field: audio");
    };
    tracing::info!(file = %upload.file_name, bytes = upload.bytes.len(), "stt requested");

    let adapter = match adapter(&state) {
        Ok(adapter) => adapter,
        Err(response) => return response,
    };
    match adapter.transcribe(upload, &params.language).await {
        Ok(text) => Json(json!({ "text": text })).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "stt failed");
            speech_error(err)
        }
    }
}
