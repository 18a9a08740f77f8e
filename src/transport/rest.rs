use reqwest::{Client, multipart, header::{HeaderValue, AUTHORIZATION}};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const BASE_URL: &str = "https://api.openai.com/v1/audio";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Models used by the batch speech endpoints.
#[derive(Debug, Clone)]
pub struct SpeechModels {
    pub tts: String,
    pub stt: String,
}

impl Default for SpeechModels {
    fn default() -> Self {
        Self {
            tts: "tts-1".to_string(),
            stt: "whisper-1".to_string(),
        }
    }
}

/// An uploaded audio clip to transcribe.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Adapter for the batch text-to-speech and speech-to-text endpoints.
#[derive(Clone, Debug)]
pub struct SpeechRestAdapter {
    client: Client,
    auth_header: HeaderValue,
    base_url: String,
    models: SpeechModels,
}

impl SpeechRestAdapter {
    /// Create a new adapter with the given API key.
    ///
    /// # Errors
    /// Returns an error if the API key results in an invalid header or client build fails.
    #[allow(clippy::result_large_err)]
    pub fn new(api_key: &str, models: SpeechModels) -> Result<Self> {
        Self::new_with_base_url(api_key, models, BASE_URL)
    }

    /// Create a new adapter against a non-default API base.
    ///
    /// # Errors
    /// Returns an error if the API key results in an invalid header or client build fails.
    #[allow(clippy::result_large_err)]
    pub fn new_with_base_url(
        api_key: &str,
        models: SpeechModels,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
            .build()?;

        let auth_header = HeaderValue::from_str(&format!("Bearer {api_key}"))?;

        Ok(Self {
            client,
            auth_header,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            models,
        })
    }

    /// Synthesize `text` as MP3 audio.
    ///
    /// # Errors
    /// Returns an error if the HTTP request fails or returns a non-success status.
    pub async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        let body = SpeechRequest {
            model: &self.models.tts,
            voice,
            input: text,
            response_format: "mp3",
        };

        let res = self.client
            .post(format!("{}/speech", self.base_url))
            .header(AUTHORIZATION, &self.auth_header)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        Ok(res.bytes().await?.to_vec())
    }

    /// Transcribe an audio clip.
    ///
    /// # Errors
    /// Returns an error if the HTTP request fails or returns a non-success status.
    pub async fn transcribe(&self, upload: AudioUpload, language: &str) -> Result<String> {
        let mut file_part = multipart::Part::bytes(upload.bytes).file_name(upload.file_name);
        if let Some(content_type) = upload.content_type.as_deref() {
            file_part = file_part
                .mime_str(content_type)
                .map_err(|e| Error::Mime(e.to_string()))?;
        }

        let form = multipart::Form::new()
            .part("file", file_part)
            .text("model", self.models.stt.clone())
            .text("language", language.to_string());

        let res = self.client
            .post(format!("{}/transcriptions", self.base_url))
            .header(AUTHORIZATION, &self.auth_header)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;

        let transcript: TranscriptionResponse = res.json().await?;
        Ok(transcript.text)
    }
}
