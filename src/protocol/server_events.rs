use serde::{Deserialize, Deserializer};
use serde_json::Value;
use super::models::{ArbitraryJson, Session};
use crate::error::ServerError;

/// Events received from the realtime stream. Only the events the relay acts
/// on are typed; everything else is kept as raw JSON in `Unknown`.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Error {
        event_id: Option<String>,
        error: ServerError,
    },
    SessionCreated {
        session: Box<Session>,
    },
    SessionUpdated {
        session: Box<Session>,
    },
    AudioDelta {
        response_id: Option<String>,
        item_id: Option<String>,
        delta: String,
    },
    ResponseDone {
        response: ArbitraryJson,
    },
    /// A tool invocation. `call_id` is present when the call was announced via
    /// `response.function_call_arguments.done`; `arguments` is whatever JSON the
    /// model produced (an object, or a string holding one).
    FunctionCall {
        call_id: Option<String>,
        name: String,
        arguments: Value,
    },
    SpeechStarted {
        audio_start_ms: Option<u32>,
    },
    Unknown(ArbitraryJson),
}

#[derive(Debug, Deserialize)]
struct FunctionCallBody {
    name: String,
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    call_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FunctionCallRepr {
    Nested { function_call: FunctionCallBody },
    Flat(FunctionCallBody),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ServerEventRepr {
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        event_id: Option<String>,
        error: ServerError,
    },
    #[serde(rename = "session.created")]
    SessionCreated { session: Session },
    #[serde(rename = "session.updated")]
    SessionUpdated { session: Session },
    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    AudioDelta {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        delta: String,
    },
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: ArbitraryJson,
    },
    #[serde(rename = "function_call")]
    FunctionCall(FunctionCallRepr),
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u32>,
    },
}

/// Event types with a typed representation. A payload of one of these types
/// that does not match its shape is malformed, not unknown.
const TYPED_EVENTS: &[&str] = &[
    "error",
    "session.created",
    "session.updated",
    "response.audio.delta",
    "response.output_audio.delta",
    "response.done",
    "function_call",
    "response.function_call_arguments.done",
    "input_audio_buffer.speech_started",
];

impl From<ServerEventRepr> for ServerEvent {
    fn from(repr: ServerEventRepr) -> Self {
        match repr {
            ServerEventRepr::Error { event_id, error } => Self::Error { event_id, error },
            ServerEventRepr::SessionCreated { session } => Self::SessionCreated { session: Box::new(session) },
            ServerEventRepr::SessionUpdated { session } => Self::SessionUpdated { session: Box::new(session) },
            ServerEventRepr::AudioDelta { response_id, item_id, delta } => Self::AudioDelta { response_id, item_id, delta },
            ServerEventRepr::ResponseDone { response } => Self::ResponseDone { response },
            ServerEventRepr::FunctionCall(FunctionCallRepr::Nested { function_call: body } | FunctionCallRepr::Flat(body)) => Self::FunctionCall {
                call_id: body.call_id,
                name: body.name,
                arguments: body.arguments,
            },
            ServerEventRepr::FunctionCallArgumentsDone { call_id, name, arguments } => Self::FunctionCall {
                call_id: Some(call_id),
                name,
                arguments: Value::String(arguments),
            },
            ServerEventRepr::SpeechStarted { audio_start_ms } => Self::SpeechStarted { audio_start_ms },
        }
    }
}

impl<'de> Deserialize<'de> for ServerEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = ArbitraryJson::deserialize(deserializer)?;
        let kind = value.get("type").and_then(Value::as_str).unwrap_or_default().to_owned();
        if !TYPED_EVENTS.contains(&kind.as_str()) {
            return Ok(Self::Unknown(value));
        }
        ServerEventRepr::deserialize(value)
            .map(Into::into)
            .map_err(|err| serde::de::Error::custom(format!("malformed {kind} event: {err}")))
    }
}

impl ServerEvent {
    /// Wire `type` of the event, for logging.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Error { .. } => "error",
            Self::SessionCreated { .. } => "session.created",
            Self::SessionUpdated { .. } => "session.updated",
            Self::AudioDelta { .. } => "response.audio.delta",
            Self::ResponseDone { .. } => "response.done",
            Self::FunctionCall { .. } => "function_call",
            Self::SpeechStarted { .. } => "input_audio_buffer.speech_started",
            Self::Unknown(value) => value.get("type").and_then(Value::as_str).unwrap_or("unknown"),
        }
    }
}
