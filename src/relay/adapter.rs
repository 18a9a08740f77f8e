//! Session Protocol Adapter: reshapes frames between the telephony stream and
//! the realtime stream. No business logic lives here.

use crate::error::{Error, Result};
use crate::protocol::client_events::ClientEvent;
use crate::protocol::models::{
    AudioFormat, Item, Modality, SessionUpdate, Temperature, Tool, TurnDetection, Voice,
};
use crate::protocol::server_events::ServerEvent;
use crate::protocol::telephony::{TelephonyEvent, TelephonyOutbound};
use crate::tools::ToolOutcome;

pub const DEFAULT_INSTRUCTIONS: &str = "You are Lilly, a helpful, empathetic hospital assistant at Rock Hospitals. \
You always start your conversation with a greeting. \
When you need real data (doctor list, open slots, booking, cancelling) you MUST call the tool that does it. \
NEVER make up doctors, slots or IDs, always use the function responses. \
Use natural conversation, hesitations, and warmth. Help users with doctors, appointments, etc. \
Ask clarifying questions, suggest slots, and never book until user confirms. Never provide medical advice. \
Say only one sentence at once, don't rush.";

pub const DEFAULT_GREETING: &str =
    "The phone is ringing. You pick up. Greet the caller and ask how you can help.";

/// Largest inbound media payload accepted, decoded.
pub const MAX_MEDIA_PAYLOAD_BYTES: usize = 15 * 1024 * 1024;

/// How the realtime session is configured at the start of every call.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionProfile {
    pub instructions: String,
    pub greeting: String,
    pub voice: Voice,
    pub temperature: Temperature,
    pub audio_format: AudioFormat,
    pub turn_detection: TurnDetection,
}

impl Default for SessionProfile {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            greeting: DEFAULT_GREETING.to_string(),
            voice: Voice::default(),
            temperature: Temperature::default(),
            audio_format: AudioFormat::default(),
            turn_detection: TurnDetection::server_vad(),
        }
    }
}

/// The `session.update` sent once when a call is negotiated.
#[must_use]
pub fn session_update(profile: &SessionProfile, tools: Vec<Tool>) -> ClientEvent {
    ClientEvent::session_update(SessionUpdate {
        modalities: Some(vec![Modality::Text, Modality::Audio]),
        instructions: Some(profile.instructions.clone()),
        voice: Some(profile.voice.clone()),
        input_audio_format: Some(profile.audio_format),
        output_audio_format: Some(profile.audio_format),
        turn_detection: Some(profile.turn_detection.clone()),
        tools: Some(tools),
        tool_choice: None,
        temperature: Some(profile.temperature),
    })
}

/// Synthetic opening turn that makes the model greet the caller.
#[must_use]
pub fn greeting(profile: &SessionProfile) -> [ClientEvent; 2] {
    [
        ClientEvent::item_create(Item::user_text(profile.greeting.clone())),
        ClientEvent::response_create(),
    ]
}

/// The item that hands a tool's outcome back to the model. Calls that came
/// with a `call_id` are answered by id; older `function_call` events are
/// answered by tool name.
#[must_use]
pub fn tool_result(name: &str, call_id: Option<&str>, outcome: &ToolOutcome) -> ClientEvent {
    let content = outcome.to_json_string();
    let item = match call_id {
        Some(call_id) => Item::FunctionCallOutput {
            id: None,
            call_id: call_id.to_string(),
            output: content,
        },
        None => Item::Function {
            name: name.to_string(),
            content,
        },
    };
    ClientEvent::item_create(item)
}

/// Validate and serialize an event for the realtime stream.
///
/// # Errors
/// Returns [`Error::InvalidClientEvent`] for events the server would reject.
#[allow(clippy::result_large_err)]
pub fn encode_client(event: &ClientEvent) -> Result<String> {
    crate::validate_client_event(event)?;
    Ok(serde_json::to_string(event)?)
}

/// # Errors
/// Returns an error if serialization fails.
#[allow(clippy::result_large_err)]
pub fn encode_telephony(frame: &TelephonyOutbound) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}

/// Parse a telephony frame. A `start` must name its stream, and media
/// payloads must be well-formed base64 within the size cap.
///
/// # Errors
/// Returns [`Error::Decode`] for malformed frames.
#[allow(clippy::result_large_err)]
pub fn decode_telephony(frame: &str) -> Result<TelephonyEvent> {
    let event: TelephonyEvent = serde_json::from_str(frame)
        .map_err(|e| Error::Decode(format!("telephony frame: {e}")))?;
    match &event {
        TelephonyEvent::Start { start } if start.stream_sid.trim().is_empty() => {
            return Err(Error::Decode("start event has a blank streamSid".to_string()));
        }
        TelephonyEvent::Media { media } => {
            let size = crate::estimate_base64_decoded_len(&media.payload)
                .map_err(|e| Error::Decode(e.to_string()))?;
            if size > MAX_MEDIA_PAYLOAD_BYTES {
                return Err(Error::Decode(format!("media payload too large ({size} bytes)")));
            }
        }
        _ => {}
    }
    Ok(event)
}

/// Parse a realtime stream frame.
///
/// # Errors
/// Returns [`Error::Decode`] for malformed frames.
#[allow(clippy::result_large_err)]
pub fn decode_server(frame: &str) -> Result<ServerEvent> {
    serde_json::from_str(frame).map_err(|e| Error::Decode(format!("realtime event: {e}")))
}
