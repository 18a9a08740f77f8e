#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod store;
pub mod tools;
pub mod transport;

pub use error::{Error, Result};
pub use protocol::client_events::ClientEvent;
pub use protocol::server_events::ServerEvent;
pub use protocol::telephony::{TelephonyEvent, TelephonyOutbound};
pub use relay::{CallSummary, CloseReason, RelayOptions, RelayState};
pub use store::BookingStore;
pub use tools::{ToolDispatcher, ToolOutcome};

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use transport::ws::{Endpoint, WsStream};

const TRACE_LOG_MAX_BYTES: usize = 1024;
const MAX_INPUT_AUDIO_CHUNK_BYTES: usize = 15 * 1024 * 1024;
const TRACE_TRUNCATE_SUFFIX: &str = "... (truncated)";

/// A connection to the realtime endpoint.
///
/// Thread safety: `RealtimeClient` is `Send` but not `Sync` because the underlying
/// WebSocket stream is not `Sync`.
#[must_use]
pub struct RealtimeClient {
    stream: WsStream,
}

impl RealtimeClient {
    /// Connect to the realtime endpoint.
    ///
    /// # Errors
    /// Returns an error if the connection fails, times out, or if the URL is invalid.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let stream = transport::ws::connect(endpoint).await?;
        Ok(Self { stream })
    }

    /// Split the client into a sender and a receiver for concurrent usage.
    pub fn split(self) -> (RealtimeSender, RealtimeReceiver) {
        let (write, read) = self.stream.split();
        (RealtimeSender { write }, RealtimeReceiver { read })
    }
}

pub(crate) fn safe_truncate(s: &str, max_bytes: usize) -> std::borrow::Cow<'_, str> {
    if s.len() <= max_bytes {
        return std::borrow::Cow::Borrowed(s);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!(
        "{} {} {} bytes",
        &s[..end],
        TRACE_TRUNCATE_SUFFIX,
        s.len() - end
    ))
}

/// Truncated view of a raw frame for trace logs.
pub(crate) fn trace_frame(s: &str) -> std::borrow::Cow<'_, str> {
    safe_truncate(s, TRACE_LOG_MAX_BYTES)
}

/// The sending half of a split `RealtimeClient`.
pub struct RealtimeSender {
    write: futures::stream::SplitSink<WsStream, Message>,
}

impl RealtimeSender {
    /// Send an already encoded event.
    ///
    /// # Errors
    /// Returns an error if the WebSocket send fails.
    pub async fn send_text(&mut self, json: String) -> Result<()> {
        tracing::trace!("Sending event: {}", trace_frame(&json));
        self.write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Send a close frame and shut the write half down.
    ///
    /// # Errors
    /// Returns an error if the close handshake cannot be written.
    pub async fn close(&mut self) -> Result<()> {
        self.write.close().await?;
        Ok(())
    }
}

/// The receiving half of a split `RealtimeClient`.
pub struct RealtimeReceiver {
    read: futures::stream::SplitStream<WsStream>,
}

impl RealtimeReceiver {
    /// Next text frame, or `None` once the server closed the stream.
    ///
    /// # Errors
    /// Returns an error if the WebSocket fails.
    pub async fn next_text(&mut self) -> Result<Option<String>> {
        while let Some(msg) = self.read.next().await {
            match msg? {
                Message::Text(text) => {
                    tracing::trace!("Received event: {}", trace_frame(text.as_str()));
                    return Ok(Some(text.as_str().to_owned()));
                }
                Message::Close(_) => {
                    tracing::info!("WebSocket connection closed by server");
                    return Ok(None);
                }
                _ => (),
            }
        }
        Ok(None)
    }
}

#[allow(clippy::result_large_err)]
pub(crate) fn validate_client_event(event: &ClientEvent) -> Result<()> {
    match event {
        ClientEvent::InputAudioBufferAppend { audio, .. } => {
            let size = estimate_base64_decoded_len(audio)?;
            if size > MAX_INPUT_AUDIO_CHUNK_BYTES {
                return Err(Error::InvalidClientEvent(format!(
                    "input_audio_buffer.append exceeds 15MB ({size} bytes)",
                )));
            }
        }
        ClientEvent::SessionUpdate { session, .. } => {
            if let Some(tools) = &session.tools {
                validate_tools(tools)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[allow(clippy::result_large_err)]
fn validate_tools(tools: &[protocol::models::Tool]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for tool in tools {
        let name = tool.name();
        if name.is_empty() {
            return Err(Error::InvalidClientEvent("tool name must not be empty".to_string()));
        }
        if !seen.insert(name) {
            return Err(Error::InvalidClientEvent(format!("duplicate tool name: {name}")));
        }
    }
    Ok(())
}

#[allow(clippy::result_large_err)]
pub(crate) fn estimate_base64_decoded_len(s: &str) -> Result<usize> {
    let bytes = s.as_bytes();
    if bytes.len() % 4 != 0 {
        return Err(Error::InvalidClientEvent(
            "audio payload has invalid base64 length".to_string(),
        ));
    }

    let mut padding = 0;
    let mut seen_padding = false;
    for &b in bytes {
        if b == b'=' {
            seen_padding = true;
            padding += 1;
            continue;
        }
        if seen_padding {
            return Err(Error::InvalidClientEvent(
                "audio payload has invalid base64 padding".to_string(),
            ));
        }
        let is_valid = matches!(b,
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'+' | b'/'
        );
        if !is_valid {
            return Err(Error::InvalidClientEvent(
                "audio payload has invalid base64 character".to_string(),
            ));
        }
    }

    if padding > 2 {
        return Err(Error::InvalidClientEvent(
            "audio payload has invalid base64 padding length".to_string(),
        ));
    }

    Ok(bytes.len() / 4 * 3 - padding)
}
