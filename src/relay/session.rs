//! Relay Coordinator: owns one call from connect to close.
//!
//! The realtime write half belongs to a writer task fed by a command channel.
//! Two pumps run beside it, telephony to realtime and realtime to telephony,
//! and all three watch the same [`Lifecycle`] so that whichever side fails
//! first brings the others down.

use super::adapter::{self, SessionProfile};
use super::lifecycle::{CloseReason, Lifecycle, RelayState};
use super::transport::{AiConnector, FrameSink, FrameSource};
use crate::error::{Error, Result};
use crate::protocol::client_events::ClientEvent;
use crate::protocol::server_events::ServerEvent;
use crate::protocol::telephony::{TelephonyEvent, TelephonyOutbound};
use crate::tools::{ToolDispatcher, tool_definitions};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Consecutive undecodable frames tolerated on one side before the call is
/// treated as corrupted.
pub const MAX_CONSECUTIVE_DECODE_FAILURES: u32 = 8;
/// Audio deltas held while the telephony stream id is still unknown.
pub const MAX_PENDING_AUDIO_DELTAS: usize = 256;

const COMMAND_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub profile: SessionProfile,
    pub connect_timeout: Duration,
    /// Ask the model to speak after every tool result.
    pub respond_after_tool: bool,
    /// Clear telephony playback when the caller starts talking.
    pub barge_in: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            profile: SessionProfile::default(),
            connect_timeout: Duration::from_secs(10),
            respond_after_tool: true,
            barge_in: true,
        }
    }
}

/// What happened on a call, returned once it is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSummary {
    pub stream_sid: Option<String>,
    pub close_reason: Option<CloseReason>,
    pub media_frames_in: u64,
    pub audio_deltas_out: u64,
    pub tool_calls: u64,
    pub turns: u64,
}

enum Command {
    Send(ClientEvent),
    SendWithResponse {
        event: ClientEvent,
        respond: oneshot::Sender<Result<()>>,
    },
}

#[derive(Debug, Default)]
struct InboundReport {
    stream_sid: Option<String>,
    media_frames_in: u64,
}

#[derive(Debug, Default)]
struct OutboundReport {
    audio_deltas_out: u64,
    tool_calls: u64,
    turns: u64,
}

/// One call's coordinator.
pub struct Relay {
    connector: Arc<dyn AiConnector>,
    dispatcher: ToolDispatcher,
    options: RelayOptions,
    lifecycle: Lifecycle,
}

impl Relay {
    #[must_use]
    pub fn new(connector: Arc<dyn AiConnector>, dispatcher: ToolDispatcher, options: RelayOptions) -> Self {
        Self {
            connector,
            dispatcher,
            options,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Handle on this call's state, for observers.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    /// Relay one telephony media stream until either side ends it.
    ///
    /// # Errors
    /// Returns an error only if the realtime side cannot be reached; the call
    /// is then already closed. Failures after that end the call normally and
    /// show up in [`CallSummary::close_reason`].
    pub async fn run<S, K>(self, mut telephony_source: S, mut telephony_sink: K) -> Result<CallSummary>
    where
        S: FrameSource,
        K: FrameSink,
    {
        let Self {
            connector,
            dispatcher,
            options,
            lifecycle,
        } = self;

        let connect = tokio::time::timeout(options.connect_timeout, connector.connect()).await;
        let (ai_sink, mut ai_source) = match connect {
            Ok(Ok(link)) => link,
            Ok(Err(err)) => return Err(abort(&lifecycle, &mut telephony_sink, err).await),
            Err(_) => {
                let err = Error::ConnectTimeout(options.connect_timeout);
                return Err(abort(&lifecycle, &mut telephony_sink, err).await);
            }
        };
        lifecycle.advance(RelayState::Negotiating);

        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(COMMAND_CHANNEL_CAPACITY);
        let writer = ai_writer(ai_sink, cmd_rx, lifecycle.clone());

        // Fire and forget: confirmation arrives as session.updated later.
        let mut opening = vec![adapter::session_update(&options.profile, tool_definitions())];
        opening.extend(adapter::greeting(&options.profile));
        for event in opening {
            if cmd_tx.send(Command::Send(event)).await.is_err() {
                tracing::warn!("writer gone during negotiation");
            }
        }
        lifecycle.advance(RelayState::Active);
        tracing::info!("relay active");

        let (sid_tx, sid_rx) = watch::channel::<Option<String>>(None);
        let inbound = telephony_pump(&mut telephony_source, cmd_tx.clone(), sid_tx, lifecycle.clone());
        let outbound = ai_pump(
            ai_source.as_mut(),
            &mut telephony_sink,
            cmd_tx,
            sid_rx,
            &dispatcher,
            &options,
            lifecycle.clone(),
        );

        let ((), inbound, outbound) = tokio::join!(writer, inbound, outbound);

        if let Err(err) = telephony_sink.close().await {
            tracing::debug!(error = %err, "telephony socket already closed");
        }
        drop(ai_source);

        // Every pump records a reason before exiting; this only covers a
        // writer that stopped because both pumps were gone.
        lifecycle.begin_closing(CloseReason::TransportFailure);
        lifecycle.mark_closed();

        let summary = CallSummary {
            stream_sid: inbound.stream_sid,
            close_reason: lifecycle.close_reason(),
            media_frames_in: inbound.media_frames_in,
            audio_deltas_out: outbound.audio_deltas_out,
            tool_calls: outbound.tool_calls,
            turns: outbound.turns,
        };
        tracing::info!(
            stream_sid = summary.stream_sid.as_deref().unwrap_or("-"),
            reason = ?summary.close_reason,
            media_frames_in = summary.media_frames_in,
            audio_deltas_out = summary.audio_deltas_out,
            tool_calls = summary.tool_calls,
            turns = summary.turns,
            "call closed"
        );
        Ok(summary)
    }
}

async fn abort<K: FrameSink>(lifecycle: &Lifecycle, telephony_sink: &mut K, err: Error) -> Error {
    tracing::error!(error = %err, "could not reach realtime endpoint");
    lifecycle.mark_closed();
    if let Err(close_err) = telephony_sink.close().await {
        tracing::debug!(error = %close_err, "telephony socket already closed");
    }
    err
}

/// Sole owner of the realtime write half. Closes it exactly once, on exit.
async fn ai_writer(mut sink: Box<dyn FrameSink>, mut commands: mpsc::Receiver<Command>, lifecycle: Lifecycle) {
    loop {
        let command = tokio::select! {
            () = lifecycle.closing() => break,
            command = commands.recv() => command,
        };
        let Some(command) = command else { break };
        let (event, respond) = match command {
            Command::Send(event) => (event, None),
            Command::SendWithResponse { event, respond } => (event, Some(respond)),
        };

        let frame = match adapter::encode_client(&event) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(event = event.kind(), error = %err, "dropping invalid client event");
                if let Some(respond) = respond {
                    let _ = respond.send(Err(err));
                }
                continue;
            }
        };

        let result = sink.send_frame(frame).await;
        let failed = result.is_err();
        if let Err(err) = &result {
            tracing::warn!(event = event.kind(), error = %err, "realtime send failed");
        }
        if let Some(respond) = respond {
            let _ = respond.send(result);
        }
        if failed {
            lifecycle.begin_closing(CloseReason::TransportFailure);
            break;
        }
    }

    if let Err(err) = sink.close().await {
        tracing::debug!(error = %err, "realtime stream already closed");
    }
}

/// Telephony to realtime: remembers the stream id and forwards caller audio.
async fn telephony_pump(
    source: &mut dyn FrameSource,
    commands: mpsc::Sender<Command>,
    stream_sid: watch::Sender<Option<String>>,
    lifecycle: Lifecycle,
) -> InboundReport {
    let mut report = InboundReport::default();
    let mut decode_failures = 0u32;

    loop {
        let frame = tokio::select! {
            () = lifecycle.closing() => break,
            frame = source.next_frame() => frame,
        };
        let text = match frame {
            Ok(Some(text)) => text,
            Ok(None) => {
                lifecycle.begin_closing(CloseReason::TelephonyClosed);
                break;
            }
            Err(err) => {
                tracing::warn!(error = %err, "telephony read failed");
                lifecycle.begin_closing(CloseReason::TransportFailure);
                break;
            }
        };

        let event = match adapter::decode_telephony(&text) {
            Ok(event) => {
                decode_failures = 0;
                event
            }
            Err(err) => {
                decode_failures += 1;
                tracing::warn!(error = %err, decode_failures, "dropping telephony frame");
                if decode_failures > MAX_CONSECUTIVE_DECODE_FAILURES {
                    lifecycle.begin_closing(CloseReason::CorruptedStream);
                    break;
                }
                continue;
            }
        };

        match event {
            TelephonyEvent::Start { start } => {
                tracing::info!(stream_sid = %start.stream_sid, call_sid = ?start.call_sid, "media stream started");
                report.stream_sid = Some(start.stream_sid.clone());
                stream_sid.send_replace(Some(start.stream_sid));
            }
            TelephonyEvent::Media { media } => {
                report.media_frames_in += 1;
                let event = ClientEvent::audio_append(media.payload);
                if commands.send(Command::Send(event)).await.is_err() {
                    break;
                }
            }
            TelephonyEvent::Stop => {
                tracing::info!(stream_sid = ?report.stream_sid, "telephony stream stopped");
                lifecycle.begin_closing(CloseReason::TelephonyStopped);
                break;
            }
            TelephonyEvent::Connected | TelephonyEvent::Mark | TelephonyEvent::Dtmf | TelephonyEvent::Unknown => {
                tracing::trace!(?event, "ignoring telephony event");
            }
        }
    }

    report
}

/// Realtime to telephony: forwards audio and resolves tool calls inline.
async fn ai_pump(
    source: &mut dyn FrameSource,
    telephony: &mut dyn FrameSink,
    commands: mpsc::Sender<Command>,
    mut stream_sid: watch::Receiver<Option<String>>,
    dispatcher: &ToolDispatcher,
    options: &RelayOptions,
    lifecycle: Lifecycle,
) -> OutboundReport {
    let mut report = OutboundReport::default();
    let mut pending: VecDeque<String> = VecDeque::new();
    let mut sid: Option<String> = None;
    let mut decode_failures = 0u32;

    loop {
        let frame = tokio::select! {
            () = lifecycle.closing() => break,
            Ok(()) = stream_sid.changed(), if sid.is_none() => {
                sid = stream_sid.borrow_and_update().clone();
                if let Some(sid) = sid.as_deref() {
                    if !flush_pending(telephony, sid, &mut pending, &mut report, &lifecycle).await {
                        break;
                    }
                }
                continue;
            }
            frame = source.next_frame() => frame,
        };
        let text = match frame {
            Ok(Some(text)) => text,
            Ok(None) => {
                lifecycle.begin_closing(CloseReason::AiClosed);
                break;
            }
            Err(err) => {
                tracing::warn!(error = %err, "realtime read failed");
                lifecycle.begin_closing(CloseReason::TransportFailure);
                break;
            }
        };

        let event = match adapter::decode_server(&text) {
            Ok(event) => {
                decode_failures = 0;
                event
            }
            Err(err) => {
                decode_failures += 1;
                tracing::warn!(error = %err, decode_failures, "dropping realtime event");
                if decode_failures > MAX_CONSECUTIVE_DECODE_FAILURES {
                    lifecycle.begin_closing(CloseReason::CorruptedStream);
                    break;
                }
                continue;
            }
        };

        match event {
            ServerEvent::AudioDelta { delta, .. } => {
                if let Some(sid) = sid.as_deref() {
                    if !forward_audio(telephony, sid, delta, &mut report, &lifecycle).await {
                        break;
                    }
                } else {
                    if pending.len() == MAX_PENDING_AUDIO_DELTAS {
                        pending.pop_front();
                        tracing::debug!("dropping oldest buffered audio delta");
                    }
                    pending.push_back(delta);
                }
            }
            ServerEvent::FunctionCall { call_id, name, arguments } => {
                report.tool_calls += 1;
                if !resolve_tool_call(&commands, dispatcher, options, &name, call_id.as_deref(), arguments).await {
                    break;
                }
            }
            ServerEvent::SpeechStarted { .. } => {
                pending.clear();
                let clear = sid.as_deref().filter(|_| options.barge_in).map(TelephonyOutbound::clear);
                if let Some(frame) = clear {
                    if !send_telephony(telephony, &frame, &lifecycle).await {
                        break;
                    }
                }
            }
            ServerEvent::ResponseDone { .. } => {
                report.turns += 1;
            }
            ServerEvent::Error { error, .. } => {
                tracing::warn!(code = ?error.code, message = %error.message, "realtime error event");
            }
            ServerEvent::SessionCreated { .. } | ServerEvent::SessionUpdated { .. } => {
                tracing::debug!(event = event.kind(), "session acknowledged");
            }
            ServerEvent::Unknown(_) => {
                tracing::trace!(event = event.kind(), "ignoring realtime event");
            }
        }
    }

    report
}

async fn resolve_tool_call(
    commands: &mpsc::Sender<Command>,
    dispatcher: &ToolDispatcher,
    options: &RelayOptions,
    name: &str,
    call_id: Option<&str>,
    arguments: Value,
) -> bool {
    tracing::info!(tool = name, call_id = ?call_id, "tool call");
    let outcome = dispatcher.dispatch(name, arguments).await;
    let event = adapter::tool_result(name, call_id, &outcome);

    let (respond, delivered) = oneshot::channel();
    if commands
        .send(Command::SendWithResponse { event, respond })
        .await
        .is_err()
    {
        return false;
    }
    match delivered.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(tool = name, error = %err, "tool result not delivered");
            // A rejected event leaves the stream usable; a failed write does not.
            return matches!(err, Error::InvalidClientEvent(_));
        }
        Err(_) => return false,
    }

    if options.respond_after_tool {
        return commands.send(Command::Send(ClientEvent::response_create())).await.is_ok();
    }
    true
}

async fn flush_pending(
    telephony: &mut dyn FrameSink,
    sid: &str,
    pending: &mut VecDeque<String>,
    report: &mut OutboundReport,
    lifecycle: &Lifecycle,
) -> bool {
    if !pending.is_empty() {
        tracing::debug!(count = pending.len(), "flushing buffered audio");
    }
    while let Some(delta) = pending.pop_front() {
        if !forward_audio(telephony, sid, delta, report, lifecycle).await {
            return false;
        }
    }
    true
}

async fn forward_audio(
    telephony: &mut dyn FrameSink,
    sid: &str,
    delta: String,
    report: &mut OutboundReport,
    lifecycle: &Lifecycle,
) -> bool {
    let sent = send_telephony(telephony, &TelephonyOutbound::media(sid, delta), lifecycle).await;
    if sent {
        report.audio_deltas_out += 1;
    }
    sent
}

async fn send_telephony(telephony: &mut dyn FrameSink, frame: &TelephonyOutbound, lifecycle: &Lifecycle) -> bool {
    let result = match adapter::encode_telephony(frame) {
        Ok(text) => telephony.send_frame(text).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "telephony write failed");
            lifecycle.begin_closing(CloseReason::TransportFailure);
            false
        }
    }
}
