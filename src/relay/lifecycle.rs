//! Per-call state machine and the shutdown signal both pumps watch.

use std::sync::{Arc, OnceLock};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RelayState {
    Connecting,
    Negotiating,
    Active,
    Closing,
    Closed,
}

/// Why a call ended. The first reason recorded wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The telephony side sent `stop`.
    TelephonyStopped,
    /// The telephony connection went away without `stop`.
    TelephonyClosed,
    /// The realtime stream ended.
    AiClosed,
    /// Too many consecutive undecodable messages on one side.
    CorruptedStream,
    /// A read or write on either connection failed.
    TransportFailure,
}

impl CloseReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TelephonyStopped => "telephony stopped",
            Self::TelephonyClosed => "telephony closed",
            Self::AiClosed => "realtime stream closed",
            Self::CorruptedStream => "corrupted stream",
            Self::TransportFailure => "transport failure",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared handle on one call's state. States only move forward; `Closing`
/// and `Closed` are each entered at most once.
#[derive(Clone, Debug)]
pub struct Lifecycle {
    state: Arc<watch::Sender<RelayState>>,
    reason: Arc<OnceLock<CloseReason>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(RelayState::Connecting);
        Self {
            state: Arc::new(state),
            reason: Arc::new(OnceLock::new()),
        }
    }

    #[must_use]
    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }

    /// Move to `next` if it is ahead of the current state. Returns whether
    /// the state changed.
    pub fn advance(&self, next: RelayState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!(state = ?next, "relay state changed");
        }
        changed
    }

    /// Signal shutdown to every pump. Only the first call records its reason
    /// and returns `true`; later calls are no-ops.
    pub fn begin_closing(&self, reason: CloseReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        if first {
            tracing::info!(%reason, "relay closing");
        }
        self.advance(RelayState::Closing);
        first
    }

    /// Enter the terminal state. Returns `true` only for the call that did so.
    pub fn mark_closed(&self) -> bool {
        self.advance(RelayState::Closed)
    }

    /// Resolves once shutdown has been signalled.
    pub async fn closing(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this only errors if it is
        // already past `Closing`, which also means we are done waiting.
        let _ = rx.wait_for(|state| *state >= RelayState::Closing).await;
    }
}
