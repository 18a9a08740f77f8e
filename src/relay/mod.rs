//! Per-call relay between a telephony media stream and the realtime stream.

pub mod adapter;
pub mod lifecycle;
pub mod session;
pub mod transport;

pub use adapter::SessionProfile;
pub use lifecycle::{CloseReason, Lifecycle, RelayState};
pub use session::{CallSummary, Relay, RelayOptions};
pub use transport::{AiConnector, AiLink, FrameSink, FrameSource, WsConnector};
