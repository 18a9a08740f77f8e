//! Frame-level transports the relay pumps read from and write to.
//!
//! Both sides of a call speak JSON text frames, so the pumps only need
//! "next frame" and "send frame". Decoding stays in the adapter.

use crate::error::{Error, Result};
use crate::transport::ws::Endpoint;
use crate::{RealtimeClient, RealtimeReceiver, RealtimeSender};
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait FrameSource: Send {
    /// Next text frame, or `None` once the peer has closed.
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<String>>>;
}

pub trait FrameSink: Send {
    fn send_frame(&mut self, frame: String) -> BoxFuture<'_, Result<()>>;
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

pub type AiLink = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Opens the realtime side of a call.
#[async_trait::async_trait]
pub trait AiConnector: Send + Sync {
    async fn connect(&self) -> Result<AiLink>;
}

/// Connects to the realtime WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: Endpoint,
}

impl WsConnector {
    #[must_use]
    pub const fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait::async_trait]
impl AiConnector for WsConnector {
    async fn connect(&self) -> Result<AiLink> {
        let (sender, receiver) = RealtimeClient::connect(&self.endpoint).await?.split();
        Ok((Box::new(sender), Box::new(receiver)))
    }
}

impl FrameSink for RealtimeSender {
    fn send_frame(&mut self, frame: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.send_text(frame).await })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { Self::close(self).await })
    }
}

impl FrameSource for RealtimeReceiver {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move { self.next_text().await })
    }
}

/// Telephony media stream accepted by the HTTP server.
impl FrameSource for SplitStream<WebSocket> {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move {
            while let Some(msg) = self.next().await {
                match msg? {
                    Message::Text(text) => {
                        tracing::trace!("Received telephony frame: {}", crate::trace_frame(text.as_str()));
                        return Ok(Some(text.as_str().to_owned()));
                    }
                    Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => return Ok(Some(text)),
                        Err(_) => tracing::debug!(len = bytes.len(), "ignoring non-text telephony frame"),
                    },
                    Message::Close(_) => return Ok(None),
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            Ok(None)
        })
    }
}

impl FrameSink for SplitSink<WebSocket, Message> {
    fn send_frame(&mut self, frame: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.send(Message::Text(frame.into())).await.map_err(Error::from)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { SinkExt::close(self).await.map_err(Error::from) })
    }
}
