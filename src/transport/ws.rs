use crate::error::{Error, Result};
use crate::protocol::models::DEFAULT_MODEL;
use reqwest::header::HeaderValue;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

#[derive(Debug)]
pub struct WsStream(WebSocketStream<MaybeTlsStream<TcpStream>>);

impl WsStream {
    pub(crate) const fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self(stream)
    }
}

impl futures::Stream for WsStream {
    type Item = std::result::Result<
        tokio_tungstenite::tungstenite::Message,
        tokio_tungstenite::tungstenite::Error,
    >;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        std::pin::Pin::new(&mut self.0).poll_next(cx)
    }
}

impl futures::Sink<tokio_tungstenite::tungstenite::Message> for WsStream {
    type Error = tokio_tungstenite::tungstenite::Error;

    fn poll_ready(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::pin::Pin::new(&mut self.0).poll_ready(cx)
    }

    fn start_send(
        mut self: std::pin::Pin<&mut Self>,
        item: tokio_tungstenite::tungstenite::Message,
    ) -> std::result::Result<(), Self::Error> {
        std::pin::Pin::new(&mut self.0).start_send(item)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::pin::Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_close(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::pin::Pin::new(&mut self.0).poll_close(cx)
    }
}

pub const WS_BASE_URL: &str = "wss://api.openai.com/v1/realtime";

/// Where and how to reach the realtime stream.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub model: Option<String>,
    pub api_key: String,
    pub connect_timeout: Duration,
}

impl Endpoint {
    /// Full connection URL with the model query parameter applied.
    ///
    /// # Errors
    /// Returns an error if the base URL does not parse.
    #[allow(clippy::result_large_err)]
    pub fn request_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)?;
        url.query_pairs_mut()
            .append_pair("model", self.model.as_deref().unwrap_or(DEFAULT_MODEL));
        Ok(url)
    }
}

/// Establish a WebSocket connection to the realtime endpoint.
///
/// # Errors
/// Returns an error if the handshake fails or does not finish within the
/// endpoint's connect timeout.
pub async fn connect(endpoint: &Endpoint) -> Result<WsStream> {
    let url = endpoint.request_url()?;
    let auth_header = HeaderValue::from_str(&format!("Bearer {}", endpoint.api_key))?;

    let mut req = tokio_tungstenite::tungstenite::client::IntoClientRequest::into_client_request(
        url.as_str(),
    )?;
    let h = req.headers_mut();
    h.insert(reqwest::header::AUTHORIZATION, auth_header);
    h.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    let (ws_stream, _) = tokio::time::timeout(endpoint.connect_timeout, connect_async(req))
        .await
        .map_err(|_| Error::ConnectTimeout(endpoint.connect_timeout))??;

    tracing::info!(model = endpoint.model.as_deref().unwrap_or(DEFAULT_MODEL), "Connected to realtime endpoint");

    Ok(WsStream::new(ws_stream))
}
