//! WebSocket transport for the realtime channel

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use super::transport::{ChannelTransport, ClientMessage, ServerMessage, TransportConnection};
use crate::error::{AttendanceError, AttendanceResult};

#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: Url,
}

impl WebSocketTransport {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn parse(url: &str) -> AttendanceResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| AttendanceError::invalid_configuration("realtime_url", e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self::new(url)),
            other => Err(AttendanceError::invalid_configuration(
                "realtime_url",
                format!("unsupported scheme {}", other),
            )),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    async fn connect(&self) -> AttendanceResult<Box<dyn TransportConnection>> {
        let (stream, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| AttendanceError::network_error(format!("WebSocket connect failed: {}", e)))?;

        info!(url = %self.url, status = %response.status(), "Realtime connection established");
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportConnection for WebSocketConnection {
    async fn send(&mut self, message: &ClientMessage) -> AttendanceResult<()> {
        let text = message.encode()?;
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| AttendanceError::network_error(format!("WebSocket send failed: {}", e)))
    }

    async fn recv(&mut self) -> Option<AttendanceResult<ServerMessage>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(ServerMessage::decode(text.as_str())),
                Ok(Message::Binary(data)) => {
                    return Some(serde_json::from_slice(&data).map_err(AttendanceError::from))
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Realtime connection closed by server");
                    return None;
                }
                // ping/pong are answered by tungstenite
                Ok(_) => continue,
                Err(e) => {
                    return Some(Err(AttendanceError::network_error(format!(
                        "WebSocket receive failed: {}",
                        e
                    ))))
                }
            }
        }
    }
}
