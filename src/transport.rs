//! Native websocket plumbing for [`crate::driver::MatchDriver`].

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use url::Url;

use crate::error::TransportError;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    /// The socket is gone. Only a normal (1000) close frame counts as clean.
    Closed { clean: bool },
}

#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;
    async fn recv(&mut self) -> Incoming;
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait Connector: Send {
    async fn connect(&mut self, url: &Url) -> Result<Box<dyn Transport>, TransportError>;
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Incoming {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Incoming::Text(text),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "server closed the socket");
                    let clean = frame.is_some_and(|f| f.code == CloseCode::Normal);
                    return Incoming::Closed { clean };
                }
                // Pings are answered by tungstenite; the protocol has no binary frames.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("websocket error: {e}");
                    return Incoming::Closed { clean: false };
                }
                None => return Incoming::Closed { clean: false },
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream.close(None).await?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&mut self, url: &Url) -> Result<Box<dyn Transport>, TransportError> {
        // The token rides in the query string; keep it out of the logs.
        debug!(host = ?url.host_str(), path = url.path(), "opening websocket");
        let (stream, response) = timeout(HANDSHAKE_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Refused("handshake timed out".to_string()))??;
        debug!(status = %response.status(), "websocket handshake complete");
        Ok(Box::new(WsTransport { stream }))
    }
}
