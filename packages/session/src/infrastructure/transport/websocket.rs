//! WebSocket transport built on tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Error as WsError, Message, client::IntoClientRequest, http::HeaderValue,
        http::StatusCode,
    },
};

use url::Url;

use crate::{domain::UserId, infrastructure::error::TransportError};

use super::{Connector, Transport};

/// Header carrying the identity on the upgrade request
pub const IDENTITY_HEADER: &str = "x-user-id";

/// Opens WebSocket links to a fixed endpoint, e.g. `ws://127.0.0.1:8080/ws`
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Create a connector for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Endpoint URL with the identity attached as `user_id` query parameter
    fn url_for(&self, identity: &UserId) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.url)?;
        url.query_pairs_mut().append_pair("user_id", identity.as_str());
        Ok(url)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, identity: &UserId) -> Result<Box<dyn Transport>, TransportError> {
        let url = self
            .url_for(identity)
            .map_err(|e| TransportError::Unreachable(format!("invalid endpoint {}: {e}", self.url)))?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        let header = HeaderValue::from_str(identity.as_str())
            .map_err(|e| TransportError::Rejected(format!("identity not sendable: {e}")))?;
        request.headers_mut().insert(IDENTITY_HEADER, header);

        let (stream, response) = connect_async(request).await.map_err(map_connect_error)?;
        tracing::debug!(status = %response.status(), %url, "websocket upgraded");

        Ok(Box::new(WebSocketTransport { stream }))
    }
}

/// An upgraded WebSocket link
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(map_link_error)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => tracing::warn!("dropping non UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "server closed the websocket");
                    return None;
                }
                // Ping/Pong are answered by tungstenite itself
                Ok(_) => {}
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(map_link_error(e))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(map_link_error(e)),
        }
    }
}

fn map_connect_error(error: WsError) -> TransportError {
    match error {
        WsError::Http(response) => {
            let status = response.status();
            if matches!(
                status,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::CONFLICT
            ) {
                TransportError::Rejected(format!("upgrade refused with HTTP {status}"))
            } else {
                TransportError::Unreachable(format!("upgrade failed with HTTP {status}"))
            }
        }
        other => TransportError::Unreachable(other.to_string()),
    }
}

fn map_link_error(error: WsError) -> TransportError {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        other => TransportError::Io(other.to_string()),
    }
}
