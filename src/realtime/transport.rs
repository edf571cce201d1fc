//! WebSocket transport layer
//!
//! Single responsibility: connect to the chat endpoint and move text frames.
//! No knowledge of rooms, tokens or reconnection.

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use reqwest::Url;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::types::{ClientError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Send half of a chat connection
pub struct FrameSink {
    sink: SplitSink<WsStream, Message>,
}

/// Receive half of a chat connection
pub struct FrameStream {
    stream: SplitStream<WsStream>,
}

/// Open a WebSocket connection; returns only once the handshake completed
pub async fn connect(url: &Url) -> Result<(FrameSink, FrameStream)> {
    debug!(host = ?url.host_str(), path = %url.path(), "Connecting to chat endpoint");

    let request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ClientError::WebSocket(format!("Failed to build request: {}", e)))?;

    let (ws, _) = connect_async(request)
        .await
        .map_err(|e| ClientError::WebSocket(format!("WebSocket connect failed: {}", e)))?;

    let (sink, stream) = ws.split();
    debug!(path = %url.path(), "Chat WebSocket connected");
    Ok((FrameSink { sink }, FrameStream { stream }))
}

impl FrameSink {
    /// Send one text frame
    pub async fn send_text(&mut self, text: String) -> Result<()> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| ClientError::WebSocket(format!("Failed to send: {}", e)))
    }

    /// Send a close frame and flush
    pub async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "Close handshake did not complete");
        }
    }
}

impl FrameStream {
    /// Receive the next text frame.
    ///
    /// Returns `None` once the connection is closed. Binary frames are decoded
    /// as UTF-8 when possible; ping/pong is handled by tungstenite.
    pub async fn recv(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => {
                        debug!("Skipping non-UTF-8 binary frame");
                        continue;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "Server closed chat connection");
                    return Ok(None);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(ClientError::WebSocket(format!("WebSocket error: {}", e)))
                }
                None => return Ok(None),
            }
        }
    }
}
