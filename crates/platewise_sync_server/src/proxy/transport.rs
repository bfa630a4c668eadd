//! Frame-level view of the two WebSocket hops.
//!
//! The relay only moves data frames. Ping/pong stay on their own hop and are
//! answered by the WebSocket implementation; close frames end the source.

use async_trait::async_trait;
use axum::extract::ws::{self, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, protocol::frame::coding::CloseCode};

use super::state::CloseReason;

/// A data frame, relayed verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Bytes),
    Text(String),
}

impl Frame {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Binary(data) => data.len(),
            Frame::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors from either hop.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("connect timed out")]
    Timeout,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// Receiving half of a hop.
#[async_trait]
pub trait FrameSource: Send {
    /// Next data frame. `None` once the peer closed.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// Sending half of a hop.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Best-effort close carrying `reason`.
    async fn close(&mut self, reason: CloseReason);
}

pub type BoxSource = Box<dyn FrameSource>;
pub type BoxSink = Box<dyn FrameSink>;

// ---------------------------------------------------------------------------
// Client hop (axum)
// ---------------------------------------------------------------------------

/// Split an accepted client socket into frame halves.
pub fn split_client(socket: WebSocket) -> (BoxSink, BoxSource) {
    let (tx, rx) = socket.split();
    (Box::new(ClientSink(tx)), Box::new(ClientSource(rx)))
}

struct ClientSource(SplitStream<WebSocket>);
struct ClientSink(SplitSink<WebSocket, ws::Message>);

#[async_trait]
impl FrameSource for ClientSource {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            return match self.0.next().await? {
                Ok(ws::Message::Binary(data)) => Some(Ok(Frame::Binary(data))),
                Ok(ws::Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(ws::Message::Ping(_)) | Ok(ws::Message::Pong(_)) => continue,
                Ok(ws::Message::Close(_)) => None,
                Err(e) => Some(Err(TransportError::ReceiveFailed(e.to_string()))),
            };
        }
    }
}

#[async_trait]
impl FrameSink for ClientSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Binary(data) => ws::Message::Binary(data),
            Frame::Text(text) => ws::Message::Text(text.into()),
        };
        self.0
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self, reason: CloseReason) {
        let frame = ws::CloseFrame {
            code: reason.close_code(),
            reason: ws::Utf8Bytes::from_static(reason.as_str()),
        };
        let _ = self.0.send(ws::Message::Close(Some(frame))).await;
        let _ = self.0.close().await;
    }
}

// ---------------------------------------------------------------------------
// Upstream hop (tokio-tungstenite)
// ---------------------------------------------------------------------------

pub(crate) type UpstreamStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Split a connected upstream socket into frame halves.
pub(crate) fn split_upstream(stream: UpstreamStream) -> (BoxSink, BoxSource) {
    let (tx, rx) = stream.split();
    (Box::new(UpstreamSink(tx)), Box::new(UpstreamSource(rx)))
}

struct UpstreamSource(SplitStream<UpstreamStream>);
struct UpstreamSink(SplitSink<UpstreamStream, tungstenite::Message>);

#[async_trait]
impl FrameSource for UpstreamSource {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            return match self.0.next().await? {
                Ok(tungstenite::Message::Binary(data)) => Some(Ok(Frame::Binary(data))),
                Ok(tungstenite::Message::Text(text)) => {
                    Some(Ok(Frame::Text(text.as_str().to_owned())))
                }
                Ok(tungstenite::Message::Ping(_))
                | Ok(tungstenite::Message::Pong(_))
                | Ok(tungstenite::Message::Frame(_)) => continue,
                Ok(tungstenite::Message::Close(_)) => None,
                Err(e) => Some(Err(TransportError::ReceiveFailed(e.to_string()))),
            };
        }
    }
}

#[async_trait]
impl FrameSink for UpstreamSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Binary(data) => tungstenite::Message::Binary(data),
            Frame::Text(text) => tungstenite::Message::Text(text.into()),
        };
        self.0
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self, reason: CloseReason) {
        let code = match reason {
            CloseReason::Shutdown => CloseCode::Away,
            CloseReason::ClientError | CloseReason::FrameTooLarge => CloseCode::Error,
            _ => CloseCode::Normal,
        };
        let frame = tungstenite::protocol::CloseFrame {
            code,
            reason: reason.as_str().to_string().into(),
        };
        let _ = self.0.send(tungstenite::Message::Close(Some(frame))).await;
        let _ = self.0.close().await;
    }
}
