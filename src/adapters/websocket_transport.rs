//! WebSocket-backed `Transport` (C2 concrete adapter): one client connection
//! to the relay per device, carrying whole-frame AIP envelopes as text
//! messages.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::domain::error::TransportError;
use crate::ports::transport::{Transport, TransportFactory};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type Sink = futures::stream::SplitSink<WsStream, Message>;
type Source = futures::stream::SplitStream<WsStream>;

/// Opens real WebSocket connections against relay endpoint URLs.
pub struct WebSocketTransportFactory;

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn open(&self, endpoint_url: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(endpoint_url)
            .await
            .map_err(|err| TransportError::ConnectionRefused(err.to_string()))?;
        let (sink, source) = stream.split();
        Ok(Box::new(WebSocketTransport { sink: Mutex::new(sink), source: Mutex::new(source) }))
    }
}

/// Split sink/stream halves behind their own locks so `send` (heartbeat loop)
/// and `recv` (receive loop) never block each other.
pub struct WebSocketTransport {
    sink: Mutex<Sink>,
    source: Mutex<Source>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame.to_string())).await.map_err(|err| TransportError::IoError(err.to_string()))
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut source = self.source.lock().await;
        loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(bytes))) => {
                    return String::from_utf8(bytes).map_err(|err| TransportError::IoError(err.to_string()));
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(TransportError::ClosedByPeer {
                        code: frame.as_ref().map(|f| f.code.into()),
                        reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                    });
                }
                None => return Err(TransportError::ClosedByPeer { code: None, reason: String::new() }),
                Some(Ok(_)) => continue, // ping/pong/frame: handled by tungstenite, nothing to surface
                Some(Err(err)) => return Err(TransportError::IoError(err.to_string())),
            }
        }
    }

    async fn close(&self, code: Option<u16>, reason: &str) -> Result<(), TransportError> {
        let close_frame = code.map(|code| tokio_tungstenite::tungstenite::protocol::CloseFrame {
            code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::from(code),
            reason: reason.to_string().into(),
        });
        let mut sink = self.sink.lock().await;
        match sink.send(Message::Close(close_frame)).await {
            Ok(()) | Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(err) => Err(TransportError::IoError(err.to_string())),
        }
    }
}
