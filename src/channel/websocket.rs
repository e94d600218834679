//! `tokio-tungstenite` implementation of [`Transport`].

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::transport::{Connection, Frame, FrameSink, FrameSource, Transport};
use crate::error::SupervisorError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport that dials the supervisor over a real WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Creates the transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, uri: &str) -> Result<Connection, SupervisorError> {
        let (socket, response) = tokio_tungstenite::connect_async(uri).await?;
        tracing::debug!(uri, status = %response.status(), "websocket handshake complete");
        let (sink, stream) = socket.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsSource { stream })))
    }
}

struct WsSink {
    sink: SplitSink<Socket, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), SupervisorError> {
        self.sink.send(Message::text(text)).await?;
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), SupervisorError> {
        self.sink.send(Message::Ping(Default::default())).await?;
        Ok(())
    }

    async fn close(&mut self, reason: &str) -> Result<(), SupervisorError> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: reason.to_owned().into(),
        };
        self.sink.send(Message::Close(Some(frame))).await?;
        self.sink.close().await?;
        Ok(())
    }
}

struct WsSource {
    stream: SplitStream<Socket>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn receive(&mut self) -> Result<Frame, SupervisorError> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Err(SupervisorError::ConnectionClosed(None));
            };
            // tungstenite reassembles continuation frames itself.
            match message? {
                Message::Text(text) => {
                    return Ok(Frame::Text {
                        payload: text.as_str().to_owned(),
                        fin: true,
                    });
                }
                Message::Binary(data) => {
                    return Ok(Frame::Text {
                        payload: String::from_utf8_lossy(&data).into_owned(),
                        fin: true,
                    });
                }
                Message::Ping(_) | Message::Pong(_) => return Ok(Frame::KeepAlive),
                Message::Close(frame) => {
                    return Ok(Frame::Close(
                        frame.map(|frame| frame.reason.as_str().to_owned()),
                    ));
                }
                Message::Frame(_) => {}
            }
        }
    }
}
