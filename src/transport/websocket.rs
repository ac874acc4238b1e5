//! WebSocket transport binding (feature `websocket`).
//!
//! STOMP frames are carried as text WebSocket messages, one frame (or
//! heartbeat) per message, matching the convention used by browser STOMP
//! clients and brokers that expose a `/ws` endpoint alongside raw TCP.

use super::{ConnectOptions, ServerAddr, Transport, TransportError, TransportReader, TransportWriter};
use crate::codec::FrameParser;
use crate::frame::Frame;
use bytes::BytesMut;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Used unsplit only for the CONNECT/CONNECTED handshake; [`Transport::split`]
/// then hands the connection manager an independent sink and stream.
pub struct WebSocketTransport {
    socket: WsStream,
    parser: FrameParser,
    pending: BytesMut,
}

/// The read half of a split [`WebSocketTransport`], owned outright by the listener loop.
pub struct WebSocketReader {
    stream: SplitStream<WsStream>,
    parser: FrameParser,
    pending: BytesMut,
}

/// The write half of a split [`WebSocketTransport`], shared by every frame writer.
pub struct WebSocketWriter {
    sink: SplitSink<WsStream, Message>,
}

impl Transport for WebSocketTransport {
    type Reader = WebSocketReader;
    type Writer = WebSocketWriter;

    async fn connect(addr: &ServerAddr, options: &ConnectOptions) -> Result<Self, TransportError> {
        let scheme = if addr.port == 443 { "wss" } else { "ws" };
        let path = addr.path.as_deref().unwrap_or("/");
        let url = format!("{scheme}://{}:{}{}", addr.host, addr.port, path);

        let (socket, _response) = timeout(options.timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| TransportError::ConnectTimeout { addr: addr.clone() })?
            .map_err(|err| TransportError::ConnectFailed {
                addr: addr.clone(),
                reason: err.to_string(),
            })?;

        Ok(Self {
            socket,
            parser: FrameParser::new().with_strict_unknown_commands(options.strict_unknown_commands),
            pending: BytesMut::new(),
        })
    }

    async fn close(&mut self) {
        let _ = self.socket.close(None).await;
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let mut buf = BytesMut::new();
        crate::codec::encode_frame(frame, &mut buf);
        send_text(&mut self.socket, buf).await
    }

    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        read_frame_from(&mut self.socket, &mut self.parser, &mut self.pending).await
    }

    fn split(self) -> (WebSocketReader, WebSocketWriter) {
        let (sink, stream) = self.socket.split();
        (
            WebSocketReader { stream, parser: self.parser, pending: self.pending },
            WebSocketWriter { sink },
        )
    }
}

impl TransportReader for WebSocketReader {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        read_frame_from(&mut self.stream, &mut self.parser, &mut self.pending).await
    }
}

impl TransportWriter for WebSocketWriter {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let mut buf = BytesMut::new();
        crate::codec::encode_frame(frame, &mut buf);
        send_text(&mut self.sink, buf).await
    }

    async fn write_heartbeat(&mut self) -> Result<(), TransportError> {
        send_text(&mut self.sink, BytesMut::from(&b"\n"[..])).await
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

async fn send_text<S>(sink: &mut S, buf: BytesMut) -> Result<(), TransportError>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = String::from_utf8_lossy(&buf).into_owned();
    sink.send(Message::Text(text)).await.map_err(|err| TransportError::WebSocket(err.to_string()))
}

async fn read_frame_from<S>(
    stream: &mut S,
    parser: &mut FrameParser,
    pending: &mut BytesMut,
) -> Result<Frame, TransportError>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        if let Some(frame) = parser.parse(pending)? {
            return Ok(frame);
        }
        match stream.next().await {
            Some(Ok(Message::Text(text))) => pending.extend_from_slice(text.as_bytes()),
            Some(Ok(Message::Binary(data))) => pending.extend_from_slice(&data),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return Err(TransportError::ClosedByPeer),
            Some(Ok(Message::Frame(_))) => continue,
            Some(Err(err)) => return Err(TransportError::WebSocket(err.to_string())),
        }
    }
}
