//! The reference transport binding: STOMP frames over a TCP socket,
//! optionally upgraded to TLS (feature `tls`).

use super::{ConnectOptions, ServerAddr, SslMode, Transport, TransportError, TransportReader, TransportWriter};
use crate::codec::StompCodec;
use crate::frame::Frame;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

/// Either a plain TCP stream or one wrapped in a TLS session, behind a
/// single `AsyncRead + AsyncWrite` face so `Framed<_, StompCodec>` never
/// has to know which it got. Mirrors the shape `tokio-tungstenite`'s own
/// `MaybeTlsStream` gives the WebSocket binding in this crate.
enum MaybeTlsStream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls")]
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// STOMP over TCP, framed with [`StompCodec`].
///
/// Mirrors this crate's `Connection` type: a buffered stream plus a
/// decode buffer, except here the buffering and incremental parsing are
/// delegated entirely to `tokio_util::codec::Framed`. Used unsplit only
/// for the CONNECT/CONNECTED handshake; [`Transport::split`] then hands
/// the connection manager an independent sink and stream so a parked
/// read never blocks a writer.
pub struct TcpTransport {
    framed: Framed<MaybeTlsStream, StompCodec>,
}

/// The read half of a split [`TcpTransport`], owned outright by the listener loop.
pub struct TcpReader {
    stream: SplitStream<Framed<MaybeTlsStream, StompCodec>>,
}

/// The write half of a split [`TcpTransport`], shared by every frame writer.
pub struct TcpWriter {
    sink: SplitSink<Framed<MaybeTlsStream, StompCodec>, Frame>,
}

impl Transport for TcpTransport {
    type Reader = TcpReader;
    type Writer = TcpWriter;

    async fn connect(addr: &ServerAddr, options: &ConnectOptions) -> Result<Self, TransportError> {
        let stream = timeout(options.timeout, TcpStream::connect((addr.host.as_str(), addr.port)))
            .await
            .map_err(|_| TransportError::ConnectTimeout { addr: addr.clone() })?
            .map_err(|err| TransportError::ConnectFailed {
                addr: addr.clone(),
                reason: err.to_string(),
            })?;

        stream.set_nodelay(true).ok();

        let stream = Self::maybe_upgrade_tls(stream, addr, &options.ssl, options.timeout).await?;

        Ok(Self {
            framed: Framed::with_capacity(
                stream,
                StompCodec::with_strict_unknown_commands(options.strict_unknown_commands),
                options.read_max_chunk_size,
            ),
        })
    }

    async fn close(&mut self) {
        use tokio::io::AsyncWriteExt;
        let _ = self.framed.get_mut().shutdown().await;
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.framed.send(frame.clone()).await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        self.framed.next().await.ok_or(TransportError::ClosedByPeer)?
    }

    fn split(self) -> (TcpReader, TcpWriter) {
        let (sink, stream) = self.framed.split();
        (TcpReader { stream }, TcpWriter { sink })
    }
}

impl TransportReader for TcpReader {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        self.stream.next().await.ok_or(TransportError::ClosedByPeer)?
    }
}

impl TransportWriter for TcpWriter {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.sink.send(frame.clone()).await?;
        Ok(())
    }

    async fn write_heartbeat(&mut self) -> Result<(), TransportError> {
        self.sink.send(Frame::Heartbeat).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

impl TcpTransport {
    #[cfg(feature = "tls")]
    async fn maybe_upgrade_tls(
        stream: TcpStream,
        addr: &ServerAddr,
        ssl: &SslMode,
        connect_timeout: std::time::Duration,
    ) -> Result<MaybeTlsStream, TransportError> {
        use tokio_rustls::rustls::pki_types::ServerName;
        use tokio_rustls::rustls::ClientConfig;
        use tokio_rustls::TlsConnector;

        let config = match ssl {
            SslMode::Disabled => return Ok(MaybeTlsStream::Plain(stream)),
            SslMode::Custom(config) => config.clone(),
            SslMode::Default => {
                let mut roots = tokio_rustls::rustls::RootCertStore::empty();
                roots.extend(
                    rustls_native_certs::load_native_certs()
                        .certs
                        .into_iter(),
                );
                std::sync::Arc::new(ClientConfig::builder().with_root_certificates(roots).with_no_client_auth())
            }
        };

        let server_name = ServerName::try_from(addr.host.clone()).map_err(|_| TransportError::ConnectFailed {
            addr: addr.clone(),
            reason: "invalid DNS name for TLS SNI".to_string(),
        })?;

        let connector = TlsConnector::from(config);
        let tls_stream = timeout(connect_timeout, connector.connect(server_name, stream))
            .await
            .map_err(|_| TransportError::ConnectTimeout { addr: addr.clone() })?
            .map_err(|err| TransportError::ConnectFailed {
                addr: addr.clone(),
                reason: format!("TLS handshake failed: {err}"),
            })?;

        Ok(MaybeTlsStream::Tls(Box::new(tls_stream)))
    }

    #[cfg(not(feature = "tls"))]
    async fn maybe_upgrade_tls(
        stream: TcpStream,
        addr: &ServerAddr,
        ssl: &SslMode,
        _connect_timeout: std::time::Duration,
    ) -> Result<MaybeTlsStream, TransportError> {
        match ssl {
            SslMode::Disabled => Ok(MaybeTlsStream::Plain(stream)),
            SslMode::Default => Err(TransportError::ConnectFailed {
                addr: addr.clone(),
                reason: "TLS requested but this build was compiled without the `tls` feature".to_string(),
            }),
        }
    }
}
