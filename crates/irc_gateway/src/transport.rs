//! Bidirectional byte channel over plain TCP or TLS (C2, §4.2).
//!
//! Line buffering happens here: `read_line` accumulates bytes until `irc_wire::parse_buf` can
//! drain a complete message, so callers above this layer only ever see whole `IrcMsg`s.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use irc_common::{Server, TlsMode};
use irc_wire::{parse_buf, serialize, IrcMsg, ParseError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::errors::TransportError;

fn tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().unwrap_or_default() {
        let _ = roots.add(cert);
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// A connected socket, plain or TLS. Large size difference between variants (TLS carries session
/// state) is why this is boxed rather than inlined.
enum Stream {
    Tcp(Box<TcpStream>),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// One connection's byte channel: a `Stream` plus the unparsed read-ahead buffer.
pub struct Transport {
    stream: Stream,
    read_buf: Vec<u8>,
    scratch: [u8; 4096],
}

impl Transport {
    /// Open `server`, performing the TLS handshake immediately when `server.tls == Required`.
    /// `Opportunistic` and `None` both start plain; opportunistic upgrade happens later via
    /// `upgrade_tls`.
    pub async fn connect(server: &Server) -> Result<Transport, TransportError> {
        let tcp = TcpStream::connect((server.host.as_str(), server.port))
            .await
            .map_err(TransportError::Connect)?;

        let stream = if server.tls == TlsMode::Required {
            Stream::Tls(Box::new(tls_handshake(tcp, &server.host).await?))
        } else {
            Stream::Tcp(Box::new(tcp))
        };

        Ok(Transport {
            stream,
            read_buf: Vec::new(),
            scratch: [0u8; 4096],
        })
    }

    /// Upgrade an already-open plain connection to TLS, for opportunistic mode. Any bytes
    /// already buffered in `read_buf` (received before the upgrade) are kept; the registration
    /// FSM is responsible for replaying messages parsed from them (§4.4).
    pub async fn upgrade_tls(self, host: &str) -> Result<Transport, TransportError> {
        let tcp = match self.stream {
            Stream::Tcp(tcp) => *tcp,
            Stream::Tls(_) => return Err(TransportError::Tls(already_tls_error())),
        };
        let tls = tls_handshake(tcp, host).await?;
        Ok(Transport {
            stream: Stream::Tls(Box::new(tls)),
            read_buf: self.read_buf,
            scratch: self.scratch,
        })
    }

    /// Serialize and write a message.
    pub async fn write(&mut self, msg: &IrcMsg) -> Result<(), TransportError> {
        let bytes = serialize(msg);
        self.stream
            .write_all(bytes.as_bytes())
            .await
            .map_err(TransportError::Io)
    }

    /// Block until one complete message can be parsed from the stream, reading more bytes as
    /// needed. A parse error on a line is reported but doesn't close the transport — the caller
    /// discards the line and keeps reading (§7: "the byte is discarded; the reader continues").
    pub async fn read_line(&mut self) -> Result<Result<IrcMsg, ParseError>, TransportError> {
        loop {
            if let Some(result) = parse_buf(&mut self.read_buf) {
                return Ok(result);
            }
            let n = self
                .stream
                .read(&mut self.scratch)
                .await
                .map_err(TransportError::Io)?;
            if n == 0 {
                return Err(TransportError::Eof);
            }
            self.read_buf.extend_from_slice(&self.scratch[..n]);
        }
    }

    /// Split into independent read/write halves once registration is done, so the reader task
    /// can block in `read_line` while a writer runs concurrently (§4.3). Any bytes already
    /// buffered in `read_buf` travel with the read half.
    pub fn into_split(self) -> (TransportReader, TransportWriter) {
        let (read_half, write_half) = tokio::io::split(self.stream);
        (
            TransportReader {
                read_half,
                read_buf: self.read_buf,
                scratch: self.scratch,
            },
            TransportWriter { write_half },
        )
    }
}

/// The read half of a split `Transport`. Exclusively owned by a connection's reader task.
pub struct TransportReader {
    read_half: tokio::io::ReadHalf<Stream>,
    read_buf: Vec<u8>,
    scratch: [u8; 4096],
}

impl TransportReader {
    pub async fn read_line(&mut self) -> Result<Result<IrcMsg, ParseError>, TransportError> {
        loop {
            if let Some(result) = parse_buf(&mut self.read_buf) {
                return Ok(result);
            }
            let n = self
                .read_half
                .read(&mut self.scratch)
                .await
                .map_err(TransportError::Io)?;
            if n == 0 {
                return Err(TransportError::Eof);
            }
            self.read_buf.extend_from_slice(&self.scratch[..n]);
        }
    }
}

/// The write half of a split `Transport`. Safe to call from any task concurrently with the
/// reader blocked in `TransportReader::read_line`.
pub struct TransportWriter {
    write_half: tokio::io::WriteHalf<Stream>,
}

impl TransportWriter {
    pub async fn write(&mut self, msg: &IrcMsg) -> Result<(), TransportError> {
        let bytes = serialize(msg);
        self.write_half
            .write_all(bytes.as_bytes())
            .await
            .map_err(TransportError::Io)
    }
}

async fn tls_handshake(tcp: TcpStream, host: &str) -> Result<TlsStream<TcpStream>, TransportError> {
    let server_name = host
        .to_string()
        .try_into()
        .map_err(|_| TransportError::Tls(invalid_dns_name_error(host)))?;
    tls_connector()
        .connect(server_name, tcp)
        .await
        .map_err(TransportError::Tls)
}

fn invalid_dns_name_error(host: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("not a valid DNS name: {host}"),
    )
}

fn already_tls_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, "transport is already TLS")
}
