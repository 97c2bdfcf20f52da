//! TCP transport with a dedicated reader task.
//!
//! The handle ([`TcpTransport`]) and the reader task communicate over a
//! command channel: writes, the TLS upgrade and shutdown are commands
//! acknowledged via oneshots, so the task is the only owner of the
//! socket and the input buffer, and outbound writes are serialized
//! without a separate lock. Inbound envelopes are parsed and delivered
//! to the installed listener on the reader task, strictly in arrival
//! order.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use lime_wire::{serializer, Envelope, SessionCompression, SessionEncryption};

use crate::error::TransportError;
use crate::framing::{EnvelopeBuffer, FramingError};
use crate::transport::{
    DataOperation, EnvelopeListener, StateListener, TraceWriter, Transport,
};

pub const DEFAULT_BUFFER_SIZE: usize = 8192;

const SUPPORTED_ENCRYPTION: &[SessionEncryption] =
    &[SessionEncryption::None, SessionEncryption::Tls];
const SUPPORTED_COMPRESSION: &[SessionCompression] = &[SessionCompression::None];

#[derive(Clone)]
pub struct TcpTransportConfig {
    /// Capacity of the input buffer; one envelope must fit entirely.
    pub buffer_size: usize,
    /// TLS client configuration for the in-band upgrade. When absent, a
    /// configuration trusting the webpki roots is built on first use.
    pub tls: Option<Arc<ClientConfig>>,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        TcpTransportConfig {
            buffer_size: DEFAULT_BUFFER_SIZE,
            tls: None,
        }
    }
}

/// A LIME transport over TCP, with optional in-band TLS upgrade.
pub struct TcpTransport {
    config: TcpTransportConfig,
    trace_writer: Option<Arc<dyn TraceWriter>>,
    shared: Arc<Shared>,
    link: Mutex<Link>,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        TcpTransport {
            config,
            trace_writer: None,
            shared: Arc::new(Shared {
                envelope_listener: StdMutex::new(None),
                state_listener: StdMutex::new(None),
                listener_installed: Notify::new(),
                closed: AtomicBool::new(false),
                encryption: StdMutex::new(SessionEncryption::None),
            }),
            link: Mutex::new(Link::Closed),
        }
    }

    pub fn with_trace_writer(mut self, trace_writer: Arc<dyn TraceWriter>) -> Self {
        self.trace_writer = Some(trace_writer);
        self
    }

    async fn command(&self, command: Command) -> Result<(), TransportError> {
        let link = self.link.lock().await;
        let Link::Open { cmd_tx, .. } = &*link else {
            return Err(TransportError::invalid_state("the transport is not open"));
        };
        cmd_tx
            .send(command)
            .map_err(|_| TransportError::invalid_state("the transport is not open"))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        TcpTransport::new(TcpTransportConfig::default())
    }
}

impl Transport for TcpTransport {
    async fn open(&self, uri: &str) -> Result<(), TransportError> {
        let (host, port) = parse_net_tcp_uri(uri)?;
        let mut link = self.link.lock().await;
        if matches!(*link, Link::Open { .. }) {
            return Err(TransportError::invalid_state("the transport is already open"));
        }
        let stream = TcpStream::connect((host.as_str(), port)).await?;
        tracing::debug!(target: "lime::transport", %host, port, "connected");

        self.shared.closed.store(false, Ordering::SeqCst);
        *self.shared.encryption.lock().unwrap() = SessionEncryption::None;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let reader = Reader {
            shared: Arc::clone(&self.shared),
            io: Stream::Plain(stream),
            buffer: EnvelopeBuffer::with_capacity(self.config.buffer_size),
            cmd_rx,
            host,
            tls: self.config.tls.clone(),
            trace_writer: self.trace_writer.clone(),
        };
        *link = Link::Open {
            cmd_tx,
            reader: tokio::spawn(reader.run()),
        };
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let document = serializer::serialize(&envelope)?;
        if let Some(trace_writer) = &self.trace_writer {
            if trace_writer.is_enabled() {
                trace_writer.trace(&document, DataOperation::Send);
            }
        }
        let (ack, ack_rx) = oneshot::channel();
        self.command(Command::Send { document, ack }).await?;
        ack_rx
            .await
            .map_err(|_| TransportError::invalid_state("the transport is not open"))?
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut link = self.link.lock().await;
        let Link::Open { cmd_tx, reader } = std::mem::replace(&mut *link, Link::Closed) else {
            return Ok(());
        };
        if !self.shared.closed.load(Ordering::SeqCst) {
            self.shared.notify_closing();
        }
        let (ack, ack_rx) = oneshot::channel();
        let _ = cmd_tx.send(Command::Shutdown { ack });
        let _ = ack_rx.await;
        let _ = reader.await;
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.shared.notify_closed();
        }
        Ok(())
    }

    async fn set_encryption(&self, encryption: SessionEncryption) -> Result<(), TransportError> {
        if encryption == self.encryption() {
            return Ok(());
        }
        match encryption {
            SessionEncryption::None => Err(TransportError::invalid_argument(
                "encryption cannot be disabled on an upgraded connection",
            )),
            SessionEncryption::Tls => {
                let (ack, ack_rx) = oneshot::channel();
                self.command(Command::StartTls { ack }).await?;
                ack_rx
                    .await
                    .map_err(|_| TransportError::invalid_state("the transport is not open"))??;
                *self.shared.encryption.lock().unwrap() = SessionEncryption::Tls;
                Ok(())
            }
        }
    }

    fn encryption(&self) -> SessionEncryption {
        *self.shared.encryption.lock().unwrap()
    }

    fn supported_encryption(&self) -> &'static [SessionEncryption] {
        SUPPORTED_ENCRYPTION
    }

    fn set_compression(&self, compression: SessionCompression) -> Result<(), TransportError> {
        match compression {
            SessionCompression::None => Ok(()),
            other => Err(TransportError::invalid_argument(format!(
                "unsupported compression '{other:?}'"
            ))),
        }
    }

    fn compression(&self) -> SessionCompression {
        SessionCompression::None
    }

    fn supported_compression(&self) -> &'static [SessionCompression] {
        SUPPORTED_COMPRESSION
    }

    fn set_envelope_listener(&self, listener: Option<Arc<dyn EnvelopeListener>>) {
        let installed = listener.is_some();
        *self.shared.envelope_listener.lock().unwrap() = listener;
        if installed {
            self.shared.listener_installed.notify_one();
        }
    }

    fn set_state_listener(&self, listener: Option<Arc<dyn StateListener>>) {
        *self.shared.state_listener.lock().unwrap() = listener;
    }
}

struct Shared {
    envelope_listener: StdMutex<Option<Arc<dyn EnvelopeListener>>>,
    state_listener: StdMutex<Option<Arc<dyn StateListener>>>,
    /// Wakes the reader when an envelope listener is installed.
    listener_installed: Notify,
    /// Whether `on_closed` has been signalled for this connection.
    closed: AtomicBool,
    encryption: StdMutex<SessionEncryption>,
}

impl Shared {
    fn envelope_listener(&self) -> Option<Arc<dyn EnvelopeListener>> {
        self.envelope_listener.lock().unwrap().clone()
    }

    fn has_envelope_listener(&self) -> bool {
        self.envelope_listener.lock().unwrap().is_some()
    }

    fn state_listener(&self) -> Option<Arc<dyn StateListener>> {
        self.state_listener.lock().unwrap().clone()
    }

    fn notify_closing(&self) {
        if let Some(listener) = self.state_listener() {
            listener.on_closing();
        }
    }

    fn notify_closed(&self) {
        if let Some(listener) = self.state_listener() {
            listener.on_closed();
        }
    }

    fn notify_exception(&self, error: &TransportError) {
        if let Some(listener) = self.state_listener() {
            listener.on_exception(error);
        }
    }
}

enum Link {
    Closed,
    Open {
        cmd_tx: mpsc::UnboundedSender<Command>,
        reader: JoinHandle<()>,
    },
}

enum Command {
    Send {
        document: String,
        ack: oneshot::Sender<Result<(), TransportError>>,
    },
    StartTls {
        ack: oneshot::Sender<Result<(), TransportError>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

struct Reader {
    shared: Arc<Shared>,
    io: Stream,
    buffer: EnvelopeBuffer,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    host: String,
    tls: Option<Arc<ClientConfig>>,
    trace_writer: Option<Arc<dyn TraceWriter>>,
}

impl Reader {
    async fn run(mut self) {
        loop {
            if self.shared.has_envelope_listener() {
                if let Err(error) = self.drain() {
                    self.fail(error);
                    return;
                }
            }
            // Re-checked after draining: dispatch may detach the
            // listener, in which case reading pauses with the remaining
            // bytes buffered.
            let parked = !self.shared.has_envelope_listener();
            if !parked {
                if let Err(e) = self.buffer.ensure_room() {
                    let capacity = self.buffer.capacity();
                    self.fail(framing_error(e, capacity));
                    return;
                }
            }

            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None => return,
                        Some(Command::Shutdown { ack }) => {
                            self.io = Stream::Closed;
                            let _ = ack.send(());
                            return;
                        }
                        Some(Command::Send { document, ack }) => {
                            match write_document(&mut self.io, &document).await {
                                Ok(()) => {
                                    let _ = ack.send(Ok(()));
                                }
                                Err(e) => {
                                    let error = TransportError::Io(e);
                                    self.io = Stream::Closed;
                                    self.announce_failure(&error);
                                    let _ = ack.send(Err(error));
                                    return;
                                }
                            }
                        }
                        Some(Command::StartTls { ack }) => {
                            match self.upgrade().await {
                                Ok(()) => {
                                    let _ = ack.send(Ok(()));
                                }
                                Err(error) => {
                                    self.io = Stream::Closed;
                                    self.announce_failure(&error);
                                    let _ = ack.send(Err(error));
                                    return;
                                }
                            }
                        }
                    }
                }

                _ = self.shared.listener_installed.notified(), if parked => {}

                result = read_some(&mut self.io, &mut self.buffer), if !parked => {
                    match result {
                        Ok(0) => {
                            if self.buffer.has_pending() {
                                self.fail(TransportError::Io(io::Error::new(
                                    io::ErrorKind::UnexpectedEof,
                                    "connection closed mid-envelope",
                                )));
                            } else {
                                tracing::debug!(
                                    target: "lime::transport",
                                    "connection closed by peer"
                                );
                                self.io = Stream::Closed;
                                if !self.shared.closed.swap(true, Ordering::SeqCst) {
                                    self.shared.notify_closed();
                                }
                            }
                            return;
                        }
                        Ok(n) => self.buffer.commit(n),
                        Err(e) => {
                            self.fail(TransportError::Io(e));
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Parse and deliver every complete envelope currently buffered.
    fn drain(&mut self) -> Result<(), TransportError> {
        loop {
            let Some(listener) = self.shared.envelope_listener() else {
                return Ok(());
            };
            let capacity = self.buffer.capacity();
            let Some(bytes) = self
                .buffer
                .next_document()
                .map_err(|e| framing_error(e, capacity))?
            else {
                return Ok(());
            };
            let document = std::str::from_utf8(bytes)
                .map_err(|_| TransportError::Framing("envelope is not valid utf-8".into()))?;
            if let Some(trace_writer) = &self.trace_writer {
                if trace_writer.is_enabled() {
                    trace_writer.trace(document, DataOperation::Receive);
                }
            }
            let envelope = serializer::deserialize(document)?;
            listener.on_receive(envelope)?;
        }
    }

    /// Replace the plaintext socket with a TLS session on the same
    /// connection. The handshake must start at an envelope boundary
    /// with nothing buffered past it.
    async fn upgrade(&mut self) -> Result<(), TransportError> {
        if matches!(self.io, Stream::Tls(_)) {
            return Ok(());
        }
        if self.buffer.has_pending() {
            return Err(TransportError::invalid_state(
                "plaintext bytes are buffered past the last envelope",
            ));
        }
        let server_name = ServerName::try_from(self.host.clone()).map_err(|_| {
            TransportError::invalid_argument(format!("invalid server name '{}'", self.host))
        })?;
        let Stream::Plain(tcp) = std::mem::replace(&mut self.io, Stream::Closed) else {
            return Err(TransportError::invalid_state("the transport is not open"));
        };
        let config = self.tls.clone().unwrap_or_else(default_tls_config);
        let stream = TlsConnector::from(config)
            .connect(server_name, tcp)
            .await
            .map_err(TransportError::Io)?;
        tracing::debug!(target: "lime::transport", host = %self.host, "tls established");
        self.io = Stream::Tls(Box::new(stream));
        Ok(())
    }

    fn fail(&mut self, error: TransportError) {
        tracing::warn!(target: "lime::transport", %error, "transport failed");
        self.io = Stream::Closed;
        self.announce_failure(&error);
    }

    fn announce_failure(&self, error: &TransportError) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.shared.notify_exception(error);
            self.shared.notify_closed();
        }
    }
}

async fn read_some(io: &mut Stream, buffer: &mut EnvelopeBuffer) -> io::Result<usize> {
    use tokio::io::AsyncReadExt;
    io.read(buffer.writable()).await
}

async fn write_document(io: &mut Stream, document: &str) -> io::Result<()> {
    io.write_all(document.as_bytes()).await?;
    io.flush().await
}

fn framing_error(error: FramingError, capacity: usize) -> TransportError {
    match error {
        FramingError::Overflow { .. } => TransportError::BufferOverflow { capacity },
        FramingError::UnexpectedByte { byte } => TransportError::Framing(format!(
            "unexpected byte 0x{byte:02x} between envelopes"
        )),
    }
}

fn default_tls_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// Parse a `net.tcp://host:port[/...]` URI.
fn parse_net_tcp_uri(uri: &str) -> Result<(String, u16), TransportError> {
    let rest = uri.strip_prefix("net.tcp://").ok_or_else(|| {
        TransportError::invalid_argument(format!(
            "unsupported uri scheme in '{uri}', expected net.tcp"
        ))
    })?;
    let authority = rest.split('/').next().unwrap_or(rest);
    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| TransportError::invalid_argument(format!("missing port in '{uri}'")))?;
    if host.is_empty() {
        return Err(TransportError::invalid_argument(format!(
            "missing host in '{uri}'"
        )));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| TransportError::invalid_argument(format!("invalid port in '{uri}'")))?;
    Ok((host.to_string(), port))
}

/// The connection, before or after the TLS upgrade.
enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Closed,
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Stream::Closed => Poll::Ready(Err(io::ErrorKind::NotConnected.into())),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Stream::Closed => Poll::Ready(Err(io::ErrorKind::NotConnected.into())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Stream::Closed => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Stream::Closed => Poll::Ready(Ok(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_net_tcp() {
        assert_eq!(
            parse_net_tcp_uri("net.tcp://example.org:55321").unwrap(),
            ("example.org".to_string(), 55321)
        );
        assert_eq!(
            parse_net_tcp_uri("net.tcp://127.0.0.1:9000/path").unwrap(),
            ("127.0.0.1".to_string(), 9000)
        );
    }

    #[test]
    fn parse_rejects_other_schemes() {
        for uri in ["http://example.org:80", "tcp://x:1", "example.org:55321"] {
            assert!(matches!(
                parse_net_tcp_uri(uri),
                Err(TransportError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn parse_rejects_malformed_authorities() {
        for uri in ["net.tcp://example.org", "net.tcp://:1", "net.tcp://h:x"] {
            assert!(matches!(
                parse_net_tcp_uri(uri),
                Err(TransportError::InvalidArgument(_))
            ));
        }
    }
}
