//! Integration tests driving `TcpTransport` against a loopback server.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use lime_transport::{
    DataOperation, EnvelopeListener, StateListener, TcpTransport, TcpTransportConfig,
    TraceWriter, Transport, TransportError,
};
use lime_wire::{serializer, Envelope, Message, SessionCompression, SessionEncryption};

struct CollectListener {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EnvelopeListener for CollectListener {
    fn on_receive(&self, envelope: Envelope) -> Result<(), TransportError> {
        let _ = self.tx.send(envelope);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StateEvent {
    Closing,
    Closed,
    Exception(String),
}

struct RecordStates {
    tx: mpsc::UnboundedSender<StateEvent>,
}

impl StateListener for RecordStates {
    fn on_closing(&self) {
        let _ = self.tx.send(StateEvent::Closing);
    }

    fn on_closed(&self) {
        let _ = self.tx.send(StateEvent::Closed);
    }

    fn on_exception(&self, error: &TransportError) {
        let _ = self.tx.send(StateEvent::Exception(error.to_string()));
    }
}

#[derive(Default)]
struct RecordingTraceWriter {
    entries: Mutex<Vec<(DataOperation, String)>>,
}

impl TraceWriter for RecordingTraceWriter {
    fn trace(&self, data: &str, operation: DataOperation) {
        self.entries
            .lock()
            .unwrap()
            .push((operation, data.to_string()));
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

fn message_envelope(id: &str, text: &str) -> Envelope {
    let mut message = Message::plain_text(text);
    message.id = Some(id.to_string());
    Envelope::Message(message)
}

/// Serve a fixed byte script: write each chunk with a short gap, then
/// hold the connection open (or close it) depending on `close_after`.
async fn serve_bytes(chunks: Vec<Vec<u8>>, close_after: bool) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        for chunk in chunks {
            socket.write_all(&chunk).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        if close_after {
            drop(socket);
        } else {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
    });
    addr
}

fn split_into_chunks(bytes: &[u8], parts: usize) -> Vec<Vec<u8>> {
    let size = bytes.len().div_ceil(parts);
    bytes.chunks(size).map(<[u8]>::to_vec).collect()
}

async fn open_with_listeners(
    addr: SocketAddr,
) -> (
    TcpTransport,
    mpsc::UnboundedReceiver<Envelope>,
    mpsc::UnboundedReceiver<StateEvent>,
) {
    let transport = TcpTransport::default();
    let (env_tx, env_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = mpsc::unbounded_channel();
    transport.set_envelope_listener(Some(Arc::new(CollectListener { tx: env_tx })));
    transport.set_state_listener(Some(Arc::new(RecordStates { tx: state_tx })));
    transport
        .open(&format!("net.tcp://127.0.0.1:{}", addr.port()))
        .await
        .unwrap();
    (transport, env_rx, state_rx)
}

async fn recv_envelope(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for an envelope")
        .expect("envelope stream ended")
}

async fn recv_state(rx: &mut mpsc::UnboundedReceiver<StateEvent>) -> StateEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a state event")
        .expect("state stream ended")
}

#[tokio::test]
async fn delivers_envelopes_in_order_across_chunked_reads() {
    let envelopes: Vec<Envelope> = (0..8)
        .map(|i| message_envelope(&format!("m{i}"), &format!("payload {i}")))
        .collect();
    let mut wire = String::new();
    for (i, envelope) in envelopes.iter().enumerate() {
        wire.push_str(&serializer::serialize(envelope).unwrap());
        if i % 2 == 0 {
            wire.push_str(" \r\n");
        }
    }
    let chunks = split_into_chunks(wire.as_bytes(), 25);
    let addr = serve_bytes(chunks, false).await;

    let (transport, mut env_rx, mut state_rx) = open_with_listeners(addr).await;
    for expected in &envelopes {
        assert_eq!(&recv_envelope(&mut env_rx).await, expected);
    }
    transport.close().await.unwrap();
    assert_eq!(recv_state(&mut state_rx).await, StateEvent::Closing);
    assert_eq!(recv_state(&mut state_rx).await, StateEvent::Closed);
}

#[tokio::test]
async fn oversized_envelope_overflows_and_closes() {
    // One byte larger than the default buffer.
    let text = "x".repeat(8192);
    let wire = serializer::serialize(&message_envelope("big", &text)).unwrap();
    assert!(wire.len() > 8192);
    let addr = serve_bytes(split_into_chunks(wire.as_bytes(), 4), false).await;

    let (_transport, mut env_rx, mut state_rx) = open_with_listeners(addr).await;
    let StateEvent::Exception(description) = recv_state(&mut state_rx).await else {
        panic!("expected an exception event");
    };
    assert!(description.contains("8192"), "got: {description}");
    assert_eq!(recv_state(&mut state_rx).await, StateEvent::Closed);
    assert!(env_rx.try_recv().is_err(), "no envelope should be delivered");
}

#[tokio::test]
async fn open_rejects_unknown_scheme() {
    let transport = TcpTransport::default();
    let error = transport.open("http://example.org:80").await.unwrap_err();
    assert!(matches!(error, TransportError::InvalidArgument(_)));
}

#[tokio::test]
async fn open_twice_is_invalid_state() {
    let addr = serve_bytes(Vec::new(), false).await;
    let transport = TcpTransport::default();
    let uri = format!("net.tcp://127.0.0.1:{}", addr.port());
    transport.open(&uri).await.unwrap();
    assert!(matches!(
        transport.open(&uri).await,
        Err(TransportError::InvalidState(_))
    ));
    transport.close().await.unwrap();
}

#[tokio::test]
async fn send_requires_open_transport() {
    let transport = TcpTransport::default();
    assert!(matches!(
        transport.send(message_envelope("1", "hi")).await,
        Err(TransportError::InvalidState(_))
    ));
}

#[tokio::test]
async fn send_writes_the_document_and_traces() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (received_tx, mut received_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut data = vec![0u8; 4096];
        let n = socket.read(&mut data).await.unwrap();
        data.truncate(n);
        let _ = received_tx.send(data);
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let trace_writer = Arc::new(RecordingTraceWriter::default());
    let transport =
        TcpTransport::new(TcpTransportConfig::default()).with_trace_writer(trace_writer.clone());
    transport
        .open(&format!("net.tcp://127.0.0.1:{}", addr.port()))
        .await
        .unwrap();

    let envelope = message_envelope("m1", "hello");
    transport.send(envelope.clone()).await.unwrap();

    let written = timeout(Duration::from_secs(5), received_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let expected = serializer::serialize(&envelope).unwrap();
    assert_eq!(String::from_utf8(written).unwrap(), expected);

    let entries = trace_writer.entries.lock().unwrap().clone();
    assert_eq!(entries, vec![(DataOperation::Send, expected)]);
    transport.close().await.unwrap();
}

#[tokio::test]
async fn close_is_idempotent_and_signals_once() {
    let addr = serve_bytes(Vec::new(), false).await;
    let (transport, _env_rx, mut state_rx) = open_with_listeners(addr).await;
    transport.close().await.unwrap();
    transport.close().await.unwrap();
    assert_eq!(recv_state(&mut state_rx).await, StateEvent::Closing);
    assert_eq!(recv_state(&mut state_rx).await, StateEvent::Closed);
    assert!(state_rx.try_recv().is_err());
}

#[tokio::test]
async fn remote_close_reports_closed_without_exception() {
    let wire = serializer::serialize(&message_envelope("m1", "bye")).unwrap();
    let addr = serve_bytes(vec![wire.into_bytes()], true).await;
    let (_transport, mut env_rx, mut state_rx) = open_with_listeners(addr).await;
    recv_envelope(&mut env_rx).await;
    assert_eq!(recv_state(&mut state_rx).await, StateEvent::Closed);
}

#[tokio::test]
async fn garbage_between_envelopes_fails_the_transport() {
    let mut wire = serializer::serialize(&message_envelope("m1", "ok")).unwrap();
    wire.push_str("!!");
    let addr = serve_bytes(vec![wire.into_bytes()], false).await;
    let (_transport, mut env_rx, mut state_rx) = open_with_listeners(addr).await;
    recv_envelope(&mut env_rx).await;
    let StateEvent::Exception(description) = recv_state(&mut state_rx).await else {
        panic!("expected an exception event");
    };
    assert!(description.contains("framing"), "got: {description}");
    assert_eq!(recv_state(&mut state_rx).await, StateEvent::Closed);
}

#[tokio::test]
async fn buffers_without_delivering_until_listener_installed() {
    let wire = serializer::serialize(&message_envelope("m1", "early")).unwrap();
    let addr = serve_bytes(vec![wire.into_bytes()], false).await;

    let transport = TcpTransport::default();
    transport
        .open(&format!("net.tcp://127.0.0.1:{}", addr.port()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (env_tx, mut env_rx) = mpsc::unbounded_channel();
    transport.set_envelope_listener(Some(Arc::new(CollectListener { tx: env_tx })));
    let envelope = recv_envelope(&mut env_rx).await;
    assert_eq!(envelope.id(), Some("m1"));
    transport.close().await.unwrap();
}

#[tokio::test]
async fn encryption_surface_defaults() {
    let transport = TcpTransport::default();
    assert_eq!(transport.encryption(), SessionEncryption::None);
    assert_eq!(
        transport.supported_encryption(),
        &[SessionEncryption::None, SessionEncryption::Tls][..]
    );
    assert_eq!(
        transport.supported_compression(),
        &[SessionCompression::None][..]
    );
    // Re-setting the current value is a no-op even while closed.
    transport
        .set_encryption(SessionEncryption::None)
        .await
        .unwrap();
    assert!(matches!(
        transport.set_encryption(SessionEncryption::Tls).await,
        Err(TransportError::InvalidState(_))
    ));
    transport.set_compression(SessionCompression::None).unwrap();
    assert!(matches!(
        transport.set_compression(SessionCompression::Gzip),
        Err(TransportError::InvalidArgument(_))
    ));
}
