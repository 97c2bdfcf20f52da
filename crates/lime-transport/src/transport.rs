//! Transport abstraction and its observer contracts.
//!
//! [`TcpTransport`](crate::TcpTransport) is the production
//! implementation; channels are generic over [`Transport`] so tests can
//! drive them with an in-memory fake.

use std::future::Future;
use std::sync::Arc;

use lime_wire::{Envelope, SessionCompression, SessionEncryption};

use crate::error::TransportError;

/// An asynchronous duplex envelope stream.
///
/// A transport owns exactly one connection. Opening, sending and the
/// encryption upgrade are asynchronous; listener installation is not, so
/// it can be done from inside a dispatch callback.
pub trait Transport: Send + Sync + 'static {
    /// Connect to the given URI and start receiving.
    ///
    /// Fails with invalid-argument for unsupported schemes and with
    /// invalid-state if the transport is already open.
    fn open(&self, uri: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Serialize and write one envelope, flushing immediately.
    fn send(&self, envelope: Envelope) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Close the connection. Idempotent after the first call.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Change the transport encryption. Setting `tls` upgrades the
    /// connection in-band; re-setting the current value is a no-op.
    fn set_encryption(
        &self,
        encryption: SessionEncryption,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn encryption(&self) -> SessionEncryption;

    fn supported_encryption(&self) -> &'static [SessionEncryption];

    /// Change the payload compression. Only `none` is supported here;
    /// the compression dimension exists for option exchange.
    fn set_compression(&self, compression: SessionCompression) -> Result<(), TransportError>;

    fn compression(&self) -> SessionCompression;

    fn supported_compression(&self) -> &'static [SessionCompression];

    /// Install or clear the envelope observer. While no observer is
    /// installed the transport buffers without delivering.
    fn set_envelope_listener(&self, listener: Option<Arc<dyn EnvelopeListener>>);

    /// Install or clear the lifecycle observer.
    fn set_state_listener(&self, listener: Option<Arc<dyn StateListener>>);
}

/// Receives every inbound envelope, on the transport's reader task.
///
/// Returning an error is fatal to the transport: it escalates through
/// `on_exception` and the connection closes.
pub trait EnvelopeListener: Send + Sync {
    fn on_receive(&self, envelope: Envelope) -> Result<(), TransportError>;
}

/// Observes the transport lifecycle.
pub trait StateListener: Send + Sync {
    /// The transport is about to close.
    fn on_closing(&self) {}

    /// The connection is closed; no more envelopes will be delivered.
    fn on_closed(&self) {}

    /// A non-recoverable failure occurred. Always followed by
    /// `on_closed`.
    fn on_exception(&self, error: &TransportError) {
        let _ = error;
    }
}

/// Direction tag for wire traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOperation {
    Send,
    Receive,
}

/// Sink for raw wire documents, used for protocol debugging.
///
/// `is_enabled` is checked before formatting so disabled sinks cost
/// nothing on the hot path.
pub trait TraceWriter: Send + Sync {
    fn trace(&self, data: &str, operation: DataOperation);

    fn is_enabled(&self) -> bool;
}

/// A [`TraceWriter`] that emits wire documents as `tracing` debug events
/// on the `lime::wire` target.
#[derive(Debug, Default)]
pub struct TracingTraceWriter;

impl TraceWriter for TracingTraceWriter {
    fn trace(&self, data: &str, operation: DataOperation) {
        match operation {
            DataOperation::Send => {
                tracing::debug!(target: "lime::wire", direction = "send", data)
            }
            DataOperation::Receive => {
                tracing::debug!(target: "lime::wire", direction = "receive", data)
            }
        }
    }

    fn is_enabled(&self) -> bool {
        tracing::enabled!(target: "lime::wire", tracing::Level::DEBUG)
    }
}
