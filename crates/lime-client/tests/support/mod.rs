//! In-memory transport double for channel tests.
//!
//! Mirrors the protocol's request/response rhythm: envelopes queued with
//! [`TestTransport::queue_inbound`] represent the server's next replies.
//! A reply moves onto the wire when the channel sends (or when the
//! encryption upgrade completes) and is delivered once an envelope
//! listener is installed, like the real reader task, which parks with
//! bytes buffered while the channel has its listener detached.
//! Unsolicited envelopes can be pushed with [`TestTransport::feed`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use lime_transport::{EnvelopeListener, StateListener, Transport, TransportError};
use lime_wire::{Envelope, SessionCompression, SessionEncryption};

#[derive(Clone, Default)]
pub struct TestTransport {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    sent: Mutex<Vec<Envelope>>,
    /// The server's scripted replies, not yet on the wire.
    next_inbound: Mutex<VecDeque<Envelope>>,
    /// Arrived but not yet delivered (no listener installed).
    wire: Mutex<VecDeque<Envelope>>,
    envelope_listener: Mutex<Option<Arc<dyn EnvelopeListener>>>,
    state_listener: Mutex<Option<Arc<dyn StateListener>>>,
    encryption: Mutex<Option<SessionEncryption>>,
}

impl TestTransport {
    pub fn new() -> Self {
        TestTransport::default()
    }

    /// Queue a reply the server sends after the channel's next send.
    pub fn queue_inbound(&self, envelope: Envelope) {
        self.inner.next_inbound.lock().unwrap().push_back(envelope);
    }

    /// Deliver an envelope to the installed listener right away.
    pub fn feed(&self, envelope: Envelope) -> Result<(), TransportError> {
        let listener = self.listener().ok_or_else(|| {
            TransportError::InvalidState("no envelope listener installed".to_string())
        })?;
        listener.on_receive(envelope)
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.inner.sent.lock().unwrap().clone()
    }

    pub fn has_envelope_listener(&self) -> bool {
        self.inner.envelope_listener.lock().unwrap().is_some()
    }

    /// Simulate a transport failure: `on_exception`, then `on_closed`.
    pub fn raise_exception(&self, error: &TransportError) {
        let listener = self.inner.state_listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener.on_exception(error);
            listener.on_closed();
        }
    }

    fn listener(&self) -> Option<Arc<dyn EnvelopeListener>> {
        self.inner.envelope_listener.lock().unwrap().clone()
    }

    /// The server speaks: its next scripted reply reaches the wire.
    fn advance_script(&self) {
        let next = self.inner.next_inbound.lock().unwrap().pop_front();
        if let Some(envelope) = next {
            self.inner.wire.lock().unwrap().push_back(envelope);
        }
        self.flush_wire();
    }

    /// Deliver arrived envelopes while a listener is installed.
    fn flush_wire(&self) {
        loop {
            let Some(listener) = self.listener() else { return };
            let Some(envelope) = self.inner.wire.lock().unwrap().pop_front() else {
                return;
            };
            listener
                .on_receive(envelope)
                .expect("inbound dispatch failed");
        }
    }
}

impl Transport for TestTransport {
    async fn open(&self, _uri: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.inner.sent.lock().unwrap().push(envelope);
        self.advance_script();
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let listener = self.inner.state_listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener.on_closing();
            listener.on_closed();
        }
        Ok(())
    }

    async fn set_encryption(&self, encryption: SessionEncryption) -> Result<(), TransportError> {
        *self.inner.encryption.lock().unwrap() = Some(encryption);
        // The server speaks next once the handshake completes.
        self.advance_script();
        Ok(())
    }

    fn encryption(&self) -> SessionEncryption {
        self.inner
            .encryption
            .lock()
            .unwrap()
            .unwrap_or(SessionEncryption::None)
    }

    fn supported_encryption(&self) -> &'static [SessionEncryption] {
        &[SessionEncryption::None, SessionEncryption::Tls]
    }

    fn set_compression(&self, compression: SessionCompression) -> Result<(), TransportError> {
        match compression {
            SessionCompression::None => Ok(()),
            other => Err(TransportError::InvalidArgument(format!(
                "unsupported compression '{other:?}'"
            ))),
        }
    }

    fn compression(&self) -> SessionCompression {
        SessionCompression::None
    }

    fn supported_compression(&self) -> &'static [SessionCompression] {
        &[SessionCompression::None]
    }

    fn set_envelope_listener(&self, listener: Option<Arc<dyn EnvelopeListener>>) {
        let installed = listener.is_some();
        *self.inner.envelope_listener.lock().unwrap() = listener;
        if installed {
            self.flush_wire();
        }
    }

    fn set_state_listener(&self, listener: Option<Arc<dyn StateListener>>) {
        *self.inner.state_listener.lock().unwrap() = listener;
    }
}
