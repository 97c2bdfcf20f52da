//! State-aware envelope channel over one transport.
//!
//! The channel enforces which operations are legal in each session
//! state, demultiplexes inbound envelopes to typed subscribers, and
//! carries the session identity (id, remote node, local node) that the
//! handshake driver fills in.
//!
//! Subscribers come in two shapes: a bag of long-lived listeners and a
//! queue of one-shot listeners per envelope kind. A delivery invokes the
//! bag and drains the whole one-shot queue. Session listeners are
//! different: a FIFO where each inbound session envelope pops and
//! invokes exactly one listener.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, OnceLock, Weak};

use serde_json::Value;
use tokio::sync::oneshot;

use lime_transport::{EnvelopeListener, StateListener, Transport, TransportError};
use lime_wire::{
    Command, CommandMethod, CommandStatus, Envelope, MediaType, Message, Node, Notification,
    Session, SessionState,
};

use crate::error::ChannelError;

const PING_URI: &str = "/ping";

/// Behaviour toggles for the channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Backfill missing `from`/`to` on inbound envelopes from the
    /// session's remote and local nodes.
    pub fill_envelope_recipients: bool,
    /// Answer protocol pings without surfacing them to subscribers.
    pub auto_reply_pings: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            fill_envelope_recipients: false,
            auto_reply_pings: true,
        }
    }
}

/// Identifies a registered listener for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

/// A channel over one transport, which it owns for its whole lifetime.
pub struct ChannelBase<T: Transport> {
    inner: Arc<ChannelInner<T>>,
}

impl<T: Transport> ChannelBase<T> {
    pub fn new(transport: T, config: ChannelConfig) -> Self {
        let inner = Arc::new(ChannelInner {
            transport,
            config,
            state: StdMutex::new(ChannelState {
                session_state: SessionState::New,
                session_id: None,
                remote_node: None,
                local_node: None,
                transport_closed: false,
                transport_failure: None,
            }),
            registries: StdMutex::new(Registries::new()),
            envelope_listener: OnceLock::new(),
        });
        let state_listener: Arc<dyn StateListener> = Arc::new(ChannelStateListener {
            inner: Arc::downgrade(&inner),
        });
        inner.transport.set_state_listener(Some(state_listener));
        ChannelBase { inner }
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.lock().unwrap().session_state
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.state.lock().unwrap().session_id.clone()
    }

    pub fn remote_node(&self) -> Option<Node> {
        self.inner.state.lock().unwrap().remote_node.clone()
    }

    pub fn local_node(&self) -> Option<Node> {
        self.inner.state.lock().unwrap().local_node.clone()
    }

    /// Send a message. Legal only in the established state.
    pub async fn send_message(&self, message: Message) -> Result<(), ChannelError> {
        self.inner.check_transport_listener()?;
        self.inner.require_established("send a message")?;
        self.inner.send(Envelope::Message(message)).await
    }

    /// Send a command. Legal only in the established state.
    pub async fn send_command(&self, command: Command) -> Result<(), ChannelError> {
        self.inner.check_transport_listener()?;
        self.inner.require_established("send a command")?;
        self.inner.send(Envelope::Command(command)).await
    }

    /// Send a notification. Legal only in the established state.
    pub async fn send_notification(&self, notification: Notification) -> Result<(), ChannelError> {
        self.inner.check_transport_listener()?;
        self.inner.require_established("send a notification")?;
        self.inner.send(Envelope::Notification(notification)).await
    }

    /// Send a session envelope. Legal in every state but the terminal
    /// ones.
    pub async fn send_session(&self, session: Session) -> Result<(), ChannelError> {
        self.inner.check_transport_listener()?;
        let state = self.state();
        if state.is_terminal() {
            return Err(ChannelError::InvalidState {
                operation: "send a session",
                state,
            });
        }
        self.inner.send(Envelope::Session(session)).await
    }

    pub fn add_message_listener(
        &self,
        listener: impl Fn(&Message) + Send + Sync + 'static,
        once: bool,
    ) -> Result<ListenerHandle, ChannelError> {
        self.add_listener(|registries| &mut registries.messages, listener, once)
    }

    pub fn remove_message_listener(&self, handle: ListenerHandle) -> bool {
        self.inner.registries.lock().unwrap().messages.remove(handle)
    }

    pub fn add_command_listener(
        &self,
        listener: impl Fn(&Command) + Send + Sync + 'static,
        once: bool,
    ) -> Result<ListenerHandle, ChannelError> {
        self.add_listener(|registries| &mut registries.commands, listener, once)
    }

    pub fn remove_command_listener(&self, handle: ListenerHandle) -> bool {
        self.inner.registries.lock().unwrap().commands.remove(handle)
    }

    pub fn add_notification_listener(
        &self,
        listener: impl Fn(&Notification) + Send + Sync + 'static,
        once: bool,
    ) -> Result<ListenerHandle, ChannelError> {
        self.add_listener(|registries| &mut registries.notifications, listener, once)
    }

    pub fn remove_notification_listener(&self, handle: ListenerHandle) -> bool {
        self.inner
            .registries
            .lock()
            .unwrap()
            .notifications
            .remove(handle)
    }

    /// Append a one-shot session listener. Each inbound session envelope
    /// pops and invokes the head of this queue.
    pub fn enqueue_session_listener(
        &self,
        listener: Box<dyn FnOnce(Session) + Send>,
    ) -> Result<(), ChannelError> {
        self.inner.check_transport_listener()?;
        self.inner
            .registries
            .lock()
            .unwrap()
            .sessions
            .push_back(listener);
        self.install_envelope_listener();
        Ok(())
    }

    /// Close the underlying transport.
    pub async fn close(&self) -> Result<(), ChannelError> {
        self.inner
            .transport
            .close()
            .await
            .map_err(ChannelError::Transport)
    }

    fn add_listener<E>(
        &self,
        select: impl FnOnce(&mut Registries) -> &mut ListenerSet<E>,
        listener: impl Fn(&E) + Send + Sync + 'static,
        once: bool,
    ) -> Result<ListenerHandle, ChannelError> {
        self.inner.check_transport_listener()?;
        let handle = {
            let mut registries = self.inner.registries.lock().unwrap();
            let handle = registries.next_handle();
            select(&mut registries).insert(handle, Arc::new(listener), once);
            handle
        };
        self.install_envelope_listener();
        Ok(handle)
    }

    fn install_envelope_listener(&self) {
        let listener = self
            .inner
            .envelope_listener
            .get_or_init(|| {
                Arc::new(ChannelEnvelopeListener {
                    inner: Arc::downgrade(&self.inner),
                })
            })
            .clone();
        self.inner.transport.set_envelope_listener(Some(listener));
    }

    /// Enqueue a session listener that applies the inbound session to
    /// the channel state and resolves the returned receiver.
    pub(crate) fn enqueue_session_oneshot(
        &self,
    ) -> Result<oneshot::Receiver<Session>, ChannelError> {
        let weak = Arc::downgrade(&self.inner);
        let (tx, rx) = oneshot::channel();
        self.enqueue_session_listener(Box::new(move |session| {
            if let Some(inner) = weak.upgrade() {
                inner.apply_session(&session);
            }
            let _ = tx.send(session);
        }))?;
        Ok(rx)
    }

    pub(crate) fn set_session_state(&self, state: SessionState) {
        self.inner.state.lock().unwrap().session_state = state;
    }

    /// The error describing why no session response can arrive anymore.
    pub(crate) fn transport_failure_error(&self) -> ChannelError {
        let state = self.inner.state.lock().unwrap();
        match &state.transport_failure {
            Some(failure) => ChannelError::TransportFaulted(failure.clone()),
            None => ChannelError::TransportClosed,
        }
    }
}

struct ChannelState {
    session_state: SessionState,
    session_id: Option<String>,
    remote_node: Option<Node>,
    local_node: Option<Node>,
    transport_closed: bool,
    transport_failure: Option<String>,
}

struct ChannelInner<T: Transport> {
    transport: T,
    config: ChannelConfig,
    state: StdMutex<ChannelState>,
    registries: StdMutex<Registries>,
    envelope_listener: OnceLock<Arc<ChannelEnvelopeListener<T>>>,
}

impl<T: Transport> ChannelInner<T> {
    fn check_transport_listener(&self) -> Result<(), ChannelError> {
        let state = self.state.lock().unwrap();
        if let Some(failure) = &state.transport_failure {
            return Err(ChannelError::TransportFaulted(failure.clone()));
        }
        if state.transport_closed {
            return Err(ChannelError::TransportClosed);
        }
        Ok(())
    }

    fn require_established(&self, operation: &'static str) -> Result<(), ChannelError> {
        let state = self.state.lock().unwrap().session_state;
        if state != SessionState::Established {
            return Err(ChannelError::InvalidState { operation, state });
        }
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<(), ChannelError> {
        self.transport
            .send(envelope)
            .await
            .map_err(ChannelError::Transport)
    }

    fn handle_envelope(inner: &Arc<Self>, mut envelope: Envelope) -> Result<(), TransportError> {
        if inner.config.fill_envelope_recipients {
            inner.fill_incoming(&mut envelope);
        }
        match envelope {
            Envelope::Session(session) => {
                inner.raise_session(session);
                Ok(())
            }
            Envelope::Message(message) => inner.raise_message(message),
            Envelope::Notification(notification) => inner.raise_notification(notification),
            Envelope::Command(command) => Self::raise_command(inner, command),
        }
    }

    /// Backfill `from` from the remote node and `to` from the local
    /// node when the sender omitted them.
    fn fill_incoming(&self, envelope: &mut Envelope) {
        let (remote, local) = {
            let state = self.state.lock().unwrap();
            (state.remote_node.clone(), state.local_node.clone())
        };
        if let Some(remote) = remote {
            backfill(envelope.from_mut(), remote);
        }
        if let Some(local) = local {
            backfill(envelope.to_mut(), local);
        }
    }

    fn ensure_receiving(&self, kind: &str) -> Result<(), TransportError> {
        let state = self.state.lock().unwrap().session_state;
        if state != SessionState::Established {
            return Err(TransportError::InvalidState(format!(
                "cannot receive a {kind} in the '{state}' session state"
            )));
        }
        Ok(())
    }

    fn raise_message(&self, message: Message) -> Result<(), TransportError> {
        self.ensure_receiving("message")?;
        let listeners = self.registries.lock().unwrap().messages.drain_for_delivery();
        for listener in listeners {
            (*listener)(&message);
        }
        Ok(())
    }

    fn raise_notification(&self, notification: Notification) -> Result<(), TransportError> {
        self.ensure_receiving("notification")?;
        let listeners = self
            .registries
            .lock()
            .unwrap()
            .notifications
            .drain_for_delivery();
        for listener in listeners {
            (*listener)(&notification);
        }
        Ok(())
    }

    fn raise_command(inner: &Arc<Self>, command: Command) -> Result<(), TransportError> {
        inner.ensure_receiving("command")?;
        if inner.config.auto_reply_pings && is_ping_request(&command) {
            let response = ping_response(&command);
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                if let Err(error) = inner.transport.send(Envelope::Command(response)).await {
                    tracing::warn!(target: "lime::channel", %error, "failed to answer a ping");
                }
            });
            return Ok(());
        }
        let listeners = inner.registries.lock().unwrap().commands.drain_for_delivery();
        for listener in listeners {
            (*listener)(&command);
        }
        Ok(())
    }

    fn raise_session(&self, session: Session) {
        {
            let state = self.state.lock().unwrap();
            if state.session_state != SessionState::Established {
                // The driver re-installs the listener when it enqueues
                // the listener for the next handshake phase.
                self.transport.set_envelope_listener(None);
            }
        }
        let listener = self.registries.lock().unwrap().sessions.pop_front();
        match listener {
            Some(listener) => listener(session),
            None => tracing::debug!(
                target: "lime::channel",
                state = %session.state,
                "no session listener enqueued, dropping session envelope"
            ),
        }
    }

    fn apply_session(&self, session: &Session) {
        let mut state = self.state.lock().unwrap();
        if state.session_id.is_none() {
            state.session_id = session.id.clone();
        }
        state.session_state = session.state;
        match session.state {
            SessionState::Established => {
                state.remote_node = session.from.clone();
                state.local_node = session.to.clone();
            }
            SessionState::Failed => {
                state.remote_node = None;
                state.local_node = None;
            }
            _ => {}
        }
    }

    fn on_transport_closed(&self) {
        self.state.lock().unwrap().transport_closed = true;
        self.drop_session_listeners();
    }

    fn on_transport_exception(&self, error: &TransportError) {
        {
            let mut state = self.state.lock().unwrap();
            state.transport_failure = Some(error.to_string());
            if matches!(error, TransportError::Io(_)) {
                state.session_state = SessionState::Failed;
                state.session_id = None;
                state.remote_node = None;
                state.local_node = None;
            }
        }
        self.drop_session_listeners();
    }

    /// Dropping pending one-shot session listeners resolves their
    /// receivers with an error, failing any waiting driver call.
    fn drop_session_listeners(&self) {
        self.registries.lock().unwrap().sessions.clear();
    }
}

fn backfill(slot: &mut Option<Node>, source: Node) {
    match slot {
        Some(node) => {
            if node.domain.is_none() {
                node.domain = source.domain;
            }
        }
        None => *slot = Some(source),
    }
}

fn is_ping_request(command: &Command) -> bool {
    command.is_request()
        && command.method == CommandMethod::Get
        && !command.id.is_empty()
        && command
            .uri
            .as_deref()
            .is_some_and(|uri| uri.eq_ignore_ascii_case(PING_URI))
}

fn ping_response(request: &Command) -> Command {
    let mut response = Command::new(request.id.clone(), CommandMethod::Get);
    response.to = request.from.clone();
    response.status = Some(CommandStatus::Success);
    response.media_type = Some(MediaType::ping());
    response.resource = Some(Value::Object(Default::default()));
    response
}

struct Registries {
    next_id: u64,
    messages: ListenerSet<Message>,
    commands: ListenerSet<Command>,
    notifications: ListenerSet<Notification>,
    sessions: VecDeque<Box<dyn FnOnce(Session) + Send>>,
}

impl Registries {
    fn new() -> Self {
        Registries {
            next_id: 0,
            messages: ListenerSet::new(),
            commands: ListenerSet::new(),
            notifications: ListenerSet::new(),
            sessions: VecDeque::new(),
        }
    }

    fn next_handle(&mut self) -> ListenerHandle {
        self.next_id += 1;
        ListenerHandle(self.next_id)
    }
}

type SharedListener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct ListenerSet<E> {
    bag: Vec<(ListenerHandle, SharedListener<E>)>,
    one_shot: VecDeque<(ListenerHandle, SharedListener<E>)>,
}

impl<E> ListenerSet<E> {
    fn new() -> Self {
        ListenerSet {
            bag: Vec::new(),
            one_shot: VecDeque::new(),
        }
    }

    fn insert(&mut self, handle: ListenerHandle, listener: SharedListener<E>, once: bool) {
        if once {
            self.one_shot.push_back((handle, listener));
        } else {
            self.bag.push((handle, listener));
        }
    }

    fn remove(&mut self, handle: ListenerHandle) -> bool {
        if let Some(index) = self.bag.iter().position(|(h, _)| *h == handle) {
            self.bag.remove(index);
            return true;
        }
        if let Some(index) = self.one_shot.iter().position(|(h, _)| *h == handle) {
            self.one_shot.remove(index);
            return true;
        }
        false
    }

    /// Long-lived listeners plus every pending one-shot listener, which
    /// are consumed by the call.
    fn drain_for_delivery(&mut self) -> Vec<SharedListener<E>> {
        let mut listeners: Vec<SharedListener<E>> =
            self.bag.iter().map(|(_, l)| Arc::clone(l)).collect();
        listeners.extend(self.one_shot.drain(..).map(|(_, l)| l));
        listeners
    }
}

struct ChannelEnvelopeListener<T: Transport> {
    inner: Weak<ChannelInner<T>>,
}

impl<T: Transport> EnvelopeListener for ChannelEnvelopeListener<T> {
    fn on_receive(&self, envelope: Envelope) -> Result<(), TransportError> {
        match self.inner.upgrade() {
            Some(inner) => ChannelInner::handle_envelope(&inner, envelope),
            None => Ok(()),
        }
    }
}

struct ChannelStateListener<T: Transport> {
    inner: Weak<ChannelInner<T>>,
}

impl<T: Transport> StateListener for ChannelStateListener<T> {
    fn on_closed(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_transport_closed();
        }
    }

    fn on_exception(&self, error: &TransportError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_transport_exception(error);
        }
    }
}
