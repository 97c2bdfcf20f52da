//! Client half of the session handshake.
//!
//! The driver sends a session envelope for the current phase, enqueues a
//! one-shot session listener, and awaits the server's reply under the
//! receive timeout. The server chooses the session id on its first
//! reply; every later outbound session envelope echoes it.
//!
//! ```text
//! NEW ──start_new_session──▶ {NEGOTIATING | AUTHENTICATING | FAILED}
//! NEGOTIATING ──negotiate_session──▶ {NEGOTIATING | AUTHENTICATING | FAILED}
//! AUTHENTICATING ──authenticate_session──▶ {ESTABLISHED | FAILED}
//! ESTABLISHED ──send_finishing_session──▶ FINISHING ──▶ {FINISHED | FAILED}
//! ```

use std::ops::Deref;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::timeout;

use lime_transport::Transport;
use lime_wire::{
    Authentication, Identity, Node, Notification, NotificationEvent, Session, SessionCompression,
    SessionEncryption, SessionState,
};

use crate::channel::{ChannelBase, ChannelConfig};
use crate::error::ChannelError;

/// Timeouts and channel behaviour for a client channel.
#[derive(Debug, Clone)]
pub struct ClientChannelConfig {
    pub channel: ChannelConfig,
    /// Bound on each outbound write.
    pub send_timeout: Duration,
    /// Bound on each wait for a session response.
    pub receive_timeout: Duration,
}

impl Default for ClientChannelConfig {
    fn default() -> Self {
        ClientChannelConfig {
            channel: ChannelConfig::default(),
            send_timeout: Duration::from_secs(10),
            receive_timeout: Duration::from_secs(30),
        }
    }
}

/// A channel with the client-side handshake operations.
pub struct ClientChannel<T: Transport> {
    channel: ChannelBase<T>,
    send_timeout: Duration,
    receive_timeout: Duration,
}

impl<T: Transport> ClientChannel<T> {
    pub fn new(transport: T, config: ClientChannelConfig) -> Self {
        ClientChannel {
            channel: ChannelBase::new(transport, config.channel),
            send_timeout: config.send_timeout,
            receive_timeout: config.receive_timeout,
        }
    }

    pub fn channel(&self) -> &ChannelBase<T> {
        &self.channel
    }

    /// Ask the server to open a session. Legal only in the `new` state.
    pub async fn start_new_session(&self) -> Result<Session, ChannelError> {
        self.require_state("start a new session", SessionState::New)?;
        let rx = self.channel.enqueue_session_oneshot()?;
        self.send_session_timed(Session::with_state(SessionState::New))
            .await?;
        self.await_session(rx).await
    }

    /// Offer the given options. Legal only in the `negotiating` state.
    pub async fn negotiate_session(
        &self,
        compression: SessionCompression,
        encryption: SessionEncryption,
    ) -> Result<Session, ChannelError> {
        self.require_state("negotiate the session", SessionState::Negotiating)?;
        let rx = self.channel.enqueue_session_oneshot()?;
        let mut session = Session::with_state(SessionState::Negotiating);
        session.id = self.channel.session_id();
        session.compression = Some(compression);
        session.encryption = Some(encryption);
        self.send_session_timed(session).await?;
        self.await_session(rx).await
    }

    /// Present credentials. Legal only in the `authenticating` state.
    pub async fn authenticate_session(
        &self,
        identity: Identity,
        authentication: Authentication,
        instance: Option<&str>,
    ) -> Result<Session, ChannelError> {
        self.require_state("authenticate the session", SessionState::Authenticating)?;
        let rx = self.channel.enqueue_session_oneshot()?;
        let mut session = Session::with_state(SessionState::Authenticating);
        session.id = self.channel.session_id();
        session.from = Some(identity.into_node(instance));
        session.authentication = Some(authentication);
        self.send_session_timed(session).await?;
        self.await_session(rx).await
    }

    /// Ask the server to finish the session. Legal only in the
    /// `established` state; the driver moves to `finishing` and the
    /// server answers with the closing session envelope.
    pub async fn send_finishing_session(&self) -> Result<(), ChannelError> {
        self.require_state("finish the session", SessionState::Established)?;
        let mut session = Session::with_state(SessionState::Finishing);
        session.id = self.channel.session_id();
        self.send_session_timed(session).await?;
        self.channel.set_session_state(SessionState::Finishing);
        Ok(())
    }

    /// Await the next inbound session envelope, applying it to the
    /// channel state.
    pub async fn receive_session(&self) -> Result<Session, ChannelError> {
        let rx = self.channel.enqueue_session_oneshot()?;
        self.await_session(rx).await
    }

    /// Await the server's closing session after
    /// [`send_finishing_session`](Self::send_finishing_session).
    pub async fn receive_finished_session(&self) -> Result<Session, ChannelError> {
        self.receive_session().await
    }

    /// Report a message as received to its sender.
    pub async fn send_received_notification(
        &self,
        message_id: &str,
        to: Node,
    ) -> Result<(), ChannelError> {
        let mut notification = Notification::new(NotificationEvent::Received);
        notification.id = Some(message_id.to_string());
        notification.to = Some(to);
        self.channel.send_notification(notification).await
    }

    /// Drive the whole handshake from `new` to the first terminal
    /// session (established or failed).
    ///
    /// Passing `none` for compression or encryption means "no
    /// preference": the first of the server's offered options that the
    /// transport supports is chosen. A concrete value is demanded
    /// verbatim. When the negotiated encryption differs from the
    /// transport's current one, the transport is upgraded in-band after
    /// the server confirms the negotiation.
    pub async fn establish_session(
        &self,
        compression: SessionCompression,
        encryption: SessionEncryption,
        identity: Identity,
        authentication: Authentication,
        instance: Option<&str>,
    ) -> Result<Session, ChannelError> {
        let mut session = self.start_new_session().await?;
        let mut negotiated = false;
        let mut chosen_encryption = encryption;
        loop {
            match session.state {
                SessionState::Negotiating if !negotiated => {
                    let chosen_compression = choose_option(
                        compression,
                        SessionCompression::None,
                        session.compression_options.as_deref(),
                        self.channel.transport().supported_compression(),
                    );
                    chosen_encryption = choose_option(
                        encryption,
                        SessionEncryption::None,
                        session.encryption_options.as_deref(),
                        self.channel.transport().supported_encryption(),
                    );
                    negotiated = true;
                    session = self
                        .negotiate_session(chosen_compression, chosen_encryption)
                        .await?;
                }
                SessionState::Negotiating => {
                    let confirmed = session.encryption.unwrap_or(chosen_encryption);
                    if confirmed != self.channel.transport().encryption() {
                        self.channel
                            .transport()
                            .set_encryption(confirmed)
                            .await
                            .map_err(ChannelError::Transport)?;
                    }
                    session = self.receive_session().await?;
                }
                SessionState::Authenticating => {
                    session = self
                        .authenticate_session(identity.clone(), authentication.clone(), instance)
                        .await?;
                }
                SessionState::Established | SessionState::Failed | SessionState::Finished => {
                    return Ok(session)
                }
                state => return Err(ChannelError::UnexpectedSessionState(state)),
            }
        }
    }

    fn require_state(
        &self,
        operation: &'static str,
        expected: SessionState,
    ) -> Result<(), ChannelError> {
        let state = self.channel.state();
        if state != expected {
            return Err(ChannelError::InvalidState { operation, state });
        }
        Ok(())
    }

    async fn send_session_timed(&self, session: Session) -> Result<(), ChannelError> {
        match timeout(self.send_timeout, self.channel.send_session(session)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(self.send_timeout)),
        }
    }

    async fn await_session(
        &self,
        rx: oneshot::Receiver<Session>,
    ) -> Result<Session, ChannelError> {
        match timeout(self.receive_timeout, rx).await {
            Ok(Ok(session)) => Ok(session),
            // The listener was dropped without firing: the transport
            // failed or closed while we waited.
            Ok(Err(_)) => Err(self.channel.transport_failure_error()),
            Err(_) => Err(ChannelError::Timeout(self.receive_timeout)),
        }
    }
}

impl<T: Transport> Deref for ClientChannel<T> {
    type Target = ChannelBase<T>;

    fn deref(&self) -> &ChannelBase<T> {
        &self.channel
    }
}

/// `no_preference` selects the first offered option the transport
/// supports; anything else is demanded verbatim.
fn choose_option<O: Copy + PartialEq>(
    requested: O,
    no_preference: O,
    offered: Option<&[O]>,
    supported: &[O],
) -> O {
    if requested != no_preference {
        return requested;
    }
    offered
        .and_then(|options| options.iter().copied().find(|o| supported.contains(o)))
        .unwrap_or(requested)
}
