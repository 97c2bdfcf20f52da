use std::fmt;
use std::time::Duration;

use lime_transport::TransportError;
use lime_wire::SessionState;

/// Error raised by channel and client-channel operations.
#[derive(Debug)]
pub enum ChannelError {
    /// The operation is not allowed in the current session state.
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    /// The transport reported `on_closed`; the channel is unusable.
    TransportClosed,
    /// The transport reported `on_exception`; the channel is unusable.
    TransportFaulted(String),
    /// A transport operation failed.
    Transport(TransportError),
    /// The bounded wait for a send or a session response expired.
    Timeout(Duration),
    /// The server moved the handshake to a state the driver cannot
    /// progress from.
    UnexpectedSessionState(SessionState),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::InvalidState { operation, state } => {
                write!(f, "cannot {operation} in the '{state}' session state")
            }
            ChannelError::TransportClosed => write!(f, "the transport is closed"),
            ChannelError::TransportFaulted(description) => {
                write!(f, "the transport failed: {description}")
            }
            ChannelError::Transport(e) => write!(f, "transport: {e}"),
            ChannelError::Timeout(duration) => {
                write!(f, "timed out after {}ms", duration.as_millis())
            }
            ChannelError::UnexpectedSessionState(state) => {
                write!(f, "unexpected '{state}' session state from the server")
            }
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for ChannelError {
    fn from(e: TransportError) -> Self {
        ChannelError::Transport(e)
    }
}
