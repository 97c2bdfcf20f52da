use std::fmt;
use std::io;

use lime_wire::SerializationError;

/// Error raised by transport operations and reported to state listeners.
#[derive(Debug)]
pub enum TransportError {
    /// A parameter was rejected: wrong URI scheme, unsupported
    /// encryption value, bad server name.
    InvalidArgument(String),
    /// The operation is not allowed while the transport is in its
    /// current state (not open, already open, already closed).
    InvalidState(String),
    /// An inbound envelope did not fit the configured input buffer.
    BufferOverflow {
        capacity: usize,
    },
    /// An envelope document could not be produced or parsed.
    Serialization(SerializationError),
    /// The byte stream broke the framing grammar: a non-whitespace byte
    /// between documents, or a document that is not valid UTF-8.
    Framing(String),
    Io(io::Error),
}

impl TransportError {
    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        TransportError::InvalidState(message.into())
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        TransportError::InvalidArgument(message.into())
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e)
    }
}

impl From<SerializationError> for TransportError {
    fn from(e: SerializationError) -> Self {
        TransportError::Serialization(e)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::InvalidArgument(message) => {
                write!(f, "invalid argument: {message}")
            }
            TransportError::InvalidState(message) => write!(f, "invalid state: {message}"),
            TransportError::BufferOverflow { capacity } => {
                write!(f, "envelope exceeds the {capacity}-byte input buffer")
            }
            TransportError::Serialization(e) => write!(f, "serialization: {e}"),
            TransportError::Framing(message) => write!(f, "framing: {message}"),
            TransportError::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Serialization(e) => Some(e),
            TransportError::Io(e) => Some(e),
            _ => None,
        }
    }
}
