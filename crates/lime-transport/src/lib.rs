//! Framed TCP transport for the LIME protocol.
//!
//! The wire is a stream of concatenated JSON documents with no length
//! prefix; [`framing`] turns arbitrarily segmented reads back into whole
//! documents by bracket counting. [`TcpTransport`] runs a dedicated
//! reader task that owns the socket and the input buffer, delivers parsed
//! envelopes to an installed listener, and performs the in-band TLS
//! upgrade on the same connection when the session negotiates it.

mod error;
mod framing;
mod tcp;
mod transport;

pub use error::TransportError;
pub use framing::{EnvelopeBuffer, FramingError};
pub use tcp::{TcpTransport, TcpTransportConfig, DEFAULT_BUFFER_SIZE};
pub use transport::{
    DataOperation, EnvelopeListener, StateListener, TraceWriter, TracingTraceWriter, Transport,
};
