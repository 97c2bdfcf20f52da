//! Envelope model and JSON wire format for the LIME protocol.
//!
//! LIME multiplexes four envelope kinds over one connection: messages,
//! notifications, commands and sessions. On the wire each envelope is a
//! single JSON object; the kind is determined by which discriminating
//! field is present (`content`, `event`, `method` or `state`), not by a
//! type tag. This crate defines the envelope types and the document-level
//! [`serializer`] that performs that discrimination.

mod authentication;
mod command;
mod envelope;
mod media_type;
mod message;
mod node;
mod notification;
mod session;

pub mod serializer;

pub use authentication::{Authentication, AuthenticationScheme, PlainAuthentication};
pub use command::{Command, CommandMethod, CommandStatus};
pub use envelope::{new_envelope_id, Envelope};
pub use media_type::MediaType;
pub use message::Message;
pub use node::{Identity, Node, NodeParseError};
pub use notification::{Notification, NotificationEvent};
pub use serializer::SerializationError;
pub use session::{Reason, Session, SessionCompression, SessionEncryption, SessionState};
