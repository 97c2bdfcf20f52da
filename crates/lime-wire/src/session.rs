use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::authentication::{Authentication, AuthenticationScheme};
use crate::node::Node;

/// The envelope that drives the connection's state machine.
///
/// The `authentication` field is not part of the derived JSON shape: its
/// wire representation depends on the `scheme` field, so the document
/// serializer splices it in and out (see [`crate::serializer`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pp: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_options: Option<Vec<SessionEncryption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<SessionEncryption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_options: Option<Vec<SessionCompression>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<SessionCompression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme_options: Option<Vec<AuthenticationScheme>>,
    #[serde(skip)]
    pub authentication: Option<Authentication>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl Session {
    pub fn with_state(state: SessionState) -> Self {
        Session {
            id: None,
            from: None,
            to: None,
            pp: None,
            metadata: None,
            state,
            encryption_options: None,
            encryption: None,
            compression_options: None,
            compression: None,
            scheme_options: None,
            authentication: None,
            reason: None,
        }
    }
}

/// Lifecycle states of a session, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    New,
    Negotiating,
    Authenticating,
    Established,
    Finishing,
    Finished,
    Failed,
}

impl SessionState {
    /// Whether the session can still carry envelopes of any kind.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::New => "new",
            SessionState::Negotiating => "negotiating",
            SessionState::Authenticating => "authenticating",
            SessionState::Established => "established",
            SessionState::Finishing => "finishing",
            SessionState::Finished => "finished",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Negotiable payload compression. Only `none` has an implementation in
/// this crate; `gzip` exists for option exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionCompression {
    None,
    Gzip,
}

/// Negotiable transport encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEncryption {
    None,
    Tls,
}

/// A failure description attached to sessions, notifications and command
/// responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{description} (code {})", self.code),
            None => write!(f, "code {}", self.code),
        }
    }
}
