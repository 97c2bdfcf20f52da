use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::media_type::MediaType;
use crate::node::Node;
use crate::session::Reason;

/// A request/response envelope for querying and manipulating resources.
///
/// Requests carry a `method` and usually a `uri`; responses echo the
/// request `id` and carry a `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pp: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
    pub method: CommandMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CommandStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl Command {
    pub fn new(id: impl Into<String>, method: CommandMethod) -> Self {
        Command {
            id: id.into(),
            from: None,
            to: None,
            pp: None,
            metadata: None,
            method,
            uri: None,
            media_type: None,
            resource: None,
            status: None,
            reason: None,
        }
    }

    /// Whether this command is a request still awaiting a response.
    pub fn is_request(&self) -> bool {
        self.status.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandMethod {
    Get,
    Set,
    Delete,
    Subscribe,
    Unsubscribe,
    Observe,
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Success,
    Failure,
}
