use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::media_type::MediaType;
use crate::node::Node;

/// A content envelope addressed to another node.
///
/// The `content` document is opaque to the protocol; its format is
/// described by `media_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
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
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub content: Value,
}

impl Message {
    pub fn new(media_type: MediaType, content: Value) -> Self {
        Message {
            id: None,
            from: None,
            to: None,
            pp: None,
            metadata: None,
            media_type,
            content,
        }
    }

    /// A `text/plain` message with the given text.
    pub fn plain_text(text: impl Into<String>) -> Self {
        Message::new(MediaType::text_plain(), Value::String(text.into()))
    }
}
