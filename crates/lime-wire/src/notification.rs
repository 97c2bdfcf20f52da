use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::session::Reason;

/// A delivery event about a previously sent message.
///
/// The notification `id` refers to the message it reports on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
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
    pub event: NotificationEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl Notification {
    pub fn new(event: NotificationEvent) -> Self {
        Notification {
            id: None,
            from: None,
            to: None,
            pp: None,
            metadata: None,
            event,
            reason: None,
        }
    }
}

/// Stages of the message delivery pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationEvent {
    Accepted,
    Dispatched,
    Received,
    Consumed,
    Failed,
}
