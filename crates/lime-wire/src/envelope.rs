use std::collections::BTreeMap;

use uuid::Uuid;

use crate::command::Command;
use crate::message::Message;
use crate::node::Node;
use crate::notification::Notification;
use crate::session::Session;

/// Any envelope of the protocol.
///
/// The variant is determined at parse time by the discriminating field
/// present in the JSON document: `content` for messages, `event` for
/// notifications, `method` for commands, `state` for sessions.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Message(Message),
    Notification(Notification),
    Command(Command),
    Session(Session),
}

impl Envelope {
    pub fn id(&self) -> Option<&str> {
        match self {
            Envelope::Message(m) => m.id.as_deref(),
            Envelope::Notification(n) => n.id.as_deref(),
            Envelope::Command(c) => Some(&c.id),
            Envelope::Session(s) => s.id.as_deref(),
        }
    }

    pub fn from(&self) -> Option<&Node> {
        match self {
            Envelope::Message(m) => m.from.as_ref(),
            Envelope::Notification(n) => n.from.as_ref(),
            Envelope::Command(c) => c.from.as_ref(),
            Envelope::Session(s) => s.from.as_ref(),
        }
    }

    pub fn to(&self) -> Option<&Node> {
        match self {
            Envelope::Message(m) => m.to.as_ref(),
            Envelope::Notification(n) => n.to.as_ref(),
            Envelope::Command(c) => c.to.as_ref(),
            Envelope::Session(s) => s.to.as_ref(),
        }
    }

    pub fn pp(&self) -> Option<&Node> {
        match self {
            Envelope::Message(m) => m.pp.as_ref(),
            Envelope::Notification(n) => n.pp.as_ref(),
            Envelope::Command(c) => c.pp.as_ref(),
            Envelope::Session(s) => s.pp.as_ref(),
        }
    }

    pub fn metadata(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Envelope::Message(m) => m.metadata.as_ref(),
            Envelope::Notification(n) => n.metadata.as_ref(),
            Envelope::Command(c) => c.metadata.as_ref(),
            Envelope::Session(s) => s.metadata.as_ref(),
        }
    }

    pub fn from_mut(&mut self) -> &mut Option<Node> {
        match self {
            Envelope::Message(m) => &mut m.from,
            Envelope::Notification(n) => &mut n.from,
            Envelope::Command(c) => &mut c.from,
            Envelope::Session(s) => &mut s.from,
        }
    }

    pub fn to_mut(&mut self) -> &mut Option<Node> {
        match self {
            Envelope::Message(m) => &mut m.to,
            Envelope::Notification(n) => &mut n.to,
            Envelope::Command(c) => &mut c.to,
            Envelope::Session(s) => &mut s.to,
        }
    }
}

impl From<Message> for Envelope {
    fn from(value: Message) -> Self {
        Envelope::Message(value)
    }
}

impl From<Notification> for Envelope {
    fn from(value: Notification) -> Self {
        Envelope::Notification(value)
    }
}

impl From<Command> for Envelope {
    fn from(value: Command) -> Self {
        Envelope::Command(value)
    }
}

impl From<Session> for Envelope {
    fn from(value: Session) -> Self {
        Envelope::Session(value)
    }
}

/// A fresh unique envelope id.
pub fn new_envelope_id() -> String {
    Uuid::new_v4().to_string()
}
