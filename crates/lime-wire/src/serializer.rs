//! Document-level JSON conversion for envelopes.
//!
//! Serialization is mostly derived, with one exception: the session
//! `authentication` field has a scheme-dependent shape, so it is detached
//! from the typed model, the rest of the document is converted, and the
//! field is re-parsed according to `scheme` and re-attached.

use std::fmt;

use serde_json::{Map, Value};

use crate::authentication::{Authentication, AuthenticationScheme, PlainAuthentication};
use crate::command::Command;
use crate::envelope::Envelope;
use crate::message::Message;
use crate::notification::Notification;
use crate::session::Session;

/// Serialize an envelope to its wire document.
pub fn serialize(envelope: &Envelope) -> Result<String, SerializationError> {
    let value = match envelope {
        Envelope::Message(m) => serde_json::to_value(m)?,
        Envelope::Notification(n) => serde_json::to_value(n)?,
        Envelope::Command(c) => serde_json::to_value(c)?,
        Envelope::Session(s) => session_to_value(s)?,
    };
    Ok(serde_json::to_string(&value)?)
}

/// Parse a wire document into an envelope.
///
/// Exactly one of the discriminating fields (`content`, `event`,
/// `method`, `state`) must be present.
pub fn deserialize(document: &str) -> Result<Envelope, SerializationError> {
    let value: Value = serde_json::from_str(document)?;
    let Value::Object(map) = value else {
        return Err(SerializationError::NotAnObject);
    };

    let discriminators = [
        map.contains_key("content"),
        map.contains_key("event"),
        map.contains_key("method"),
        map.contains_key("state"),
    ];
    match discriminators.iter().filter(|present| **present).count() {
        0 => return Err(SerializationError::MissingDiscriminator),
        1 => {}
        _ => return Err(SerializationError::AmbiguousDiscriminator),
    }

    let envelope = if discriminators[0] {
        Envelope::Message(serde_json::from_value::<Message>(Value::Object(map))?)
    } else if discriminators[1] {
        Envelope::Notification(serde_json::from_value::<Notification>(Value::Object(map))?)
    } else if discriminators[2] {
        Envelope::Command(serde_json::from_value::<Command>(Value::Object(map))?)
    } else {
        Envelope::Session(session_from_map(map)?)
    };
    Ok(envelope)
}

fn session_to_value(session: &Session) -> Result<Value, SerializationError> {
    let mut value = serde_json::to_value(session)?;
    if let Some(authentication) = &session.authentication {
        let map = value
            .as_object_mut()
            .expect("a struct serializes to an object");
        map.insert(
            "scheme".to_string(),
            serde_json::to_value(authentication.scheme())?,
        );
        map.insert(
            "authentication".to_string(),
            authentication_payload(authentication)?,
        );
    }
    Ok(value)
}

fn authentication_payload(authentication: &Authentication) -> Result<Value, SerializationError> {
    match authentication {
        Authentication::Plain(plain) => Ok(serde_json::to_value(plain)?),
        Authentication::Guest | Authentication::Transport => Ok(Value::Object(Map::new())),
    }
}

fn session_from_map(mut map: Map<String, Value>) -> Result<Session, SerializationError> {
    let scheme = map.remove("scheme");
    let payload = map.remove("authentication");

    let mut session: Session = serde_json::from_value(Value::Object(map))?;
    if let Some(scheme) = scheme {
        let scheme: AuthenticationScheme = serde_json::from_value(scheme)?;
        session.authentication = Some(match scheme {
            AuthenticationScheme::Guest => Authentication::Guest,
            AuthenticationScheme::Transport => Authentication::Transport,
            AuthenticationScheme::Plain => {
                let plain: PlainAuthentication =
                    serde_json::from_value(payload.unwrap_or(Value::Object(Map::new())))?;
                Authentication::Plain(plain)
            }
        });
    }
    Ok(session)
}

/// A wire document could not be produced or understood.
#[derive(Debug)]
pub enum SerializationError {
    Json(serde_json::Error),
    /// The document is valid JSON but not an object.
    NotAnObject,
    /// None of `content`, `event`, `method`, `state` is present.
    MissingDiscriminator,
    /// More than one discriminating field is present.
    AmbiguousDiscriminator,
}

impl From<serde_json::Error> for SerializationError {
    fn from(e: serde_json::Error) -> Self {
        SerializationError::Json(e)
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::Json(e) => write!(f, "json: {e}"),
            SerializationError::NotAnObject => write!(f, "envelope document is not an object"),
            SerializationError::MissingDiscriminator => {
                write!(f, "document matches no envelope kind")
            }
            SerializationError::AmbiguousDiscriminator => {
                write!(f, "document matches more than one envelope kind")
            }
        }
    }
}

impl std::error::Error for SerializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SerializationError::Json(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandMethod;
    use crate::node::Node;
    use crate::notification::NotificationEvent;
    use crate::session::{SessionCompression, SessionEncryption, SessionState};
    use serde_json::json;

    fn roundtrip(envelope: Envelope) -> Envelope {
        let document = serialize(&envelope).unwrap();
        deserialize(&document).unwrap()
    }

    #[test]
    fn message_roundtrip_preserves_fields() {
        let mut message = Message::plain_text("hello");
        message.id = Some("1".to_string());
        message.to = Some(Node::parse("a@b/c").unwrap());
        let envelope = Envelope::Message(message);
        assert_eq!(roundtrip(envelope.clone()), envelope);
    }

    #[test]
    fn null_fields_are_omitted() {
        let document = serialize(&Envelope::Message(Message::plain_text("hi"))).unwrap();
        assert_eq!(document, r#"{"type":"text/plain","content":"hi"}"#);
    }

    #[test]
    fn discriminator_selects_the_variant() {
        let message = deserialize(r#"{"type":"text/plain","content":"x"}"#).unwrap();
        assert!(matches!(message, Envelope::Message(_)));

        let notification = deserialize(r#"{"id":"1","event":"received"}"#).unwrap();
        let Envelope::Notification(n) = notification else {
            panic!("expected a notification");
        };
        assert_eq!(n.event, NotificationEvent::Received);

        let command = deserialize(r#"{"id":"1","method":"get","uri":"/ping"}"#).unwrap();
        assert!(matches!(command, Envelope::Command(_)));

        let session = deserialize(r#"{"id":"s1","state":"negotiating"}"#).unwrap();
        let Envelope::Session(s) = session else {
            panic!("expected a session");
        };
        assert_eq!(s.state, SessionState::Negotiating);
    }

    #[test]
    fn unmatched_document_fails() {
        assert!(matches!(
            deserialize(r#"{"id":"1"}"#),
            Err(SerializationError::MissingDiscriminator)
        ));
        assert!(matches!(
            deserialize(r#"{"event":"received","state":"new"}"#),
            Err(SerializationError::AmbiguousDiscriminator)
        ));
        assert!(matches!(
            deserialize("[1,2]"),
            Err(SerializationError::NotAnObject)
        ));
    }

    #[test]
    fn session_authentication_travels_by_scheme() {
        let mut session = Session::with_state(SessionState::Authenticating);
        session.id = Some("s1".to_string());
        session.from = Some(Node::parse("u@d/h1").unwrap());
        session.authentication = Some(Authentication::plain("pw"));

        let document = serialize(&Envelope::Session(session.clone())).unwrap();
        let value: Value = serde_json::from_str(&document).unwrap();
        assert_eq!(value["scheme"], json!("plain"));
        assert_eq!(value["authentication"], json!({"password": "cHc="}));

        let Envelope::Session(back) = deserialize(&document).unwrap() else {
            panic!("expected a session");
        };
        assert_eq!(back, session);
    }

    #[test]
    fn guest_authentication_is_an_empty_object() {
        let mut session = Session::with_state(SessionState::Authenticating);
        session.authentication = Some(Authentication::Guest);
        let document = serialize(&Envelope::Session(session.clone())).unwrap();
        let value: Value = serde_json::from_str(&document).unwrap();
        assert_eq!(value["scheme"], json!("guest"));
        assert_eq!(value["authentication"], json!({}));

        let Envelope::Session(back) = deserialize(&document).unwrap() else {
            panic!("expected a session");
        };
        assert_eq!(back, session);
    }

    #[test]
    fn negotiation_options_roundtrip() {
        let mut session = Session::with_state(SessionState::Negotiating);
        session.id = Some("s1".to_string());
        session.encryption_options =
            Some(vec![SessionEncryption::None, SessionEncryption::Tls]);
        session.compression_options = Some(vec![SessionCompression::None]);
        let envelope = Envelope::Session(session);
        assert_eq!(roundtrip(envelope.clone()), envelope);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let envelope =
            deserialize(r#"{"state":"new","futureField":123,"id":"s1"}"#).unwrap();
        assert!(matches!(envelope, Envelope::Session(_)));
    }

    #[test]
    fn command_roundtrip_with_resource() {
        let mut command = Command::new("c1", CommandMethod::Set);
        command.uri = Some("/presence".to_string());
        command.media_type = Some(crate::MediaType::new(
            "application/vnd.lime.presence+json",
        ));
        command.resource = Some(json!({"status": "available"}));
        let envelope = Envelope::Command(command);
        assert_eq!(roundtrip(envelope.clone()), envelope);
    }
}
