//! Node and identity addressing.
//!
//! A node is written `name@domain/instance`, where `name` and `/instance`
//! are optional. An identity is the `name@domain` pair without the
//! instance.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An addressable node of the network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub instance: Option<String>,
}

impl Node {
    /// Parse a node from its `name@domain/instance` form.
    pub fn parse(s: &str) -> Result<Self, NodeParseError> {
        s.parse()
    }

    /// The `name@domain` pair, when both parts are present.
    pub fn to_identity(&self) -> Option<Identity> {
        match (&self.name, &self.domain) {
            (Some(name), Some(domain)) => Some(Identity {
                name: name.clone(),
                domain: domain.clone(),
            }),
            _ => None,
        }
    }
}

impl FromStr for Node {
    type Err = NodeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(NodeParseError::new(s));
        }
        let (name, rest) = match s.split_once('@') {
            Some((name, rest)) => (non_empty(name), rest),
            None => (None, s),
        };
        let (domain, instance) = match rest.split_once('/') {
            Some((domain, instance)) => (non_empty(domain), non_empty(instance)),
            None => (non_empty(rest), None),
        };
        if name.is_none() && domain.is_none() {
            return Err(NodeParseError::new(s));
        }
        Ok(Node {
            name,
            domain,
            instance,
        })
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, &self.domain) {
            (Some(name), Some(domain)) => write!(f, "{name}@{domain}")?,
            (Some(name), None) => write!(f, "{name}")?,
            (None, Some(domain)) => write!(f, "{domain}")?,
            (None, None) => {}
        }
        if let Some(instance) = &self.instance {
            write!(f, "/{instance}")?;
        }
        Ok(())
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

impl From<Identity> for Node {
    fn from(identity: Identity) -> Self {
        Node {
            name: Some(identity.name),
            domain: Some(identity.domain),
            instance: None,
        }
    }
}

/// A `name@domain` pair identifying a principal, independent of the
/// connected instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub domain: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Identity {
            name: name.into(),
            domain: domain.into(),
        }
    }

    /// Parse an identity from its `name@domain` form.
    pub fn parse(s: &str) -> Result<Self, NodeParseError> {
        match s.split_once('@') {
            Some((name, domain)) if !name.is_empty() && !domain.is_empty() => {
                Ok(Identity::new(name, domain))
            }
            _ => Err(NodeParseError::new(s)),
        }
    }

    /// The node for this identity on the given instance.
    pub fn into_node(self, instance: Option<&str>) -> Node {
        Node {
            name: Some(self.name),
            domain: Some(self.domain),
            instance: instance.map(str::to_string),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.domain)
    }
}

/// The input was not a valid node or identity string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeParseError {
    input: String,
}

impl NodeParseError {
    fn new(input: &str) -> Self {
        NodeParseError {
            input: input.to_string(),
        }
    }
}

impl fmt::Display for NodeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid node '{}'", self.input)
    }
}

impl std::error::Error for NodeParseError {}
