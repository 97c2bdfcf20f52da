use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A MIME media type such as `text/plain` or
/// `application/vnd.lime.ping+json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaType(String);

impl MediaType {
    pub fn new(value: impl Into<String>) -> Self {
        MediaType(value.into())
    }

    /// The media type of protocol-level ping documents.
    pub fn ping() -> Self {
        MediaType::new("application/vnd.lime.ping+json")
    }

    pub fn text_plain() -> Self {
        MediaType::new("text/plain")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for MediaType {
    type Err = InvalidMediaType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ty, subtype)) if !ty.is_empty() && !subtype.is_empty() => {
                Ok(MediaType::new(s))
            }
            _ => Err(InvalidMediaType),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The input did not have a `type/subtype` shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidMediaType;

impl fmt::Display for InvalidMediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid media type")
    }
}

impl std::error::Error for InvalidMediaType {}
