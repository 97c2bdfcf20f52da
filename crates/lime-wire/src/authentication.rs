use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Credentials presented during the authenticating phase.
///
/// The wire shape of the `authentication` session field depends on the
/// scheme: `plain` carries a base64 password object, `guest` and
/// `transport` carry empty objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    Guest,
    Plain(PlainAuthentication),
    Transport,
}

impl Authentication {
    pub fn scheme(&self) -> AuthenticationScheme {
        match self {
            Authentication::Guest => AuthenticationScheme::Guest,
            Authentication::Plain(_) => AuthenticationScheme::Plain,
            Authentication::Transport => AuthenticationScheme::Transport,
        }
    }

    /// A plain authentication from a clear-text password.
    pub fn plain(password: &str) -> Self {
        Authentication::Plain(PlainAuthentication::from_password(password))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationScheme {
    Guest,
    Plain,
    Transport,
}

/// Password credentials. The password travels base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainAuthentication {
    pub password: String,
}

impl PlainAuthentication {
    /// Encode a clear-text password into its wire form.
    pub fn from_password(password: &str) -> Self {
        PlainAuthentication {
            password: BASE64.encode(password),
        }
    }
}
