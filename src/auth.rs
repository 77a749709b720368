use std::fmt;

use crate::{error::Error, util::redact::redact_value};

fn non_blank(value: String, what: &str) -> Result<String, Error> {
    if value.trim().is_empty() {
        return Err(Error::invalid_config(format!("{what} must not be empty")));
    }
    Ok(value)
}

/// Signing region, e.g. `us-east-1`. Part of every V4 credential scope.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Region(String);

impl Region {
    pub fn new(value: impl Into<String>) -> Result<Self, Error> {
        non_blank(value.into(), "region").map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Static access key pair, shared read-only by every request of a client.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Result<Self, Error> {
        Ok(Self {
            access_key_id: non_blank(access_key_id.into(), "access_key_id")?,
            secret_access_key: non_blank(secret_access_key.into(), "secret_access_key")?,
            session_token: None,
        })
    }

    /// Attaches a temporary-credential token, sent as `x-amz-security-token`.
    pub fn with_session_token(self, session_token: impl Into<String>) -> Result<Self, Error> {
        Ok(Self {
            session_token: Some(non_blank(session_token.into(), "session_token")?),
            ..self
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = self.session_token.as_deref().map(redact_value);
        f.debug_struct("Credentials")
            .field("access_key_id", &redact_value(&self.access_key_id))
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &token)
            .finish()
    }
}

#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum Auth {
    Anonymous,
    Static(Credentials),
}

impl Auth {
    /// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self, Error> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| Error::invalid_config("missing AWS_ACCESS_KEY_ID"))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| Error::invalid_config("missing AWS_SECRET_ACCESS_KEY"))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let mut creds = Credentials::new(access_key_id, secret_access_key)?;
        if let Some(token) = session_token {
            creds = creds.with_session_token(token)?;
        }

        Ok(Self::Static(creds))
    }

    pub(crate) fn credentials(&self) -> Option<&Credentials> {
        match self {
            Self::Anonymous => None,
            Self::Static(creds) => Some(creds),
        }
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressingStyle {
    Auto,
    Path,
    VirtualHosted,
}

/// Request authentication scheme, chosen once per client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SignatureVersion {
    /// Legacy HMAC-SHA1 signatures (`Authorization: AWS key:sig`).
    V2,
    /// Scoped HMAC-SHA256 signatures (`AWS4-HMAC-SHA256`).
    #[default]
    V4,
}
