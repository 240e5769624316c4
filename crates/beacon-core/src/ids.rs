use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum accepted length of a plugin user id.
pub const MAX_USER_ID_LEN: usize = 64;

/// Unique runtime identifier for a single WebSocket connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnId(String);

impl Default for ConnId {
    fn default() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}

impl ConnId {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The plugin-side user identity, supplied by the client in its
/// `register` envelope. Trimmed and sanitized on construction; only
/// `[A-Za-z0-9_-]` survives validation, at most 64 characters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
#[serde(into = "String")]
pub struct PluginUserId(String);

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidUserId {
    #[error("user id is empty")]
    Empty,
    #[error("user id exceeds {MAX_USER_ID_LEN} characters")]
    TooLong,
    #[error("user id contains characters outside [A-Za-z0-9_-]")]
    InvalidCharacter,
}

impl PluginUserId {
    /// Validate a raw string into a user id. Leading/trailing whitespace
    /// and ASCII control characters are stripped before the checks.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, InvalidUserId> {
        let cleaned: String = raw
            .as_ref()
            .trim()
            .chars()
            .filter(|c| !c.is_ascii_control())
            .collect();

        if cleaned.is_empty() {
            return Err(InvalidUserId::Empty);
        }
        if cleaned.len() > MAX_USER_ID_LEN {
            return Err(InvalidUserId::TooLong);
        }
        if !cleaned
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(InvalidUserId::InvalidCharacter);
        }

        Ok(Self(cleaned))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PluginUserId {
    type Error = InvalidUserId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<PluginUserId> for String {
    fn from(id: PluginUserId) -> Self {
        id.0
    }
}

impl fmt::Display for PluginUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PluginUserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
