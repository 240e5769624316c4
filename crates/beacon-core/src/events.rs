use serde::{Deserialize, Serialize};

use crate::ids::PluginUserId;

/// Chat platform a user account can be linked on. Only Discord today;
/// the wire format leaves room for more.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Discord,
}

/// Events the server pushes to a connected plugin, discriminated by
/// `type` on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Sent right after registration when a link already exists.
    #[serde(rename = "authAlreadyLinked")]
    AuthAlreadyLinked {
        provider: Provider,
        #[serde(rename = "userId")]
        user_id: PluginUserId,
    },

    /// Pushed after a successful OAuth exchange.
    #[serde(rename = "authComplete")]
    AuthComplete {
        provider: Provider,
        #[serde(rename = "pluginUserId")]
        plugin_user_id: PluginUserId,
    },

    /// Pushed after a failed or denied OAuth exchange.
    #[serde(rename = "authError")]
    AuthError {
        provider: Provider,
        #[serde(rename = "pluginUserId")]
        plugin_user_id: PluginUserId,
        error: String,
    },
}

impl ServerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AuthAlreadyLinked { .. } => "authAlreadyLinked",
            Self::AuthComplete { .. } => "authComplete",
            Self::AuthError { .. } => "authError",
        }
    }
}
