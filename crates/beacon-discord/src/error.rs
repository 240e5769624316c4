/// Typed errors for Discord REST operations.
#[derive(Debug, thiserror::Error)]
pub enum DiscordError {
    #[error("oauth code is malformed")]
    InvalidCode,

    #[error("token exchange failed with status {status}")]
    TokenExchange { status: u16 },

    #[error("discord api error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl DiscordError {
    /// Whether retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } | Self::TokenExchange { status } => {
                *status == 429 || (500..=599).contains(status)
            }
            _ => false,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidCode => "invalid_code",
            Self::TokenExchange { .. } => "token_exchange",
            Self::Api { .. } => "api",
            Self::Network(_) => "network",
            Self::MalformedResponse(_) => "malformed_response",
        }
    }
}

impl From<reqwest::Error> for DiscordError {
    fn from(e: reqwest::Error) -> Self {
        DiscordError::Network(e.to_string())
    }
}
