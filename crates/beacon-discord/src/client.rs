use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, info};

use beacon_core::DiscordConfig;

use crate::error::DiscordError;

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

const MAX_OAUTH_CODE_LEN: usize = 64;

/// A Discord account resolved from an OAuth code exchange.
#[derive(Clone, Debug)]
pub struct LinkedAccount {
    pub discord_id: String,
    pub username: String,
}

/// REST client for the two Discord interactions the service needs:
/// exchanging an OAuth authorization code for the user behind it, and
/// sending direct messages as the bot.
pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    config: DiscordConfig,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    username: String,
    discriminator: String,
}

#[derive(Debug, Deserialize)]
struct DmChannel {
    id: String,
}

impl DiscordClient {
    pub fn new(config: DiscordConfig) -> Self {
        Self::with_api_base(config, DISCORD_API_BASE)
    }

    /// Point the client at a different API base (tests).
    pub fn with_api_base(config: DiscordConfig, api_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            config,
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Exchange an OAuth authorization code for the Discord account that
    /// authorized it: POST the token grant, then fetch `/users/@me` with
    /// the resulting bearer token.
    pub async fn exchange_code(&self, code: &str) -> Result<LinkedAccount, DiscordError> {
        validate_oauth_code(code)?;

        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];

        let res = self
            .http
            .post(format!("{}/oauth2/token", self.api_base))
            .form(&form)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(DiscordError::TokenExchange {
                status: res.status().as_u16(),
            });
        }

        let token: TokenResponse = res
            .json()
            .await
            .map_err(|e| DiscordError::MalformedResponse(e.to_string()))?;

        if token.access_token.is_empty() {
            return Err(DiscordError::MalformedResponse(
                "token response carried no access token".into(),
            ));
        }

        let res = self
            .http
            .get(format!("{}/users/@me", self.api_base))
            .bearer_auth(&token.access_token)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(DiscordError::Api { status, body });
        }

        let user: UserResponse = res
            .json()
            .await
            .map_err(|e| DiscordError::MalformedResponse(e.to_string()))?;

        info!(discord_id = %user.id, "oauth code exchanged");

        Ok(LinkedAccount {
            username: display_username(&user.username, &user.discriminator),
            discord_id: user.id,
        })
    }

    /// Send a direct message as the bot: open (or reuse) the DM channel
    /// with the recipient, then post the message into it.
    pub async fn send_dm(&self, discord_id: &str, content: &str) -> Result<(), DiscordError> {
        let res = self
            .http
            .post(format!("{}/users/@me/channels", self.api_base))
            .header("Authorization", self.bot_auth())
            .json(&serde_json::json!({ "recipient_id": discord_id }))
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(DiscordError::Api { status, body });
        }

        let channel: DmChannel = res
            .json()
            .await
            .map_err(|e| DiscordError::MalformedResponse(e.to_string()))?;

        let res = self
            .http
            .post(format!("{}/channels/{}/messages", self.api_base, channel.id))
            .header("Authorization", self.bot_auth())
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(DiscordError::Api { status, body });
        }

        debug!(discord_id, "dm sent");
        Ok(())
    }

    fn bot_auth(&self) -> String {
        format!("Bot {}", self.config.bot_token.expose_secret())
    }
}

/// Discord dropped discriminators for migrated accounts; they report
/// `"0"` and are addressed by bare username.
pub fn display_username(username: &str, discriminator: &str) -> String {
    if discriminator == "0" {
        username.to_owned()
    } else {
        format!("{username}#{discriminator}")
    }
}

/// OAuth authorization codes are short-lived opaque tokens; accept only
/// 1..=64 alphanumeric characters before putting one on the wire.
pub fn validate_oauth_code(code: &str) -> Result<(), DiscordError> {
    let ok = !code.is_empty()
        && code.len() <= MAX_OAUTH_CODE_LEN
        && code.chars().all(|c| c.is_ascii_alphanumeric());
    if ok {
        Ok(())
    } else {
        Err(DiscordError::InvalidCode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn test_config() -> DiscordConfig {
        DiscordConfig {
            client_id: "client-id".into(),
            client_secret: SecretString::from("client-secret"),
            bot_token: SecretString::from("bot-token"),
            redirect_uri: "https://example.com/callback".into(),
        }
    }

    #[test]
    fn default_api_base() {
        let client = DiscordClient::new(test_config());
        assert_eq!(client.api_base(), DISCORD_API_BASE);
    }

    #[test]
    fn api_base_override() {
        let client = DiscordClient::with_api_base(test_config(), "http://127.0.0.1:9999");
        assert_eq!(client.api_base(), "http://127.0.0.1:9999");
    }

    #[test]
    fn username_with_discriminator() {
        assert_eq!(display_username("gamer", "1234"), "gamer#1234");
    }

    #[test]
    fn username_without_discriminator() {
        assert_eq!(display_username("gamer", "0"), "gamer");
    }

    #[test]
    fn oauth_code_validation() {
        assert!(validate_oauth_code("abcDEF123").is_ok());
        assert!(validate_oauth_code("").is_err());
        assert!(validate_oauth_code("has space").is_err());
        assert!(validate_oauth_code("semi;colon").is_err());
        assert!(validate_oauth_code(&"a".repeat(65)).is_err());
    }

    #[tokio::test]
    async fn exchange_rejects_bad_code_before_any_request() {
        let client = DiscordClient::with_api_base(test_config(), "http://127.0.0.1:1");
        let err = client.exchange_code("bad code!").await.unwrap_err();
        assert!(matches!(err, DiscordError::InvalidCode));
    }
}
