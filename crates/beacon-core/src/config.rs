use std::path::PathBuf;

use secrecy::SecretString;

pub const DEFAULT_PORT: u16 = 3333;
pub const DEFAULT_DATABASE_PATH: &str = "data/beacon.db";

/// Process configuration, read from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_path: PathBuf,
    /// Shared secret required on the notify endpoint (`x-api-key`).
    pub api_key: SecretString,
    /// CORS allowlist; empty means no cross-origin access.
    pub allowed_origins: Vec<String>,
    pub discord: DiscordConfig,
}

/// Credentials and endpoints for the Discord integration.
#[derive(Clone, Debug)]
pub struct DiscordConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub bot_token: SecretString,
    /// OAuth redirect URI registered with the Discord application.
    pub redirect_uri: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl Config {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |var: &'static str| -> Result<String, ConfigError> {
            match lookup(var) {
                Some(v) if !v.trim().is_empty() => Ok(v),
                _ => Err(ConfigError::Missing(var)),
            }
        };

        let client_id = required("DISCORD_CLIENT_ID")?;
        let client_secret = required("DISCORD_CLIENT_SECRET")?;
        let bot_token = required("DISCORD_BOT_TOKEN")?;
        let api_key = required("API_KEY")?;

        let redirect_uri = required("REDIRECT_URI")?;
        if !redirect_uri.starts_with("http://") && !redirect_uri.starts_with("https://") {
            return Err(ConfigError::Invalid {
                var: "REDIRECT_URI",
                reason: "must be an http(s) URL".into(),
            });
        }

        let port = match lookup("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::Invalid {
                var: "PORT",
                reason: format!("not a valid port number: {raw}"),
            })?,
            None => DEFAULT_PORT,
        };

        let database_path = lookup("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH));

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();

        Ok(Self {
            port,
            database_path,
            api_key: SecretString::from(api_key),
            allowed_origins,
            discord: DiscordConfig {
                client_id,
                client_secret: SecretString::from(client_secret),
                bot_token: SecretString::from(bot_token),
                redirect_uri,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DISCORD_CLIENT_ID", "client-id"),
            ("DISCORD_CLIENT_SECRET", "client-secret"),
            ("DISCORD_BOT_TOKEN", "bot-token"),
            ("API_KEY", "api-key"),
            ("REDIRECT_URI", "https://example.com/callback"),
        ])
    }

    fn config_from(vars: HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = config_from(base_vars()).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.database_path, PathBuf::from(DEFAULT_DATABASE_PATH));
        assert!(config.allowed_origins.is_empty());
        assert_eq!(config.discord.client_id, "client-id");
    }

    #[test]
    fn missing_required_var_names_it() {
        let mut vars = base_vars();
        vars.remove("DISCORD_BOT_TOKEN");
        let err = config_from(vars).unwrap_err();
        assert_eq!(err.to_string(), "DISCORD_BOT_TOKEN is required");
    }

    #[test]
    fn blank_required_var_rejected() {
        let mut vars = base_vars();
        vars.insert("API_KEY", "   ");
        assert!(config_from(vars).is_err());
    }

    #[test]
    fn invalid_port_rejected() {
        let mut vars = base_vars();
        vars.insert("PORT", "not-a-port");
        let err = config_from(vars).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn port_override_applies() {
        let mut vars = base_vars();
        vars.insert("PORT", "8080");
        let config = config_from(vars).unwrap();
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn redirect_uri_must_be_http() {
        let mut vars = base_vars();
        vars.insert("REDIRECT_URI", "ftp://example.com");
        assert!(config_from(vars).is_err());
    }

    #[test]
    fn allowed_origins_split_and_trimmed() {
        let mut vars = base_vars();
        vars.insert("ALLOWED_ORIGINS", "https://a.example, https://b.example ,");
        let config = config_from(vars).unwrap();
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }
}
