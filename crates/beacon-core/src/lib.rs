pub mod config;
pub mod envelope;
pub mod events;
pub mod ids;

pub use config::{Config, ConfigError, DiscordConfig};
pub use envelope::{Envelope, RegisterPayload};
pub use events::{Provider, ServerEvent};
pub use ids::{ConnId, InvalidUserId, PluginUserId};
