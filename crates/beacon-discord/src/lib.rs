pub mod client;
pub mod error;

pub use client::{DiscordClient, LinkedAccount, DISCORD_API_BASE};
pub use error::DiscordError;
