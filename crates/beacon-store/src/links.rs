use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use beacon_core::PluginUserId;

use crate::database::Database;
use crate::error::StoreError;

/// Which chat platforms a plugin user has linked. Telegram is carried on
/// the wire for forward compatibility but cannot be linked yet.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PlatformStatus {
    pub discord: bool,
    pub telegram: bool,
}

/// Repository over plugin-user ↔ Discord account links.
pub struct LinkRepo {
    db: Database,
}

impl LinkRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Link a plugin user to a Discord account. Re-linking the same
    /// plugin user overwrites the previous link.
    #[instrument(skip(self), fields(user_id = %plugin_user_id))]
    pub fn link(&self, plugin_user_id: &PluginUserId, discord_id: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO linked_users (plugin_user_id, discord_id, created_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    plugin_user_id.as_str(),
                    discord_id,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    /// The Discord account linked to a plugin user, if any.
    #[instrument(skip(self), fields(user_id = %plugin_user_id))]
    pub fn discord_id(&self, plugin_user_id: &PluginUserId) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT discord_id FROM linked_users WHERE plugin_user_id = ?1",
                    [plugin_user_id.as_str()],
                    |row| row.get::<_, String>(0),
                )
                .ok();
            Ok(found)
        })
    }

    /// Whether a plugin user has a Discord link.
    pub fn is_linked(&self, plugin_user_id: &PluginUserId) -> Result<bool, StoreError> {
        Ok(self.discord_id(plugin_user_id)?.is_some())
    }

    /// Per-platform link status for a plugin user.
    #[instrument(skip(self), fields(user_id = %plugin_user_id))]
    pub fn platforms(&self, plugin_user_id: &PluginUserId) -> Result<PlatformStatus, StoreError> {
        Ok(PlatformStatus {
            discord: self.is_linked(plugin_user_id)?,
            telegram: false,
        })
    }
}
