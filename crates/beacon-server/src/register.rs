use std::sync::Arc;

use tracing::{info, warn};

use beacon_core::{PluginUserId, Provider, ServerEvent};
use beacon_store::LinkRepo;

use crate::conn::{Conn, CLOSE_NORMAL};
use crate::registry::SocketRegistry;

/// Claim `user_id` for `conn`: latest registration wins.
///
/// A prior connection registered under the same id is closed and
/// evicted first; re-registering the same connection is a no-op for
/// that step. Once the registry points at `conn`, the link store is
/// consulted and an `authAlreadyLinked` event is sent if the user
/// already has a Discord link. The registry mutation completes before
/// anything that could fail, so a racing duplicate registration always
/// observes a consistent entry.
pub fn register_connection(
    registry: &SocketRegistry,
    links: &LinkRepo,
    user_id: PluginUserId,
    conn: &Arc<Conn>,
) {
    if let Some(existing) = registry.get(&user_id) {
        if Arc::ptr_eq(&existing, conn) {
            // Duplicate register on the same socket: nothing to evict.
            info!(user_id = %user_id, "connection re-registered");
        } else {
            // Closing a half-dead socket may fail; the eviction is what
            // matters and it happens regardless.
            warn!(user_id = %user_id, "replacing existing connection");
            existing.close(CLOSE_NORMAL, "superseded by a newer registration");
            registry.remove(&user_id);
        }
    }

    registry.put(user_id.clone(), Arc::clone(conn));

    // A connection re-registering under a new id gives up its old entry.
    if let Some(previous) = conn.bind_user(user_id.clone()) {
        if previous != user_id {
            registry.remove_if_current(&previous, conn);
        }
    }

    info!(user_id = %user_id, conn_id = %conn.id, "connection registered");

    match links.discord_id(&user_id) {
        Ok(Some(_)) => {
            let event = ServerEvent::AuthAlreadyLinked {
                provider: Provider::Discord,
                user_id: user_id.clone(),
            };
            if !conn.send_event(&event) {
                warn!(user_id = %user_id, "authAlreadyLinked not queued");
            }
        }
        Ok(None) => {}
        Err(err) => {
            warn!(user_id = %user_id, %err, "link lookup failed during registration");
        }
    }
}

/// Close-observer half of the workflow: when a connection goes away,
/// drop its registry entry — but only if the registry still points at
/// this exact connection. A late close of a superseded connection must
/// not evict the newer registration.
pub fn release_connection(registry: &SocketRegistry, conn: &Arc<Conn>) {
    if let Some(user_id) = conn.bound_user() {
        if registry.remove_if_current(&user_id, conn) {
            info!(user_id = %user_id, conn_id = %conn.id, "registry entry released");
        }
    }
}
