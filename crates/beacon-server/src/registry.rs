use std::sync::Arc;

use dashmap::DashMap;

use beacon_core::PluginUserId;

use crate::conn::Conn;

/// The one-to-one mapping from plugin user id to live connection.
///
/// Pure bookkeeping: no socket I/O happens here. Closing a superseded
/// connection is the registration workflow's job; this map just stores
/// whatever the caller puts in it.
#[derive(Default)]
pub struct SocketRegistry {
    sockets: DashMap<PluginUserId, Arc<Conn>>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `user_id` to `conn`, replacing any previous entry.
    pub fn put(&self, user_id: PluginUserId, conn: Arc<Conn>) {
        self.sockets.insert(user_id, conn);
    }

    pub fn get(&self, user_id: &PluginUserId) -> Option<Arc<Conn>> {
        self.sockets.get(user_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, user_id: &PluginUserId) {
        self.sockets.remove(user_id);
    }

    /// Remove the entry for `user_id` only if it still points at this
    /// exact connection. Returns whether an entry was removed.
    pub fn remove_if_current(&self, user_id: &PluginUserId, conn: &Arc<Conn>) -> bool {
        self.sockets
            .remove_if(user_id, |_, current| Arc::ptr_eq(current, conn))
            .is_some()
    }

    /// Snapshot of all registered (user id, connection) pairs.
    pub fn all(&self) -> Vec<(PluginUserId, Arc<Conn>)> {
        self.sockets
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }
}
