use std::sync::Arc;

use tracing::debug;

use beacon_core::{PluginUserId, ServerEvent};

use crate::registry::SocketRegistry;

/// Outcome of a push attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered,
    /// No live connection for that user. Not an error: the event is
    /// dropped, and a reconnecting client re-learns its link state from
    /// `authAlreadyLinked` at its next registration.
    NotConnected,
}

impl DeliveryResult {
    pub fn is_delivered(self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// The push interface handed to the HTTP handlers: deliver an event to
/// a specific user's live connection if one exists.
pub struct Delivery {
    registry: Arc<SocketRegistry>,
}

impl Delivery {
    pub fn new(registry: Arc<SocketRegistry>) -> Self {
        Self { registry }
    }

    pub fn push(&self, user_id: &PluginUserId, event: &ServerEvent) -> DeliveryResult {
        let Some(conn) = self.registry.get(user_id) else {
            debug!(user_id = %user_id, event = event.event_type(), "push target not connected");
            return DeliveryResult::NotConnected;
        };

        if !conn.is_open() {
            debug!(user_id = %user_id, event = event.event_type(), "push target already closed");
            return DeliveryResult::NotConnected;
        }

        if conn.send_event(event) {
            debug!(user_id = %user_id, event = event.event_type(), "event pushed");
            DeliveryResult::Delivered
        } else {
            DeliveryResult::NotConnected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::{ConnTracker, Frame, CLOSE_NORMAL};
    use crate::register::register_connection;
    use beacon_core::Provider;
    use beacon_store::{Database, LinkRepo};

    fn uid(s: &str) -> PluginUserId {
        PluginUserId::parse(s).unwrap()
    }

    fn auth_complete(user: &str) -> ServerEvent {
        ServerEvent::AuthComplete {
            provider: Provider::Discord,
            plugin_user_id: uid(user),
        }
    }

    fn setup() -> (ConnTracker, Arc<SocketRegistry>, LinkRepo, Delivery) {
        let registry = Arc::new(SocketRegistry::new());
        (
            ConnTracker::new(16, 8),
            Arc::clone(&registry),
            LinkRepo::new(Database::in_memory().unwrap()),
            Delivery::new(registry),
        )
    }

    #[test]
    fn push_to_registered_connection_sends_once() {
        let (tracker, registry, links, delivery) = setup();
        let (conn, mut rx) = tracker.admit().unwrap();
        register_connection(&registry, &links, uid("u1"), &conn);

        let result = delivery.push(&uid("u1"), &auth_complete("u1"));
        assert!(result.is_delivered());

        match rx.try_recv().unwrap() {
            Frame::Text(json) => assert!(json.contains("authComplete")),
            other => panic!("expected text frame, got {other:?}"),
        }
        assert!(rx.try_recv().is_err(), "exactly one send expected");
    }

    #[test]
    fn push_to_unknown_user_is_not_delivered() {
        let (_tracker, _registry, _links, delivery) = setup();
        let result = delivery.push(&uid("nobody"), &auth_complete("nobody"));
        assert_eq!(result, DeliveryResult::NotConnected);
    }

    #[test]
    fn push_to_closed_connection_is_not_delivered() {
        let (tracker, registry, links, delivery) = setup();
        let (conn, _rx) = tracker.admit().unwrap();
        register_connection(&registry, &links, uid("u1"), &conn);

        conn.close(CLOSE_NORMAL, "");
        let result = delivery.push(&uid("u1"), &auth_complete("u1"));
        assert_eq!(result, DeliveryResult::NotConnected);
    }

    #[test]
    fn push_reaches_the_replacement_connection_only() {
        let (tracker, registry, links, delivery) = setup();
        let (first, mut first_rx) = tracker.admit().unwrap();
        let (second, mut second_rx) = tracker.admit().unwrap();

        register_connection(&registry, &links, uid("u1"), &first);
        register_connection(&registry, &links, uid("u1"), &second);

        // drain first's close frame
        while let Ok(frame) = first_rx.try_recv() {
            assert!(!matches!(frame, Frame::Text(_)));
        }

        assert!(delivery.push(&uid("u1"), &auth_complete("u1")).is_delivered());

        assert!(matches!(second_rx.try_recv().unwrap(), Frame::Text(_)));
        assert!(first_rx.try_recv().is_err());
    }
}
