use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use beacon_core::{Envelope, RegisterPayload};
use beacon_store::LinkRepo;

use crate::conn::{Conn, ConnTracker, Frame, RateVerdict, CLOSE_OVERLOADED, CLOSE_RATE_EXCEEDED};
use crate::register;
use crate::registry::SocketRegistry;
use crate::server::ServerConfig;

/// Owns the life of every WebSocket connection: admission against the
/// ceiling, per-connection rate limiting, envelope dispatch, and
/// teardown. The heartbeat sweep runs against this gateway's tracker.
pub struct Gateway {
    tracker: Arc<ConnTracker>,
    registry: Arc<SocketRegistry>,
    links: Arc<LinkRepo>,
    message_rate_limit: u32,
    rate_limit_window: Duration,
}

impl Gateway {
    pub fn new(
        config: &ServerConfig,
        registry: Arc<SocketRegistry>,
        links: Arc<LinkRepo>,
    ) -> Self {
        Self {
            tracker: Arc::new(ConnTracker::new(
                config.max_connections,
                config.max_send_queue,
            )),
            registry,
            links,
            message_rate_limit: config.message_rate_limit,
            rate_limit_window: config.rate_limit_window,
        }
    }

    pub fn tracker(&self) -> &Arc<ConnTracker> {
        &self.tracker
    }

    /// Drive one upgraded socket to completion: admission, split
    /// reader/writer tasks, teardown.
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket) {
        let Some((conn, mut frames_rx)) = self.tracker.admit() else {
            warn!("connection limit reached, rejecting");
            reject_overloaded(socket).await;
            return;
        };

        info!(conn_id = %conn.id, active = self.tracker.count(), "websocket connection established");

        let (mut ws_tx, mut ws_rx) = socket.split();

        // Writer task: drain the frame queue onto the socket.
        let writer_conn = Arc::clone(&conn);
        let mut writer = tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                match frame {
                    Frame::Text(text) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Frame::Ping => {
                        if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                            break;
                        }
                    }
                    Frame::Close { code, reason } => {
                        let _ = ws_tx
                            .send(WsMessage::Close(Some(CloseFrame {
                                code,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                    // Forced termination: drop the socket, no handshake.
                    Frame::Terminate => break,
                }
            }
            writer_conn.mark_closed();
        });

        // Reader task: inbound messages and pong tracking.
        let reader_gateway = Arc::clone(&self);
        let reader_conn = Arc::clone(&conn);
        let mut reader = tokio::spawn(async move {
            while let Some(Ok(msg)) = ws_rx.next().await {
                match msg {
                    WsMessage::Text(text) => {
                        reader_gateway.dispatch(text.as_bytes(), &reader_conn)
                    }
                    WsMessage::Binary(data) => reader_gateway.dispatch(&data, &reader_conn),
                    WsMessage::Pong(_) => reader_conn.mark_alive(),
                    WsMessage::Close(_) => break,
                    WsMessage::Ping(_) => {} // axum answers pings itself
                }
            }
        });

        // Whichever side finishes first, the other holds a reference to
        // the conn (and with it the frame-queue sender), so it must be
        // stopped rather than waited on.
        tokio::select! {
            _ = &mut writer => reader.abort(),
            _ = &mut reader => writer.abort(),
        }

        self.tracker.discharge(&conn);
        register::release_connection(&self.registry, &conn);
        info!(conn_id = %conn.id, active = self.tracker.count(), "websocket connection closed");
    }

    /// Rate-limit, decode, and route one inbound frame. Runs on the
    /// reader task with no awaits, so a registration completes atomically
    /// with respect to other messages on this connection.
    fn dispatch(&self, data: &[u8], conn: &Arc<Conn>) {
        if !conn.is_open() {
            return;
        }

        if conn.note_message(self.message_rate_limit, self.rate_limit_window)
            == RateVerdict::Exceeded
        {
            warn!(conn_id = %conn.id, "message rate limit exceeded, closing connection");
            conn.close(CLOSE_RATE_EXCEEDED, "Rate limit exceeded");
            return;
        }

        let Some(envelope) = Envelope::parse(data) else {
            debug!(conn_id = %conn.id, "ignoring malformed message");
            return;
        };

        match envelope.kind() {
            "register" => match envelope.payload::<RegisterPayload>() {
                Ok(payload) => register::register_connection(
                    &self.registry,
                    &self.links,
                    payload.user_id,
                    conn,
                ),
                Err(err) => {
                    warn!(conn_id = %conn.id, %err, "invalid register payload dropped");
                }
            },
            kind => {
                warn!(conn_id = %conn.id, kind, "no handler for message type");
            }
        }
    }
}

/// Over the admission ceiling: close the fresh socket immediately with
/// the overload code; it never enters the tracker.
async fn reject_overloaded(mut socket: WebSocket) {
    let _ = socket
        .send(WsMessage::Close(Some(CloseFrame {
            code: CLOSE_OVERLOADED,
            reason: "Server overloaded".into(),
        })))
        .await;
}
