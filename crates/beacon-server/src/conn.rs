use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use beacon_core::{ConnId, PluginUserId, ServerEvent};

/// Close code sent when the admission ceiling is reached.
pub const CLOSE_OVERLOADED: u16 = 1013;
/// Close code sent when a connection exceeds the message rate limit.
pub const CLOSE_RATE_EXCEEDED: u16 = 1008;
/// Transport-default code for ordinary closes.
pub const CLOSE_NORMAL: u16 = 1000;

/// Frames queued to a connection's writer task.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Text(String),
    /// Liveness probe.
    Ping,
    /// Graceful close: send a close frame, then shut the socket down.
    Close { code: u16, reason: &'static str },
    /// Drop the socket without a close handshake — the peer is presumed
    /// unresponsive.
    Terminate,
}

/// Outcome of counting one inbound message against the rate window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateVerdict {
    Within,
    Exceeded,
}

/// One live WebSocket connection, as the rest of the server sees it.
///
/// The transport tasks own the socket; everyone else holds an `Arc` to
/// this record and talks to the peer through the frame queue. Liveness
/// and rate-limit bookkeeping are explicit fields here, not state bolted
/// onto the transport object.
pub struct Conn {
    pub id: ConnId,
    frames: mpsc::Sender<Frame>,
    open: AtomicBool,
    alive: AtomicBool,
    msg_count: AtomicU32,
    window_deadline_ms: AtomicU64,
    user: Mutex<Option<PluginUserId>>,
}

impl Conn {
    fn new(id: ConnId, frames: mpsc::Sender<Frame>) -> Self {
        Self {
            id,
            frames,
            open: AtomicBool::new(true),
            alive: AtomicBool::new(true),
            msg_count: AtomicU32::new(0),
            window_deadline_ms: AtomicU64::new(0),
            user: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    /// Flip to closed. Returns true the first time only, so every close
    /// path is idempotent.
    pub fn mark_closed(&self) -> bool {
        self.open.swap(false, Ordering::Relaxed)
    }

    /// A liveness probe was answered.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Clear the liveness flag, returning whether it was set. The
    /// heartbeat sweep uses this: a flag still clear from the previous
    /// tick means the peer never answered the probe.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    /// Queue a serialized event. Returns false if the frame queue is
    /// full or the writer is gone.
    pub fn send_event(&self, event: &ServerEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(json) => self.send_text(json),
            Err(err) => {
                tracing::error!(conn_id = %self.id, %err, "event serialization failed");
                false
            }
        }
    }

    pub fn send_text(&self, text: String) -> bool {
        self.frames.try_send(Frame::Text(text)).is_ok()
    }

    /// Graceful close with a code and reason. No-op on an already-closed
    /// connection.
    pub fn close(&self, code: u16, reason: &'static str) {
        if self.mark_closed() {
            let _ = self.frames.try_send(Frame::Close { code, reason });
        }
    }

    /// Forced termination: no close handshake.
    pub fn terminate(&self) {
        if self.mark_closed() {
            let _ = self.frames.try_send(Frame::Terminate);
        }
    }

    pub(crate) fn queue_ping(&self) {
        let _ = self.frames.try_send(Frame::Ping);
    }

    /// Bind the registered user id to this connection so teardown can
    /// release the registry entry. Returns the previous binding.
    pub fn bind_user(&self, user_id: PluginUserId) -> Option<PluginUserId> {
        self.user.lock().replace(user_id)
    }

    pub fn bound_user(&self) -> Option<PluginUserId> {
        self.user.lock().clone()
    }

    /// Count one inbound message against the rate window. The counter
    /// resets when the window deadline passes.
    pub fn note_message(&self, limit: u32, window: Duration) -> RateVerdict {
        let now = now_ms();
        let deadline = self.window_deadline_ms.load(Ordering::Relaxed);

        if now >= deadline {
            self.window_deadline_ms
                .store(now + window.as_millis() as u64, Ordering::Relaxed);
            self.msg_count.store(1, Ordering::Relaxed);
            return RateVerdict::Within;
        }

        let count = self.msg_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count > limit {
            RateVerdict::Exceeded
        } else {
            RateVerdict::Within
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Tracks every admitted connection and enforces the admission ceiling.
///
/// This is distinct from the user-id registry: the tracker knows every
/// open socket whether or not it ever registers, and it is what the
/// heartbeat sweep iterates.
pub struct ConnTracker {
    conns: DashMap<ConnId, Arc<Conn>>,
    max_connections: usize,
    send_queue: usize,
    active: AtomicUsize,
}

impl ConnTracker {
    pub fn new(max_connections: usize, send_queue: usize) -> Self {
        Self {
            conns: DashMap::new(),
            max_connections,
            send_queue,
            active: AtomicUsize::new(0),
        }
    }

    /// Admit a new connection, or refuse if the ceiling is reached.
    /// Returns the tracked record and the receiving end of its frame
    /// queue for the writer task.
    pub fn admit(&self) -> Option<(Arc<Conn>, mpsc::Receiver<Frame>)> {
        let admitted = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n < self.max_connections).then_some(n + 1)
            })
            .is_ok();
        if !admitted {
            return None;
        }

        let (tx, rx) = mpsc::channel(self.send_queue);
        let conn = Arc::new(Conn::new(ConnId::new(), tx));
        self.conns.insert(conn.id.clone(), Arc::clone(&conn));
        Some((conn, rx))
    }

    /// Remove a connection from the active set and free its slot.
    /// Safe to call more than once.
    pub fn discharge(&self, conn: &Conn) {
        if self.conns.remove(&conn.id).is_some() {
            self.active.fetch_sub(1, Ordering::Relaxed);
            conn.mark_closed();
        }
    }

    pub fn count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// One heartbeat tick: terminate every connection that never
    /// answered the previous probe, clear the flag and probe the rest.
    /// Returns how many were terminated.
    pub fn sweep(&self) -> usize {
        let mut terminated = 0;
        for entry in self.conns.iter() {
            let conn = entry.value();
            if !conn.is_open() {
                continue;
            }
            if !conn.take_alive() {
                tracing::info!(conn_id = %conn.id, "terminating unresponsive connection");
                conn.terminate();
                terminated += 1;
                continue;
            }
            conn.queue_ping();
        }
        terminated
    }
}

/// Background task running the heartbeat sweep at a fixed interval.
/// Aborted when the server handle shuts down.
pub fn start_heartbeat(
    tracker: Arc<ConnTracker>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // consume first immediate tick
        loop {
            ticker.tick().await;
            let terminated = tracker.sweep();
            if terminated > 0 {
                tracing::info!(terminated, "heartbeat sweep");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ConnTracker {
        ConnTracker::new(1000, 32)
    }

    #[test]
    fn admit_and_discharge() {
        let tracker = tracker();
        assert_eq!(tracker.count(), 0);

        let (a, _rx_a) = tracker.admit().unwrap();
        let (b, _rx_b) = tracker.admit().unwrap();
        assert_eq!(tracker.count(), 2);

        tracker.discharge(&a);
        assert_eq!(tracker.count(), 1);
        tracker.discharge(&b);
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn admission_ceiling_refuses_excess() {
        let tracker = ConnTracker::new(2, 32);
        let (_a, _rx_a) = tracker.admit().unwrap();
        let (_b, _rx_b) = tracker.admit().unwrap();
        assert!(tracker.admit().is_none());
        assert_eq!(tracker.count(), 2);
    }

    #[test]
    fn discharge_frees_a_slot() {
        let tracker = ConnTracker::new(1, 32);
        let (a, _rx_a) = tracker.admit().unwrap();
        assert!(tracker.admit().is_none());

        tracker.discharge(&a);
        assert!(tracker.admit().is_some());
    }

    #[test]
    fn discharge_is_idempotent() {
        let tracker = tracker();
        let (a, _rx) = tracker.admit().unwrap();
        tracker.discharge(&a);
        tracker.discharge(&a);
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn close_queues_one_frame_only() {
        let tracker = tracker();
        let (conn, mut rx) = tracker.admit().unwrap();

        conn.close(CLOSE_RATE_EXCEEDED, "Rate limit exceeded");
        conn.close(CLOSE_RATE_EXCEEDED, "Rate limit exceeded");

        assert_eq!(
            rx.try_recv().unwrap(),
            Frame::Close {
                code: CLOSE_RATE_EXCEEDED,
                reason: "Rate limit exceeded"
            }
        );
        assert!(rx.try_recv().is_err());
        assert!(!conn.is_open());
    }

    #[test]
    fn terminate_after_close_is_a_noop() {
        let tracker = tracker();
        let (conn, mut rx) = tracker.admit().unwrap();

        conn.close(CLOSE_NORMAL, "");
        conn.terminate();

        assert!(matches!(rx.try_recv().unwrap(), Frame::Close { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn rate_window_counts_and_trips() {
        let tracker = tracker();
        let (conn, _rx) = tracker.admit().unwrap();
        let window = Duration::from_secs(60);

        for _ in 0..3 {
            assert_eq!(conn.note_message(3, window), RateVerdict::Within);
        }
        assert_eq!(conn.note_message(3, window), RateVerdict::Exceeded);
    }

    #[test]
    fn rate_window_resets_after_deadline() {
        let tracker = tracker();
        let (conn, _rx) = tracker.admit().unwrap();

        // Zero-length window: every message starts a fresh window.
        let window = Duration::from_millis(0);
        for _ in 0..10 {
            assert_eq!(conn.note_message(1, window), RateVerdict::Within);
        }
    }

    #[test]
    fn sweep_terminates_stale_connections() {
        let tracker = tracker();
        let (stale, mut stale_rx) = tracker.admit().unwrap();
        let (fresh, mut fresh_rx) = tracker.admit().unwrap();

        // stale never answers the first probe
        stale.take_alive();
        fresh.mark_alive();

        let terminated = tracker.sweep();
        assert_eq!(terminated, 1);
        assert!(!stale.is_open());
        assert_eq!(stale_rx.try_recv().unwrap(), Frame::Terminate);

        // the responsive connection got a probe, not a termination
        assert_eq!(fresh_rx.try_recv().unwrap(), Frame::Ping);
        assert!(fresh.is_open());
    }

    #[test]
    fn sweep_terminates_silent_peer_on_second_tick() {
        let tracker = tracker();
        let (_conn, mut rx) = tracker.admit().unwrap();

        // First tick: probe goes out, flag cleared.
        assert_eq!(tracker.sweep(), 0);
        assert_eq!(rx.try_recv().unwrap(), Frame::Ping);

        // No pong arrives. Second tick terminates.
        assert_eq!(tracker.sweep(), 1);
        assert_eq!(rx.try_recv().unwrap(), Frame::Terminate);
    }

    #[test]
    fn pong_keeps_connection_alive_across_ticks() {
        let tracker = tracker();
        let (conn, mut rx) = tracker.admit().unwrap();

        for _ in 0..3 {
            assert_eq!(tracker.sweep(), 0);
            assert_eq!(rx.try_recv().unwrap(), Frame::Ping);
            conn.mark_alive();
        }
        assert!(conn.is_open());
    }

    #[test]
    fn bind_user_returns_previous_binding() {
        let tracker = tracker();
        let (conn, _rx) = tracker.admit().unwrap();

        let u1 = PluginUserId::parse("u1").unwrap();
        let u2 = PluginUserId::parse("u2").unwrap();

        assert_eq!(conn.bind_user(u1.clone()), None);
        assert_eq!(conn.bind_user(u2.clone()), Some(u1));
        assert_eq!(conn.bound_user(), Some(u2));
    }

    #[test]
    fn send_event_reaches_queue() {
        let tracker = tracker();
        let (conn, mut rx) = tracker.admit().unwrap();

        let event = ServerEvent::AuthComplete {
            provider: beacon_core::Provider::Discord,
            plugin_user_id: PluginUserId::parse("u1").unwrap(),
        };
        assert!(conn.send_event(&event));

        match rx.try_recv().unwrap() {
            Frame::Text(json) => assert!(json.contains("authComplete")),
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}
