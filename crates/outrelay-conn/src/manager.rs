//! `ConnManager`: session registry and lifecycle.
//!
//! Each open session owns a pipe, a keepalive timer, and a streaming task
//! that feeds the pipe to the collector. Sessions are created by a line
//! numbered 1 and removed exactly once by whichever comes first: an explicit
//! close, a failed write, the keepalive timer, or the end of the outbound
//! stream.
//!
//! # Locking
//!
//! One mutex guards the registry. It is held for lookups, inserts, removals,
//! timer resets, and for *queueing* a line into a session's pipe, none of
//! which block. Waiting for the collector to take the line happens after the
//! lock is released, so a stalled collector only stalls callers of its own
//! session. Lines for one id reach the collector in the order they were
//! queued, which is the order the `send` calls took the lock.
//!
//! # Generations
//!
//! Every session gets a unique generation number. The timer, the streaming
//! task, and a failed `send` tear down by `(id, generation)`, so a late
//! callback from a closed session never removes a newer session with the
//! same id.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use outrelay_core::{KEEPALIVE_WINDOW, SequencedLine, SessionId};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::errors::ConnError;
use crate::keepalive::KeepaliveTimer;
use crate::pipe::{self, PendingWrite, PipeReader, PipeWriter};
use crate::transport::Transport;

/// Relays sequenced lines into one outbound stream per session id.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct ConnManager {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    keepalive: Duration,
    sessions: Mutex<HashMap<SessionId, Session>>,
    next_generation: AtomicU64,
    streams: TaskTracker,
}

struct Session {
    generation: u64,
    writer: PipeWriter,
    closed: CancellationToken,
    timer: KeepaliveTimer,
}

impl Session {
    /// Fail pending writes and end the request body. Dropping the writer and
    /// timer closes the pipe's write end and disarms the timer.
    fn shutdown(self) {
        self.closed.cancel();
    }
}

impl ConnManager {
    /// Create a manager using the standard keepalive window.
    pub fn new<T: Transport>(transport: T) -> Self {
        Self::with_keepalive(transport, KEEPALIVE_WINDOW)
    }

    /// Create a manager whose sessions all share `keepalive` as their
    /// inactivity window.
    pub fn with_keepalive<T: Transport>(transport: T, keepalive: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport: Arc::new(transport),
                keepalive,
                sessions: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                streams: TaskTracker::new(),
            }),
        }
    }

    /// Send a raw line for `id`.
    ///
    /// The line must be `number [content]`. A line numbered 1 opens a
    /// session if none exists. `content` plus a newline is written to the
    /// session's stream; the call returns once the outbound request has
    /// taken the bytes. Returns whether this call opened the session.
    pub async fn send(&self, id: &SessionId, raw_line: &str) -> Result<bool, ConnError> {
        let line = SequencedLine::parse(raw_line)?;
        let (pending, generation, opened) = self.inner.submit(id, &line)?;

        if let Err(err) = pending.accepted().await {
            if self.inner.teardown(id, Some(generation)) {
                debug!(session = %id, error = %err, "closed connection after failed write");
            }
            return Err(ConnError::SendFailed(err));
        }

        // Got a line, so likely alive.
        if !self.inner.reset_timer(id, Some(generation)) {
            warn!(session = %id, "error resetting keepalive timer: connection not open");
        }
        Ok(opened)
    }

    /// Close the session for `id`, ending its outbound request body.
    pub fn close_conn(&self, id: &SessionId) -> Result<(), ConnError> {
        if self.inner.teardown(id, None) {
            Ok(())
        } else {
            Err(ConnError::NotOpen)
        }
    }

    /// Restart the keepalive window for `id` without sending anything.
    pub fn keep_alive(&self, id: &SessionId) -> Result<(), ConnError> {
        if self.inner.reset_timer(id, None) {
            Ok(())
        } else {
            Err(ConnError::NotOpen)
        }
    }

    /// Whether a session is open for `id`.
    pub fn is_open(&self, id: &SessionId) -> bool {
        self.inner.sessions.lock().contains_key(id)
    }

    /// Number of open sessions.
    pub fn open_sessions(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Inactivity window shared by all sessions.
    pub fn keepalive_window(&self) -> Duration {
        self.inner.keepalive
    }

    /// Close every open session. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Session> = self.inner.sessions.lock().drain().map(|(_, s)| s).collect();
        let count = drained.len();
        for session in drained {
            session.shutdown();
        }
        count
    }

    /// Wait up to `timeout` for every streaming task to finish.
    ///
    /// Streams end after their session is closed and the collector finishes
    /// its response. Returns `false` on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let _ = self.inner.streams.close();
        let finished = tokio::time::timeout(timeout, self.inner.streams.wait())
            .await
            .is_ok();
        let _ = self.inner.streams.reopen();
        finished
    }
}

impl Inner {
    /// Find or open the session for `id` and queue the line into its pipe.
    fn submit(
        self: &Arc<Self>,
        id: &SessionId,
        line: &SequencedLine<'_>,
    ) -> Result<(PendingWrite, u64, bool), ConnError> {
        let mut sessions = self.sessions.lock();
        let (session, opened) = match sessions.entry(id.clone()) {
            Entry::Occupied(entry) => (entry.into_mut(), false),
            Entry::Vacant(entry) => {
                if !line.is_opening() {
                    return Err(ConnError::NoConnection { seq: line.seq });
                }
                (entry.insert(self.open_session(id)), true)
            }
        };
        let generation = session.generation;

        match session.writer.submit(line.payload()) {
            Ok(pending) => Ok((pending, generation, opened)),
            Err(err) => {
                if let Some(session) = sessions.remove(id) {
                    session.shutdown();
                }
                Err(ConnError::SendFailed(err))
            }
        }
    }

    /// Build a session, starting its streaming task and keepalive timer.
    ///
    /// Called with the registry locked, so the session is not visible to
    /// anyone until both are running.
    fn open_session(self: &Arc<Self>, id: &SessionId) -> Session {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let closed = CancellationToken::new();
        let (writer, reader) = pipe::pipe(closed.clone());

        self.spawn_stream(id.clone(), generation, reader);

        let weak = Arc::downgrade(self);
        let timer_id = id.clone();
        let timer = KeepaliveTimer::start(self.keepalive, closed.clone(), move || {
            expire(&weak, &timer_id, generation);
        });

        debug!(session = %id, generation, "opened connection");
        Session {
            generation,
            writer,
            closed,
            timer,
        }
    }

    /// Forward the pipe to the collector; whatever ends the stream ends the
    /// session.
    fn spawn_stream(self: &Arc<Self>, id: SessionId, generation: u64, reader: PipeReader) {
        let weak = Arc::downgrade(self);
        let transport = Arc::clone(&self.transport);
        let _ = self.streams.spawn(async move {
            let outcome = transport.stream(&id, reader).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let closed_here = inner.teardown(&id, Some(generation));
            match outcome {
                Ok(()) if closed_here => info!(session = %id, "connection ended"),
                Ok(()) => {}
                Err(err) if closed_here => {
                    warn!(
                        session = %id,
                        error = %err,
                        "outbound stream failed, closed connection"
                    );
                }
                Err(err) => {
                    debug!(
                        session = %id,
                        error = %err,
                        "outbound stream for closed connection failed"
                    );
                }
            }
        });
    }

    /// Remove and shut down the session for `id`, if it exists and (when
    /// given) has the expected generation. Returns whether this call removed
    /// it.
    fn teardown(&self, id: &SessionId, generation: Option<u64>) -> bool {
        let removed = {
            let mut sessions = self.sessions.lock();
            match sessions.get(id) {
                Some(s) if generation.is_none_or(|g| g == s.generation) => sessions.remove(id),
                _ => None,
            }
        };
        match removed {
            Some(session) => {
                session.shutdown();
                true
            }
            None => false,
        }
    }

    /// Reset the keepalive timer for `id` (optionally only for a specific
    /// generation). Returns whether a timer was reset.
    fn reset_timer(&self, id: &SessionId, generation: Option<u64>) -> bool {
        let sessions = self.sessions.lock();
        match sessions.get(id) {
            Some(s) if generation.is_none_or(|g| g == s.generation) => {
                s.timer.reset();
                true
            }
            _ => false,
        }
    }
}

/// Keepalive expiry for one session generation.
fn expire(weak: &Weak<Inner>, id: &SessionId, generation: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    // Already closed some other way: nothing to do.
    if inner.teardown(id, Some(generation)) {
        info!(session = %id, "closed connection after timeout");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use futures::StreamExt;
    use outrelay_core::logging::capture_logs;
    use reqwest::StatusCode;
    use tokio::time::{self, Instant};
    use tracing::Level;

    use super::*;
    use crate::errors::{PipeError, TransportError};

    const W: Duration = KEEPALIVE_WINDOW;
    const MS: Duration = Duration::from_millis(1);

    /// How the in-memory collector treats a stream.
    #[derive(Clone, Copy, Default)]
    enum Behavior {
        /// Read the whole body, then end the response.
        #[default]
        ReadAll,
        /// Answer with a non-success status without reading anything.
        Reject,
        /// Read this many chunks, then end the response.
        HangUpAfter(usize),
        /// Read the whole body, then wait before ending the response.
        Linger(Duration),
        /// Never read the body of ids starting with `slow`.
        StallSlow,
    }

    #[derive(Clone, Default)]
    struct TestCollector {
        behavior: Behavior,
        received: Arc<Mutex<HashMap<SessionId, Vec<u8>>>>,
        ended_at: Arc<Mutex<HashMap<SessionId, Instant>>>,
        opened: Arc<AtomicUsize>,
    }

    impl TestCollector {
        fn with(behavior: Behavior) -> Self {
            Self {
                behavior,
                ..Self::default()
            }
        }

        fn received(&self, id: &SessionId) -> String {
            let received = self.received.lock();
            String::from_utf8(received.get(id).cloned().unwrap_or_default()).unwrap()
        }

        fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        async fn read(&self, id: &SessionId, body: &mut PipeReader, limit: Option<usize>) {
            let mut n = 0;
            while limit.is_none_or(|l| n < l) {
                let Some(Ok(chunk)) = body.next().await else {
                    break;
                };
                self.received
                    .lock()
                    .entry(id.clone())
                    .or_default()
                    .extend_from_slice(&chunk);
                n += 1;
            }
        }
    }

    #[async_trait]
    impl Transport for TestCollector {
        async fn stream(&self, id: &SessionId, mut body: PipeReader) -> Result<(), TransportError> {
            let _ = self.opened.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::ReadAll => self.read(id, &mut body, None).await,
                Behavior::Reject => {
                    return Err(TransportError::Status(StatusCode::SERVICE_UNAVAILABLE));
                }
                Behavior::HangUpAfter(n) => self.read(id, &mut body, Some(n)).await,
                Behavior::Linger(d) => {
                    self.read(id, &mut body, None).await;
                    time::sleep(d).await;
                }
                Behavior::StallSlow => {
                    if id.starts_with("slow") {
                        std::future::pending::<()>().await;
                    }
                    self.read(id, &mut body, None).await;
                }
            }
            let _ = self.ended_at.lock().insert(id.clone(), Instant::now());
            Ok(())
        }
    }

    fn manager(behavior: Behavior) -> (ConnManager, TestCollector) {
        let collector = TestCollector::with(behavior);
        (ConnManager::new(collector.clone()), collector)
    }

    fn id(s: &str) -> SessionId {
        SessionId::new(s)
    }

    // ── Opening ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn first_line_opens_session() {
        let (cm, collector) = manager(Behavior::ReadAll);
        let id = id("open");

        assert!(cm.send(&id, "1 hello").await.unwrap());
        assert!(cm.is_open(&id));
        assert_eq!(cm.open_sessions(), 1);
        assert_eq!(collector.opened(), 1);

        assert!(!cm.send(&id, "2 again").await.unwrap());
        assert_eq!(collector.opened(), 1);
    }

    #[tokio::test]
    async fn later_line_without_session_is_rejected() {
        let (cm, collector) = manager(Behavior::ReadAll);
        let id = id("late");

        let err = cm.send(&id, "2 too late").await.unwrap_err();
        assert!(matches!(err, ConnError::NoConnection { seq: 2 }));
        assert!(!cm.is_open(&id));
        tokio::task::yield_now().await;
        assert_eq!(collector.opened(), 0);
    }

    #[tokio::test]
    async fn zero_does_not_open() {
        let (cm, _collector) = manager(Behavior::ReadAll);
        let err = cm.send(&id("zero"), "0 x").await.unwrap_err();
        assert!(matches!(err, ConnError::NoConnection { seq: 0 }));
    }

    #[tokio::test]
    async fn invalid_line_changes_nothing() {
        let (cm, _collector) = manager(Behavior::ReadAll);
        let id = id("bad");

        let err = cm.send(&id, "hello").await.unwrap_err();
        assert!(matches!(err, ConnError::InvalidLine(_)));
        assert!(!cm.is_open(&id));

        assert!(cm.send(&id, "1 ok").await.unwrap());
        assert!(cm.send(&id, "x2 nope").await.is_err());
        assert!(cm.is_open(&id));
    }

    #[tokio::test]
    async fn sequence_numbers_after_first_are_not_checked() {
        let (cm, collector) = manager(Behavior::ReadAll);
        let id = id("lax");

        assert!(cm.send(&id, "1 a").await.unwrap());
        assert!(!cm.send(&id, "7 b").await.unwrap());
        assert!(!cm.send(&id, "1 c").await.unwrap());
        assert!(!cm.send(&id, "3 d").await.unwrap());
        cm.close_conn(&id).unwrap();

        assert!(cm.drain(Duration::from_secs(5)).await);
        assert_eq!(collector.received(&id), "a\nb\nc\nd\n");
    }

    // ── Round trip ──────────────────────────────────────────────────

    #[tokio::test]
    async fn lines_arrive_in_order_with_newlines() {
        let (cm, collector) = manager(Behavior::ReadAll);
        let id = id("rt");

        assert!(cm.send(&id, "1 A").await.unwrap());
        assert!(!cm.send(&id, "2 B").await.unwrap());
        assert!(!cm.send(&id, "3").await.unwrap());
        cm.close_conn(&id).unwrap();

        assert!(cm.drain(Duration::from_secs(5)).await);
        assert_eq!(collector.received(&id), "A\nB\n\n");
    }

    #[tokio::test]
    async fn whitespace_in_content_is_preserved() {
        let (cm, collector) = manager(Behavior::ReadAll);
        let id = id("ws");

        assert!(cm.send(&id, "1\tOutput 1").await.unwrap());
        assert!(!cm.send(&id, "2\t        Significant whitespace").await.unwrap());
        assert!(!cm.send(&id, "3").await.unwrap());
        cm.close_conn(&id).unwrap();

        assert!(cm.drain(Duration::from_secs(5)).await);
        assert_eq!(
            collector.received(&id),
            "Output 1\n        Significant whitespace\n\n"
        );
    }

    // ── Closing ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn close_twice_reports_not_open() {
        let (logs, _guard) = capture_logs();
        let (cm, _collector) = manager(Behavior::ReadAll);
        let id = id("close");

        assert!(cm.send(&id, "1 x").await.unwrap());
        cm.close_conn(&id).unwrap();
        assert!(matches!(cm.close_conn(&id), Err(ConnError::NotOpen)));
        assert!(!cm.is_open(&id));

        assert!(cm.drain(Duration::from_secs(5)).await);
        // The stream ending after an explicit close is not news.
        assert!(!logs.has_message("connection ended"));
        assert_eq!(logs.count_at_least(Level::WARN), 0);
    }

    #[tokio::test]
    async fn close_and_keepalive_without_session() {
        let (cm, _collector) = manager(Behavior::ReadAll);
        assert!(matches!(cm.close_conn(&id("none")), Err(ConnError::NotOpen)));
        assert!(matches!(cm.keep_alive(&id("none")), Err(ConnError::NotOpen)));
    }

    #[tokio::test]
    async fn reopen_after_close() {
        let (cm, collector) = manager(Behavior::ReadAll);
        let id = id("again");

        assert!(cm.send(&id, "1 first").await.unwrap());
        cm.close_conn(&id).unwrap();
        assert!(matches!(
            cm.send(&id, "2 gone").await,
            Err(ConnError::NoConnection { seq: 2 })
        ));
        assert!(cm.send(&id, "1 second").await.unwrap());
        assert_eq!(collector.opened(), 2);
    }

    #[tokio::test]
    async fn close_all_closes_everything() {
        let (cm, collector) = manager(Behavior::ReadAll);
        for name in ["a", "b", "c"] {
            assert!(cm.send(&id(name), &format!("1 {name}")).await.unwrap());
        }
        assert_eq!(cm.close_all(), 3);
        assert_eq!(cm.open_sessions(), 0);
        assert_eq!(cm.close_all(), 0);

        assert!(cm.drain(Duration::from_secs(5)).await);
        assert_eq!(collector.received(&id("b")), "b\n");
    }

    // ── Keepalive ───────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn keepalive_window_and_expiry() {
        let (logs, _guard) = capture_logs();
        let (cm, collector) = manager(Behavior::ReadAll);
        let id = id("ka");
        let start = Instant::now();

        assert!(cm.send(&id, "1 open").await.unwrap());

        // Just inside the window: still open.
        time::sleep(W - MS).await;
        assert!(!cm.send(&id, "2 still open").await.unwrap());

        // A keepalive restarts the window.
        cm.keep_alive(&id).unwrap();
        time::sleep(W - MS).await;
        assert!(!cm.send(&id, "3 open after keepalive").await.unwrap());

        // Let it time out.
        time::sleep(W + MS).await;
        assert!(!cm.is_open(&id));
        assert!(matches!(
            cm.send(&id, "4 should fail").await,
            Err(ConnError::NoConnection { seq: 4 })
        ));

        assert!(cm.drain(Duration::from_secs(1)).await);
        assert_eq!(
            collector.received(&id),
            "open\nstill open\nopen after keepalive\n"
        );
        let ended = collector.ended_at.lock()[&id];
        assert_eq!(ended - start, 3 * W - 2 * MS);

        let events = logs.matching("closed connection after timeout");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].field("session"), Some("ka"));
        assert_eq!(logs.count_at_least(Level::WARN), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lines_keep_session_alive() {
        let (logs, _guard) = capture_logs();
        let (cm, collector) = manager(Behavior::ReadAll);
        let id = id("busy");

        assert!(cm.send(&id, "1 line").await.unwrap());
        for n in 2..=(5 * W.as_secs()) {
            time::sleep(Duration::from_secs(1)).await;
            assert!(!cm.send(&id, &format!("{n} line")).await.unwrap());
        }
        assert!(cm.is_open(&id));
        assert_eq!(collector.opened(), 1);
        assert!(!logs.has_message("after timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn keepalives_keep_session_alive_indefinitely() {
        let (cm, _collector) = manager(Behavior::ReadAll);
        let id = id("idle");

        assert!(cm.send(&id, "1 line").await.unwrap());
        for _ in 0..50 {
            time::sleep(W - Duration::from_secs(1)).await;
            cm.keep_alive(&id).unwrap();
        }
        assert!(cm.is_open(&id));

        time::sleep(W + MS).await;
        assert!(!cm.is_open(&id));
        assert!(matches!(cm.keep_alive(&id), Err(ConnError::NotOpen)));
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_window_never_expires() {
        let collector = TestCollector::default();
        let cm = ConnManager::with_keepalive(collector.clone(), Duration::from_secs(u64::MAX));
        let id = id("forever");

        assert!(cm.send(&id, "1 open").await.unwrap());
        cm.keep_alive(&id).unwrap();
        time::sleep(W * 1000).await;
        assert!(cm.is_open(&id));

        cm.close_conn(&id).unwrap();
        assert!(cm.drain(Duration::from_secs(1)).await);
        assert_eq!(collector.received(&id), "open\n");
    }

    #[tokio::test(start_paused = true)]
    async fn custom_window_is_shared() {
        let collector = TestCollector::default();
        let cm = ConnManager::with_keepalive(collector, Duration::from_secs(2));
        assert_eq!(cm.keepalive_window(), Duration::from_secs(2));

        assert!(cm.send(&id("a"), "1 a").await.unwrap());
        assert!(cm.send(&id("b"), "1 b").await.unwrap());
        time::sleep(Duration::from_secs(2) + MS).await;
        assert_eq!(cm.open_sessions(), 0);
    }

    // ── Remote end ──────────────────────────────────────────────────

    #[tokio::test]
    async fn rejected_stream_fails_first_send_and_tears_down() {
        let (logs, _guard) = capture_logs();
        let (cm, _collector) = manager(Behavior::Reject);
        let id = id("reject");

        let err = cm.send(&id, "1 x").await.unwrap_err();
        assert!(matches!(err, ConnError::SendFailed(PipeError::Closed)));
        assert!(!cm.is_open(&id));
        assert!(matches!(
            cm.send(&id, "2 y").await,
            Err(ConnError::NoConnection { .. })
        ));

        assert!(logs.has_event(Level::WARN, "outbound stream failed"));
    }

    #[tokio::test]
    async fn collector_hangup_closes_session() {
        let (logs, _guard) = capture_logs();
        let (cm, collector) = manager(Behavior::HangUpAfter(1));
        let id = id("hangup");

        assert!(cm.send(&id, "1 only line").await.unwrap());
        assert!(cm.drain(Duration::from_secs(5)).await);

        assert!(!cm.is_open(&id));
        assert_eq!(collector.received(&id), "only line\n");
        assert!(logs.has_event(Level::INFO, "connection ended"));
        assert!(matches!(
            cm.send(&id, "2 after").await,
            Err(ConnError::NoConnection { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_stream_does_not_close_new_session() {
        let (logs, _guard) = capture_logs();
        let (cm, collector) = manager(Behavior::Linger(Duration::from_secs(5)));
        let id = id("reuse");

        assert!(cm.send(&id, "1 old").await.unwrap());
        cm.close_conn(&id).unwrap();
        assert!(cm.send(&id, "1 new").await.unwrap());

        // The old stream finishes while the new session is open.
        time::sleep(Duration::from_secs(6)).await;
        assert!(cm.is_open(&id));
        assert!(!cm.send(&id, "2 still new").await.unwrap());
        assert!(!logs.has_message("connection ended"));
        assert_eq!(collector.opened(), 2);
    }

    // ── Concurrency ─────────────────────────────────────────────────

    #[tokio::test]
    async fn blocked_send_fails_when_closed() {
        let (cm, _collector) = manager(Behavior::StallSlow);
        let id = id("slow-1");

        let sender = {
            let cm = cm.clone();
            let id = id.clone();
            tokio::spawn(async move { cm.send(&id, "1 stuck").await })
        };
        tokio::task::yield_now().await;
        assert!(cm.is_open(&id));
        assert!(!sender.is_finished());

        cm.close_conn(&id).unwrap();
        let result = sender.await.unwrap();
        assert!(matches!(result, Err(ConnError::SendFailed(_))));
    }

    #[tokio::test]
    async fn stalled_session_does_not_block_others() {
        let (cm, collector) = manager(Behavior::StallSlow);
        let slow = id("slow-2");
        let fast = id("fast");

        let _stuck = {
            let cm = cm.clone();
            let slow = slow.clone();
            tokio::spawn(async move { cm.send(&slow, "1 stuck").await })
        };
        tokio::task::yield_now().await;

        for n in 1..=20 {
            let _ = cm.send(&fast, &format!("{n} ok")).await.unwrap();
        }
        cm.keep_alive(&slow).unwrap();
        cm.close_conn(&fast).unwrap();
        assert_eq!(collector.received(&fast).lines().count(), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn interleaved_sessions_keep_their_own_order() {
        let (cm, collector) = manager(Behavior::ReadAll);
        let ids = [id("left"), id("right")];

        let mut tasks = Vec::new();
        for sid in ids.clone() {
            let cm = cm.clone();
            tasks.push(tokio::spawn(async move {
                for n in 1..=100 {
                    let opened = cm.send(&sid, &format!("{n} {sid}-{n}")).await.unwrap();
                    assert_eq!(opened, n == 1);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(cm.close_all(), 2);
        assert!(cm.drain(Duration::from_secs(5)).await);

        for sid in &ids {
            let want: String = (1..=100).map(|n| format!("{sid}-{n}\n")).collect();
            assert_eq!(collector.received(sid), want);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_closes_tear_down_once() {
        let (cm, _collector) = manager(Behavior::ReadAll);
        let id = id("race");
        assert!(cm.send(&id, "1 x").await.unwrap());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cm = cm.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move { cm.close_conn(&id).is_ok() }));
        }
        let mut successes = 0;
        for task in tasks {
            if task.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert!(!cm.is_open(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn close_racing_timer_is_a_no_op() {
        let (logs, _guard) = capture_logs();
        let (cm, _collector) = manager(Behavior::ReadAll);
        let id = id("race-timer");

        assert!(cm.send(&id, "1 x").await.unwrap());
        time::sleep(W - MS).await;
        cm.close_conn(&id).unwrap();
        time::sleep(W).await;

        assert!(!logs.has_message("after timeout"));
        assert!(matches!(cm.close_conn(&id), Err(ConnError::NotOpen)));
    }
}
