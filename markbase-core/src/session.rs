use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use markbase_model::{IngestEvent, IngestRequest, SessionId};

/// Extra headroom above the history capacity so a fresh subscriber's queue
/// can hold the full replay plus a burst of live events.
const SUBSCRIBER_QUEUE_HEADROOM: usize = 64;

/// How long the emitter waits on a full subscriber queue before applying the
/// drop policy.
const SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// One live (or recently finished) ingestion run.
///
/// The stop flag is the cooperative cancellation token polled by the
/// coordinator between files; `history` is a bounded ring replayed to late
/// subscribers.
pub struct IngestSession {
    pub id: SessionId,
    pub folder_path: String,
    pub params: IngestRequest,
    pub started_at: DateTime<Utc>,
    stop: AtomicBool,
    done: AtomicBool,
    history_capacity: usize,
    channels: tokio::sync::Mutex<SessionChannels>,
}

impl std::fmt::Debug for IngestSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestSession")
            .field("id", &self.id)
            .field("folder_path", &self.folder_path)
            .field("done", &self.done.load(Ordering::Relaxed))
            .finish()
    }
}

#[derive(Default)]
struct SessionChannels {
    history: VecDeque<IngestEvent>,
    subscribers: Vec<mpsc::Sender<IngestEvent>>,
}

/// Diagnostic snapshot of a session, served by the debug endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub folder: String,
    pub params: IngestRequest,
    pub started_at: DateTime<Utc>,
    pub done: bool,
    pub stop: bool,
    pub history: Vec<IngestEvent>,
}

impl IngestSession {
    pub fn is_cancelled(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn request_cancel(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }

    /// Deliver one event to the history ring and every live subscriber.
    ///
    /// Backpressure policy: wait up to [`SEND_TIMEOUT`] per subscriber; when
    /// the queue is still full, `info` events are dropped for that
    /// subscriber, while warnings, errors, and terminal events wait for the
    /// consumer. A terminal event also closes all subscriber channels.
    pub async fn emit(&self, event: IngestEvent) {
        let mut channels = self.channels.lock().await;

        channels.history.push_back(event.clone());
        while channels.history.len() > self.history_capacity {
            channels.history.pop_front();
        }

        let mut open = Vec::with_capacity(channels.subscribers.len());
        for sender in channels.subscribers.drain(..) {
            let delivered = match sender.send_timeout(event.clone(), SEND_TIMEOUT).await {
                Ok(()) => true,
                Err(mpsc::error::SendTimeoutError::Closed(_)) => false,
                Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                    if event.is_droppable() {
                        debug!("Dropping info event for slow subscriber");
                        true
                    } else {
                        sender.send(event.clone()).await.is_ok()
                    }
                }
            };
            if delivered {
                open.push(sender);
            }
        }
        channels.subscribers = open;

        if event.stage.is_terminal() {
            self.done.store(true, Ordering::Relaxed);
            channels.subscribers.clear();
        }
    }

    /// Attach a subscriber: receives the buffered history followed by live
    /// events, in order. A terminated session yields its history and then
    /// closes immediately.
    pub async fn subscribe(&self) -> mpsc::Receiver<IngestEvent> {
        let mut channels = self.channels.lock().await;
        let (tx, rx) = mpsc::channel(self.history_capacity + SUBSCRIBER_QUEUE_HEADROOM);

        for event in &channels.history {
            // Capacity covers the whole ring, so replay cannot fail.
            let _ = tx.try_send(event.clone());
        }

        if !self.is_done() {
            channels.subscribers.push(tx);
        }
        rx
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let channels = self.channels.lock().await;
        SessionSnapshot {
            session_id: self.id.clone(),
            folder: self.folder_path.clone(),
            params: self.params.clone(),
            started_at: self.started_at,
            done: self.is_done(),
            stop: self.is_cancelled(),
            history: channels.history.iter().cloned().collect(),
        }
    }
}

/// Registry of ingestion sessions: cancel-by-id, active listing, and a
/// grace window after completion so late subscribers can still replay.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<IngestSession>>,
    history_capacity: usize,
    grace: Duration,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl SessionRegistry {
    pub fn new(history_capacity: usize, grace: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            history_capacity,
            grace,
        }
    }

    pub fn start_session(&self, folder_path: String, params: IngestRequest) -> Arc<IngestSession> {
        let session = Arc::new(IngestSession {
            id: SessionId::new(),
            folder_path,
            params,
            started_at: Utc::now(),
            stop: AtomicBool::new(false),
            done: AtomicBool::new(false),
            history_capacity: self.history_capacity,
            channels: tokio::sync::Mutex::new(SessionChannels::default()),
        });
        self.sessions.insert(session.id.clone(), session.clone());
        info!("Started ingestion session {}", session.id);
        session
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<IngestSession>> {
        self.sessions.get(id).map(|entry| entry.clone())
    }

    /// Flip the stop flag. Returns false for unknown sessions; cancelling a
    /// finished session is a no-op that still returns true.
    pub fn request_cancel(&self, id: &SessionId) -> bool {
        match self.sessions.get(id) {
            Some(session) => {
                if !session.is_done() {
                    session.request_cancel();
                    info!("Cancellation requested for session {id}");
                }
                true
            }
            None => false,
        }
    }

    /// Cancel every session that has not finished; returns their ids.
    pub fn cancel_all(&self) -> Vec<SessionId> {
        let mut cancelled = Vec::new();
        for entry in self.sessions.iter() {
            if !entry.value().is_done() {
                entry.value().request_cancel();
                cancelled.push(entry.key().clone());
            }
        }
        cancelled
    }

    pub fn active_ids(&self) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|entry| !entry.value().is_done())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Retire a finished session: keep it around for the grace window so
    /// reconnecting clients can replay, then drop it.
    pub fn end_session(self: Arc<Self>, id: &SessionId) {
        let registry = self;
        let id = id.clone();
        let grace = registry.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.sessions.remove(&id);
            debug!("Session {id} removed after grace period");
        });
    }
}
