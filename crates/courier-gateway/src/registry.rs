use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use courier_types::models::Message;

/// Frames queued for one session's writer task.
pub type Outbound = Arc<Message>;

/// Lifecycle of a gateway session.
///
/// `Connecting` covers the HTTP upgrade (token check, membership lookup).
/// A session is `Open` from the moment it is registered until its guard is
/// closed or dropped, after which it is `Closed` and unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

struct SessionEntry {
    user_id: Uuid,
    channels: HashSet<Uuid>,
    tx: mpsc::Sender<Outbound>,
}

/// A point-in-time copy of one subscriber, taken under the read lock.
#[derive(Clone)]
pub struct Subscriber {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub tx: mpsc::Sender<Outbound>,
}

/// Tracks every open WebSocket session and the channels it listens to.
///
/// Locks are never held across an await point; readers get owned snapshots
/// so fan-out can iterate while sessions come and go.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    /// Outbound queue depth per session
    buffer: usize,
    /// Sessions registered since startup
    opened: AtomicU64,
}

impl SessionRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
                buffer: buffer.max(1),
                opened: AtomicU64::new(0),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, SessionEntry>> {
        self.inner.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, SessionEntry>> {
        self.inner.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new open session for `user_id`, subscribed to `channels`.
    pub fn register(
        &self,
        user_id: Uuid,
        channels: impl IntoIterator<Item = Uuid>,
    ) -> (SessionGuard, mpsc::Receiver<Outbound>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let channels: HashSet<Uuid> = channels.into_iter().collect();

        debug!(%session_id, %user_id, channels = channels.len(), "registering session");
        self.inner.opened.fetch_add(1, Ordering::Relaxed);
        self.write().insert(
            session_id,
            SessionEntry {
                user_id,
                channels,
                tx,
            },
        );

        let guard = SessionGuard {
            registry: self.clone(),
            session_id,
            user_id,
            state: SessionState::Open,
        };
        (guard, rx)
    }

    /// Remove a session. Dropping its sender ends the session's writer loop.
    pub fn deregister(&self, session_id: Uuid) -> bool {
        let removed = self.write().remove(&session_id);
        if let Some(entry) = &removed {
            debug!(%session_id, user_id = %entry.user_id, "session deregistered");
        }
        removed.is_some()
    }

    /// Snapshot of the sessions subscribed to `channel_id`.
    pub fn subscribers(&self, channel_id: Uuid) -> Vec<Subscriber> {
        self.read()
            .iter()
            .filter(|(_, entry)| entry.channels.contains(&channel_id))
            .map(|(session_id, entry)| Subscriber {
                session_id: *session_id,
                user_id: entry.user_id,
                tx: entry.tx.clone(),
            })
            .collect()
    }

    pub fn is_subscribed(&self, session_id: Uuid, channel_id: Uuid) -> bool {
        self.read()
            .get(&session_id)
            .is_some_and(|entry| entry.channels.contains(&channel_id))
    }

    /// Subscribe every open session of `user_id` to `channel_id`.
    /// Returns the number of sessions affected.
    pub fn join_channel(&self, user_id: Uuid, channel_id: Uuid) -> usize {
        let mut sessions = self.write();
        let mut touched = 0;
        for entry in sessions.values_mut().filter(|e| e.user_id == user_id) {
            entry.channels.insert(channel_id);
            touched += 1;
        }
        touched
    }

    /// Unsubscribe every open session of `user_id` from `channel_id`.
    pub fn leave_channel(&self, user_id: Uuid, channel_id: Uuid) -> usize {
        let mut sessions = self.write();
        let mut touched = 0;
        for entry in sessions.values_mut().filter(|e| e.user_id == user_id) {
            if entry.channels.remove(&channel_id) {
                touched += 1;
            }
        }
        touched
    }

    pub fn session_count(&self) -> usize {
        self.read().len()
    }

    pub fn sessions_opened(&self) -> u64 {
        self.inner.opened.load(Ordering::Relaxed)
    }

    pub fn sessions_for_user(&self, user_id: Uuid) -> usize {
        self.read().values().filter(|e| e.user_id == user_id).count()
    }

    /// Drop every session of one user, e.g. on logout.
    pub fn close_user(&self, user_id: Uuid) -> usize {
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.user_id != user_id);
        before - sessions.len()
    }

    /// Drop every session; their writer loops observe the closed queue and
    /// send a close frame. Called on server shutdown.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.write().drain().collect();
        if !drained.is_empty() {
            info!("Closing {} gateway sessions", drained.len());
        }
        drained.len()
    }
}

/// Owned handle for one registered session. Dropping it deregisters the
/// session, so a cancelled or panicking connection task cannot leak an entry.
pub struct SessionGuard {
    registry: SessionRegistry,
    session_id: Uuid,
    user_id: Uuid,
    state: SessionState,
}

impl SessionGuard {
    pub fn id(&self) -> Uuid {
        self.session_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.state != SessionState::Closed {
            self.registry.deregister(self.session_id);
            self.state = SessionState::Closed;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release();
    }
}
