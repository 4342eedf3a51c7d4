//! In-memory graphs the server is driving.
//!
//! Each graph sits behind its own `tokio::sync::Mutex`, so turns on one graph
//! run one at a time while independent graphs proceed in parallel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use loom_core::ids::GraphId;
use loom_engine::{GraphState, Session, TurnStatus};

pub struct SessionSlot {
    session: tokio::sync::Mutex<Session>,
    /// Token of the turn currently in flight, reachable without the session lock.
    abort: Mutex<CancellationToken>,
    /// Last known state; readable while a turn holds the session.
    snapshot: Mutex<GraphState>,
    /// Set once the slot leaves the manager. Written under `abort`.
    released: AtomicBool,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        let snapshot = session.snapshot();
        let abort = session.cancel.clone();
        Self {
            session: tokio::sync::Mutex::new(session),
            abort: Mutex::new(abort),
            snapshot: Mutex::new(snapshot),
            released: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> &tokio::sync::Mutex<Session> {
        &self.session
    }

    /// Give the session a fresh cancellation token for the next turn.
    /// Returns false, leaving the session untouched, once the slot is released.
    pub fn begin_turn(&self, session: &mut Session) -> bool {
        {
            let mut abort = self.abort.lock();
            if self.released.load(Ordering::Acquire) {
                return false;
            }
            let token = CancellationToken::new();
            session.cancel = token.clone();
            *abort = token;
        }
        let mut snapshot = session.snapshot();
        snapshot.status = TurnStatus::Running;
        *self.snapshot.lock() = snapshot;
        true
    }

    pub fn end_turn(&self, session: &Session) {
        *self.snapshot.lock() = session.snapshot();
    }

    /// Cancel whatever the session is waiting on.
    pub fn abort(&self) {
        self.abort.lock().cancel();
    }

    /// Cancel the current turn and refuse any later one.
    pub fn release(&self) {
        let abort = self.abort.lock();
        self.released.store(true, Ordering::Release);
        abort.cancel();
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> GraphState {
        self.snapshot.lock().clone()
    }
}

#[derive(Default)]
pub struct SessionManager {
    sessions: DashMap<GraphId, Arc<SessionSlot>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a session. Hands it back if the id is already taken.
    pub fn insert(&self, session: Session) -> Result<Arc<SessionSlot>, Session> {
        match self.sessions.entry(session.id.clone()) {
            Entry::Occupied(_) => Err(session),
            Entry::Vacant(entry) => {
                let slot = Arc::new(SessionSlot::new(session));
                let _ = entry.insert(Arc::clone(&slot));
                Ok(slot)
            }
        }
    }

    /// Clone the slot out so no map guard is held across an await.
    pub fn get(&self, id: &GraphId) -> Option<Arc<SessionSlot>> {
        self.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    pub fn contains(&self, id: &GraphId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn remove(&self, id: &GraphId) -> Option<Arc<SessionSlot>> {
        self.sessions.remove(id).map(|(_, slot)| slot)
    }

    /// Cancel any in-flight turn and forget the session. Callers still
    /// queued on the session lock see a released slot.
    pub fn abandon(&self, id: &GraphId) -> bool {
        match self.remove(id) {
            Some(slot) => {
                slot.release();
                true
            }
            None => false,
        }
    }

    pub fn abort_all(&self) -> usize {
        let mut count = 0;
        for entry in &self.sessions {
            entry.value().abort();
            count += 1;
        }
        count
    }

    pub fn ids(&self) -> Vec<GraphId> {
        let mut ids: Vec<GraphId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
