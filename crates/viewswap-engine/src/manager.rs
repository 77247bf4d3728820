//! Session ownership
//!
//! One async mutex per participant inside a concurrent map. Two actions of
//! the same participant serialize on that mutex; different participants
//! never contend beyond a map shard lookup.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use viewswap_core::ParticipantId;

use crate::session::Session;

/// Shared handle to one participant's session
pub type SessionSlot = Arc<Mutex<Session>>;

/// Owns every in-memory session
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: DashMap<ParticipantId, SessionSlot>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the participant's session, creating a fresh one on first contact
    pub fn slot(&self, participant: ParticipantId) -> SessionSlot {
        self.sessions
            .entry(participant)
            .or_insert_with(|| Arc::new(Mutex::new(Session::new())))
            .clone()
    }

    /// Get an existing session without creating one
    pub fn get(&self, participant: ParticipantId) -> Option<SessionSlot> {
        self.sessions.get(&participant).map(|slot| slot.clone())
    }

    /// Drop a participant's session
    pub fn remove(&self, participant: ParticipantId) -> bool {
        self.sessions.remove(&participant).is_some()
    }

    /// Drop evictable sessions whose last action is older than `idle_before`
    ///
    /// A session whose slot is held outside the map belongs to an action in
    /// flight and is always kept. Returns the number of sessions dropped.
    pub fn evict_idle(&self, idle_before: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        self.sessions.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let Ok(session) = slot.try_lock() else {
                return true;
            };
            let idle = session.last_action_at.is_none_or(|at| at < idle_before);
            if idle && session.is_evictable() {
                evicted += 1;
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
