//! Session Reaper
//!
//! Cancellable, deadline-based eviction schedule keyed by session id.
//! The schedule holds no timers: the owner polls [`SessionReaper::take_due`]
//! with the current instant, which keeps eviction deterministic under test.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use serde::{Serialize, Deserialize};

use crate::network::session::SessionId;

/// Why a session is scheduled for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Game reached a terminal state.
    Finished,
    /// Every connection left while the game was active.
    Abandoned,
}

/// A pending eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    /// When the session may be deleted.
    pub due: Instant,
    /// Why.
    pub reason: EvictionReason,
}

/// Grace windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperConfig {
    /// Grace after a game finishes.
    pub finished_grace: Duration,
    /// Grace after an active game loses every connection.
    pub abandoned_grace: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            finished_grace: Duration::from_secs(30),
            abandoned_grace: Duration::from_secs(60),
        }
    }
}

/// Eviction schedule.
#[derive(Debug, Default)]
pub struct SessionReaper {
    config: ReaperConfig,
    pending: BTreeMap<SessionId, Eviction>,
}

impl SessionReaper {
    /// Create an empty schedule.
    pub fn new(config: ReaperConfig) -> Self {
        Self {
            config,
            pending: BTreeMap::new(),
        }
    }

    /// Schedule eviction of `id`, returning the effective deadline.
    ///
    /// An existing earlier deadline wins. A finished schedule always
    /// supersedes an abandonment one so reconnects can no longer cancel it.
    pub fn schedule(&mut self, id: SessionId, reason: EvictionReason, now: Instant) -> Instant {
        let grace = match reason {
            EvictionReason::Finished => self.config.finished_grace,
            EvictionReason::Abandoned => self.config.abandoned_grace,
        };
        let candidate = Eviction { due: now + grace, reason };

        let eviction = self.pending.entry(id).or_insert(candidate);
        if eviction.reason == EvictionReason::Abandoned && reason == EvictionReason::Finished {
            eviction.reason = EvictionReason::Finished;
        }
        if candidate.due < eviction.due {
            eviction.due = candidate.due;
        }
        eviction.due
    }

    /// Cancel a pending abandonment. Finished evictions are not cancellable.
    pub fn cancel_abandonment(&mut self, id: &SessionId) -> bool {
        match self.pending.get(id) {
            Some(eviction) if eviction.reason == EvictionReason::Abandoned => {
                self.pending.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Drop any schedule for `id`.
    pub fn cancel(&mut self, id: &SessionId) -> Option<Eviction> {
        self.pending.remove(id)
    }

    /// Remove and return every eviction due at `now`.
    pub fn take_due(&mut self, now: Instant) -> Vec<(SessionId, EvictionReason)> {
        let due: Vec<SessionId> = self.pending
            .iter()
            .filter(|(_, e)| e.due <= now)
            .map(|(id, _)| id.clone())
            .collect();

        due.into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|e| (id, e.reason)))
            .collect()
    }

    /// Pending eviction for `id`.
    pub fn get(&self, id: &SessionId) -> Option<&Eviction> {
        self.pending.get(id)
    }

    /// Whether `id` is scheduled.
    pub fn is_pending(&self, id: &SessionId) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of scheduled evictions.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Cancel everything, returning how many were pending.
    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }
}
