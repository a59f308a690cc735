//! Matchmaking Queue
//!
//! Players waiting for an opponent, keyed by session candidate key.
//! A player holds at most one waiting entry at a time.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use serde::{Serialize, Deserialize};

use crate::game::state::PlayerId;
use crate::network::registry::ConnectionId;
use crate::network::session::SessionId;

/// How a new arrival finds its counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingStrategy {
    /// Pair only with the entry waiting under the exact same key.
    #[default]
    DirectKey,
    /// Pair with any waiting player; both keys derive the session id.
    AnyWaiting,
}

impl FromStr for PairingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "direct_key" | "direct" => Ok(PairingStrategy::DirectKey),
            "any_waiting" | "any" => Ok(PairingStrategy::AnyWaiting),
            other => Err(format!("unknown pairing strategy: {other}")),
        }
    }
}

impl fmt::Display for PairingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairingStrategy::DirectKey => f.write_str("direct_key"),
            PairingStrategy::AnyWaiting => f.write_str("any_waiting"),
        }
    }
}

/// A player waiting for an opponent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitingEntry {
    /// Key the player waits under.
    pub key: SessionId,
    /// Connection that announced.
    pub connection: ConnectionId,
    /// Waiting player.
    pub player: PlayerId,
    /// When the entry was (re)created.
    pub since: Instant,
}

/// Outcome of an announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    /// No counterpart; the caller now waits.
    Waiting {
        /// Older entry of the same player that this one superseded.
        replaced: Option<WaitingEntry>,
    },
    /// Counterpart found. Both waiting entries are gone.
    Paired(Pairing),
}

/// Two players matched into a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    /// Session id both sides converge on.
    pub session_id: SessionId,
    /// The player who was waiting (moves first).
    pub first: WaitingEntry,
    /// The arriving player.
    pub second: WaitingEntry,
}

/// Deterministic session id for two candidate keys.
///
/// Numeric keys resolve to their numeric max, anything else to the
/// lexicographically greater key. Symmetric in its arguments.
pub fn derive_session_id(a: &SessionId, b: &SessionId) -> SessionId {
    match (a.as_str().trim().parse::<u128>(), b.as_str().trim().parse::<u128>()) {
        (Ok(x), Ok(y)) => if x >= y { a.clone() } else { b.clone() },
        _ => if a >= b { a.clone() } else { b.clone() },
    }
}

/// Waiting players.
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    strategy: PairingStrategy,
    /// Entries by key.
    entries: BTreeMap<SessionId, WaitingEntry>,
    /// Player to key mapping.
    player_keys: BTreeMap<PlayerId, SessionId>,
}

impl MatchmakingQueue {
    /// Create an empty queue.
    pub fn new(strategy: PairingStrategy) -> Self {
        Self {
            strategy,
            entries: BTreeMap::new(),
            player_keys: BTreeMap::new(),
        }
    }

    /// Active strategy.
    pub fn strategy(&self) -> PairingStrategy {
        self.strategy
    }

    /// Announce intent to pair. Pairs with a counterpart or enqueues.
    ///
    /// The same player or the same connection on both sides is never a
    /// pairing: it refreshes the existing waiting slot instead.
    pub fn announce(
        &mut self,
        key: SessionId,
        player: PlayerId,
        connection: ConnectionId,
        now: Instant,
    ) -> Announcement {
        let arrival = WaitingEntry {
            key,
            connection,
            player,
            since: now,
        };

        let counterpart = self.find_counterpart(&arrival);
        if let Some(first) = counterpart.and_then(|key| self.remove_key(&key)) {
            // Any other slot the arriving player or connection held is superseded
            self.remove_player(&arrival.player);
            self.remove_owned_by(arrival.connection);
            let session_id = match self.strategy {
                PairingStrategy::DirectKey => arrival.key.clone(),
                PairingStrategy::AnyWaiting => derive_session_id(&first.key, &arrival.key),
            };
            return Announcement::Paired(Pairing {
                session_id,
                first,
                second: arrival,
            });
        }

        let replaced = self.remove_player(&arrival.player);
        let displaced = self.remove_owned_by(arrival.connection);
        let replaced = replaced.or(displaced);
        self.player_keys.insert(arrival.player.clone(), arrival.key.clone());
        self.entries.insert(arrival.key.clone(), arrival);
        Announcement::Waiting { replaced }
    }

    fn find_counterpart(&self, arrival: &WaitingEntry) -> Option<SessionId> {
        match self.strategy {
            PairingStrategy::DirectKey => self.entries
                .get(&arrival.key)
                .filter(|entry| entry.player != arrival.player)
                .filter(|entry| entry.connection != arrival.connection)
                .map(|entry| entry.key.clone()),
            PairingStrategy::AnyWaiting => self.entries
                .values()
                .filter(|entry| entry.player != arrival.player)
                .filter(|entry| entry.connection != arrival.connection)
                .min_by_key(|entry| entry.since)
                .map(|entry| entry.key.clone()),
        }
    }

    /// Remove the entry under `key` if `connection` still owns it.
    pub fn remove_connection(&mut self, key: &SessionId, connection: ConnectionId) -> Option<WaitingEntry> {
        match self.entries.get(key) {
            Some(entry) if entry.connection == connection => self.remove_key(key),
            _ => None,
        }
    }

    /// Remove whatever entry `connection` announced.
    fn remove_owned_by(&mut self, connection: ConnectionId) -> Option<WaitingEntry> {
        let key = self.entries
            .values()
            .find(|entry| entry.connection == connection)
            .map(|entry| entry.key.clone())?;
        self.remove_key(&key)
    }

    /// Remove the entry under `key`.
    pub fn remove_key(&mut self, key: &SessionId) -> Option<WaitingEntry> {
        let entry = self.entries.remove(key)?;
        self.player_keys.remove(&entry.player);
        Some(entry)
    }

    /// Remove whatever entry `player` holds.
    pub fn remove_player(&mut self, player: &PlayerId) -> Option<WaitingEntry> {
        let key = self.player_keys.remove(player)?;
        self.entries.remove(&key)
    }

    /// Entry under `key`.
    pub fn get(&self, key: &SessionId) -> Option<&WaitingEntry> {
        self.entries.get(key)
    }

    /// Whether anything waits under `key`.
    pub fn contains_key(&self, key: &SessionId) -> bool {
        self.entries.contains_key(key)
    }

    /// Waiting keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &SessionId> {
        self.entries.keys()
    }

    /// Number of waiting players.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nobody waits.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.player_keys.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> SessionId {
        SessionId::new(k)
    }

    fn player(p: &str) -> PlayerId {
        PlayerId::new(p)
    }

    #[test]
    fn test_direct_key_waits_then_pairs() {
        let mut queue = MatchmakingQueue::new(PairingStrategy::DirectKey);
        let now = Instant::now();
        let c1 = ConnectionId::new();
        let c2 = ConnectionId::new();

        let first = queue.announce(key("7"), player("alice"), c1, now);
        assert_eq!(first, Announcement::Waiting { replaced: None });
        assert_eq!(queue.len(), 1);

        match queue.announce(key("7"), player("bob"), c2, now) {
            Announcement::Paired(pairing) => {
                assert_eq!(pairing.session_id, key("7"));
                assert_eq!(pairing.first.player, player("alice"));
                assert_eq!(pairing.first.connection, c1);
                assert_eq!(pairing.second.player, player("bob"));
            }
            other => panic!("expected pairing, got {:?}", other),
        }
        assert!(!queue.contains_key(&key("7")));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_direct_key_ignores_other_keys() {
        let mut queue = MatchmakingQueue::new(PairingStrategy::DirectKey);
        let now = Instant::now();

        queue.announce(key("1"), player("alice"), ConnectionId::new(), now);
        let result = queue.announce(key("2"), player("bob"), ConnectionId::new(), now);

        assert!(matches!(result, Announcement::Waiting { .. }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_same_player_refreshes_own_slot() {
        let mut queue = MatchmakingQueue::new(PairingStrategy::DirectKey);
        let now = Instant::now();
        let old = ConnectionId::new();
        let new = ConnectionId::new();

        queue.announce(key("1"), player("alice"), old, now);
        let result = queue.announce(key("1"), player("ALICE"), new, now);

        match result {
            Announcement::Waiting { replaced: Some(entry) } => assert_eq!(entry.connection, old),
            other => panic!("expected refresh, got {:?}", other),
        }
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get(&key("1")).unwrap().connection, new);
    }

    #[test]
    fn test_new_key_replaces_old_entry() {
        let mut queue = MatchmakingQueue::new(PairingStrategy::DirectKey);
        let now = Instant::now();

        queue.announce(key("1"), player("alice"), ConnectionId::new(), now);
        queue.announce(key("2"), player("alice"), ConnectionId::new(), now);

        assert_eq!(queue.keys().cloned().collect::<Vec<_>>(), vec![key("2")]);
    }

    #[test]
    fn test_any_waiting_pairs_across_keys() {
        let mut queue = MatchmakingQueue::new(PairingStrategy::AnyWaiting);
        let now = Instant::now();

        queue.announce(key("12"), player("alice"), ConnectionId::new(), now);
        let result = queue.announce(key("9"), player("bob"), ConnectionId::new(), now);

        match result {
            Announcement::Paired(pairing) => {
                assert_eq!(pairing.session_id, key("12"));
                assert_eq!(pairing.first.player, player("alice"));
            }
            other => panic!("expected pairing, got {:?}", other),
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_any_waiting_same_key_pairs() {
        let mut queue = MatchmakingQueue::new(PairingStrategy::AnyWaiting);
        let now = Instant::now();

        queue.announce(key("4"), player("alice"), ConnectionId::new(), now);
        let result = queue.announce(key("4"), player("bob"), ConnectionId::new(), now);

        match result {
            Announcement::Paired(pairing) => assert_eq!(pairing.session_id, key("4")),
            other => panic!("expected pairing, got {:?}", other),
        }
    }

    #[test]
    fn test_any_waiting_never_pairs_with_self() {
        let mut queue = MatchmakingQueue::new(PairingStrategy::AnyWaiting);
        let now = Instant::now();

        queue.announce(key("1"), player("alice"), ConnectionId::new(), now);
        let result = queue.announce(key("2"), player("alice"), ConnectionId::new(), now);

        assert!(matches!(result, Announcement::Waiting { replaced: Some(_) }));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_one_connection_never_pairs_with_itself() {
        for strategy in [PairingStrategy::DirectKey, PairingStrategy::AnyWaiting] {
            let mut queue = MatchmakingQueue::new(strategy);
            let now = Instant::now();
            let conn = ConnectionId::new();

            queue.announce(key("7"), player("alice"), conn, now);
            let result = queue.announce(key("7"), player("bob"), conn, now);

            match result {
                Announcement::Waiting { replaced: Some(entry) } => assert_eq!(entry.player, player("alice")),
                other => panic!("expected refresh, got {:?}", other),
            }
            assert_eq!(queue.len(), 1);
            assert_eq!(queue.get(&key("7")).unwrap().player, player("bob"));

            // The displaced player no longer holds a slot
            assert!(queue.remove_player(&player("alice")).is_none());
        }
    }

    #[test]
    fn test_remove_connection_checks_owner() {
        let mut queue = MatchmakingQueue::new(PairingStrategy::DirectKey);
        let now = Instant::now();
        let old = ConnectionId::new();
        let new = ConnectionId::new();

        queue.announce(key("1"), player("alice"), old, now);
        queue.announce(key("1"), player("alice"), new, now);

        assert!(queue.remove_connection(&key("1"), old).is_none());
        assert!(queue.remove_connection(&key("1"), new).is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_derive_session_id() {
        assert_eq!(derive_session_id(&key("9"), &key("12")), key("12"));
        assert_eq!(derive_session_id(&key("12"), &key("9")), key("12"));
        assert_eq!(derive_session_id(&key("abc"), &key("abd")), key("abd"));
        assert_eq!(derive_session_id(&key("10"), &key("x")), key("x"));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("direct-key".parse::<PairingStrategy>().unwrap(), PairingStrategy::DirectKey);
        assert_eq!("ANY_WAITING".parse::<PairingStrategy>().unwrap(), PairingStrategy::AnyWaiting);
        assert!("lobby".parse::<PairingStrategy>().is_err());
    }
}
