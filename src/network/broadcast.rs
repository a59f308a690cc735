//! Outbound Fan-out
//!
//! State transitions produce an [`Outbox`]; the [`Broadcaster`] delivers it
//! to per-connection channels without ever blocking the caller.

use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::network::protocol::ServerMessage;
use crate::network::registry::ConnectionId;

/// One message addressed to a set of connections.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    /// Target connections.
    pub recipients: Vec<ConnectionId>,
    /// Message to deliver.
    pub message: ServerMessage,
}

/// Ordered list of deliveries produced by handling one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outbox {
    items: Vec<Outgoing>,
}

impl Outbox {
    /// Empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Address a message to a single connection.
    pub fn send(&mut self, connection: ConnectionId, message: ServerMessage) {
        self.items.push(Outgoing {
            recipients: vec![connection],
            message,
        });
    }

    /// Address a message to many connections. Skipped when there are none.
    pub fn broadcast<I>(&mut self, recipients: I, message: ServerMessage)
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        let recipients: Vec<ConnectionId> = recipients.into_iter().collect();
        if recipients.is_empty() {
            return;
        }
        self.items.push(Outgoing { recipients, message });
    }

    /// Append another outbox.
    pub fn extend(&mut self, other: Outbox) {
        self.items.extend(other.items);
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of queued messages (not deliveries).
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Iterate queued messages in order.
    pub fn iter(&self) -> impl Iterator<Item = &Outgoing> {
        self.items.iter()
    }

    /// Messages a given connection would receive, in order.
    pub fn messages_for(&self, connection: ConnectionId) -> Vec<&ServerMessage> {
        self.items
            .iter()
            .filter(|o| o.recipients.contains(&connection))
            .map(|o| &o.message)
            .collect()
    }
}

impl IntoIterator for Outbox {
    type Item = Outgoing;
    type IntoIter = std::vec::IntoIter<Outgoing>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Counters from one delivery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Messages handed to a live channel.
    pub delivered: usize,
    /// Recipients skipped because their channel is closed or unknown.
    pub skipped: usize,
    /// Messages dropped because a slow client's buffer was full.
    pub dropped: usize,
}

/// Per-connection outbound channels.
#[derive(Debug, Default)]
pub struct Broadcaster {
    senders: BTreeMap<ConnectionId, mpsc::Sender<ServerMessage>>,
}

impl Broadcaster {
    /// Create with no connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound channel.
    pub fn register(&mut self, connection: ConnectionId, sender: mpsc::Sender<ServerMessage>) {
        self.senders.insert(connection, sender);
    }

    /// Forget a connection.
    pub fn unregister(&mut self, connection: ConnectionId) {
        self.senders.remove(&connection);
    }

    /// Whether the connection has an open channel.
    pub fn is_live(&self, connection: ConnectionId) -> bool {
        self.senders.get(&connection).is_some_and(|s| !s.is_closed())
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Deliver an outbox. Closed channels are skipped and pruned.
    pub fn deliver(&mut self, outbox: Outbox) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut closed = Vec::new();

        for outgoing in outbox {
            for connection in outgoing.recipients {
                let Some(sender) = self.senders.get(&connection) else {
                    report.skipped += 1;
                    continue;
                };
                match sender.try_send(outgoing.message.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Closed(_)) => {
                        report.skipped += 1;
                        closed.push(connection);
                    }
                    Err(TrySendError::Full(_)) => {
                        warn!("Outbound buffer full for connection {}, dropping message", connection);
                        report.dropped += 1;
                    }
                }
            }
        }

        for connection in closed {
            debug!("Pruning closed connection {}", connection);
            self.senders.remove(&connection);
        }

        report
    }

    /// Send one message to every registered connection.
    pub fn announce_all(&mut self, message: ServerMessage) -> DeliveryReport {
        let mut outbox = Outbox::new();
        outbox.broadcast(self.senders.keys().copied(), message);
        self.deliver(outbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::session::SessionId;

    fn not_found(id: &str) -> ServerMessage {
        ServerMessage::NotFound { session_id: SessionId::new(id) }
    }

    #[test]
    fn test_outbox_order_and_filtering() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let mut outbox = Outbox::new();

        outbox.broadcast([a, b], not_found("1"));
        outbox.send(b, not_found("2"));
        outbox.broadcast(Vec::new(), not_found("3"));

        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox.messages_for(a), vec![&not_found("1")]);
        assert_eq!(outbox.messages_for(b), vec![&not_found("1"), &not_found("2")]);
    }

    #[tokio::test]
    async fn test_deliver_in_order() {
        let mut broadcaster = Broadcaster::new();
        let conn = ConnectionId::new();
        let (tx, mut rx) = mpsc::channel(10);
        broadcaster.register(conn, tx);

        let mut outbox = Outbox::new();
        outbox.send(conn, not_found("1"));
        outbox.send(conn, not_found("2"));

        let report = broadcaster.deliver(outbox);
        assert_eq!(report.delivered, 2);
        assert_eq!(rx.recv().await.unwrap(), not_found("1"));
        assert_eq!(rx.recv().await.unwrap(), not_found("2"));
    }

    #[tokio::test]
    async fn test_closed_connections_are_skipped_and_pruned() {
        let mut broadcaster = Broadcaster::new();
        let live = ConnectionId::new();
        let dead = ConnectionId::new();
        let (live_tx, mut live_rx) = mpsc::channel(10);
        let (dead_tx, dead_rx) = mpsc::channel(10);
        broadcaster.register(live, live_tx);
        broadcaster.register(dead, dead_tx);
        drop(dead_rx);

        assert!(!broadcaster.is_live(dead));

        let mut outbox = Outbox::new();
        outbox.broadcast([live, dead, ConnectionId::new()], not_found("1"));
        let report = broadcaster.deliver(outbox);

        assert_eq!(report, DeliveryReport { delivered: 1, skipped: 2, dropped: 0 });
        assert_eq!(live_rx.recv().await.unwrap(), not_found("1"));
        assert_eq!(broadcaster.len(), 1);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_without_blocking() {
        let mut broadcaster = Broadcaster::new();
        let conn = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(1);
        broadcaster.register(conn, tx);

        let mut outbox = Outbox::new();
        outbox.send(conn, not_found("1"));
        outbox.send(conn, not_found("2"));

        let report = broadcaster.deliver(outbox);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert!(broadcaster.is_live(conn));
    }
}
