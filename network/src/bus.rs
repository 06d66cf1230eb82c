//! Correlates outstanding requests with their responses.
//!
//! A caller that is about to send a request first subscribes for the
//! response kind it expects from that peer. The subscription carries a fresh
//! request id which goes out in the request frame and comes back in the
//! response frame, so any number of requests of the same kind to the same
//! peer can be in flight at once.
//!
//! Dropping a [`Subscription`] cancels it, so every exit path of the caller
//! (success, timeout, error) releases its slot.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use wavelet_messages::{Frame, MessageKind, UNSOLICITED};

use crate::NetworkError;

struct Slot {
    kind: MessageKind,
    sender: oneshot::Sender<Frame>,
}

type SlotKey = (SocketAddr, u64);

#[derive(Default)]
struct Table {
    slots: HashMap<SlotKey, Slot>,
}

impl Table {
    /// Oldest live subscription for `(peer, kind)`. Ids are allocated in
    /// increasing order so the smallest id is the oldest.
    fn oldest(&self, peer: SocketAddr, kind: MessageKind) -> Option<SlotKey> {
        self.slots
            .iter()
            .filter(|((p, _), slot)| *p == peer && slot.kind == kind)
            .map(|(key, _)| *key)
            .min_by_key(|(_, id)| *id)
    }
}

/// Outcome of [`SubscriptionBus::deliver`].
#[derive(Debug)]
pub enum Delivery {
    /// Handed to a waiting subscriber.
    Delivered,
    /// Nobody was waiting; the frame is given back.
    Unmatched(Frame),
    /// A subscriber matched but had already gone away.
    Dropped,
}

/// In-process dispatch table keyed by `(peer, request id)`.
#[derive(Clone)]
pub struct SubscriptionBus {
    table: Arc<Mutex<Table>>,
    next_id: Arc<AtomicU64>,
}

impl Default for SubscriptionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionBus {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(Table::default())),
            next_id: Arc::new(AtomicU64::new(UNSOLICITED + 1)),
        }
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register interest in one `kind` response from `peer`.
    pub fn subscribe(&self, peer: SocketAddr, kind: MessageKind) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.table().slots.insert((peer, id), Slot { kind, sender });
        Subscription {
            bus: self.clone(),
            peer,
            kind,
            id,
            receiver,
        }
    }

    /// Route an inbound response frame from `peer` to its subscriber.
    ///
    /// Matches on `(peer, request_id)` first. A frame without a request id
    /// goes to the oldest subscriber waiting for that kind from that peer.
    /// The send happens after the table lock is released and never blocks.
    pub fn deliver(&self, peer: SocketAddr, frame: Frame) -> Delivery {
        let kind = frame.kind();
        let slot = {
            let mut table = self.table();
            let key = if frame.request_id == UNSOLICITED {
                table.oldest(peer, kind)
            } else {
                Some((peer, frame.request_id))
                    .filter(|key| table.slots.get(key).is_some_and(|s| s.kind == kind))
            };
            key.and_then(|key| table.slots.remove(&key))
        };

        match slot {
            None => Delivery::Unmatched(frame),
            Some(slot) => match slot.sender.send(frame) {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Dropped,
            },
        }
    }

    /// Drop every subscription waiting on `peer`. Their receivers resolve
    /// immediately with [`NetworkError::SubscriptionClosed`].
    pub fn cancel_peer(&self, peer: SocketAddr) {
        self.table().slots.retain(|(p, _), _| *p != peer);
    }

    fn cancel(&self, peer: SocketAddr, id: u64) {
        self.table().slots.remove(&(peer, id));
    }

    /// Number of live subscriptions.
    pub fn pending(&self) -> usize {
        self.table().slots.len()
    }
}

/// A pending response. Dropping it releases the registration.
pub struct Subscription {
    bus: SubscriptionBus,
    peer: SocketAddr,
    kind: MessageKind,
    id: u64,
    receiver: oneshot::Receiver<Frame>,
}

impl Subscription {
    /// Request id to put in the outgoing request frame.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Wait up to `timeout` for the response.
    pub async fn recv(mut self, timeout: Duration) -> Result<Frame, NetworkError> {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(NetworkError::SubscriptionClosed {
                peer: self.peer,
                kind: self.kind,
            }),
            Err(_) => Err(NetworkError::ResponseTimeout {
                peer: self.peer,
                kind: self.kind,
            }),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.cancel(self.peer, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavelet_messages::WireMessage;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn signatures(id: u64) -> Frame {
        Frame::new(id, WireMessage::Signatures { signatures: vec![] })
    }

    #[tokio::test]
    async fn delivers_to_matching_subscriber() {
        let bus = SubscriptionBus::new();
        let sub = bus.subscribe(peer(1), MessageKind::Signatures);
        let id = sub.id();
        assert!(matches!(bus.deliver(peer(1), signatures(id)), Delivery::Delivered));
        let frame = sub.recv(Duration::from_secs(1)).await.unwrap();
        assert_eq!(frame.request_id, id);
        assert_eq!(bus.pending(), 0);
    }

    #[tokio::test]
    async fn other_peer_does_not_unblock() {
        let bus = SubscriptionBus::new();
        let sub = bus.subscribe(peer(1), MessageKind::Signatures);
        let id = sub.id();
        assert!(matches!(
            bus.deliver(peer(2), signatures(id)),
            Delivery::Unmatched(_)
        ));
        assert!(matches!(
            bus.deliver(peer(2), signatures(UNSOLICITED)),
            Delivery::Unmatched(_)
        ));
        let err = sub.recv(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, NetworkError::ResponseTimeout { .. }));
    }

    #[tokio::test]
    async fn wrong_kind_is_not_delivered() {
        let bus = SubscriptionBus::new();
        let sub = bus.subscribe(peer(1), MessageKind::Block);
        let frame = signatures(sub.id());
        assert!(matches!(bus.deliver(peer(1), frame), Delivery::Unmatched(_)));
        assert_eq!(bus.pending(), 1);
    }

    #[tokio::test]
    async fn exactly_one_waiter_unblocked() {
        let bus = SubscriptionBus::new();
        let first = bus.subscribe(peer(1), MessageKind::Signatures);
        let second = bus.subscribe(peer(1), MessageKind::Signatures);
        let second_id = second.id();

        assert!(matches!(
            bus.deliver(peer(1), signatures(second_id)),
            Delivery::Delivered
        ));
        assert!(second.recv(Duration::from_secs(1)).await.is_ok());
        assert!(first.recv(Duration::from_millis(20)).await.is_err());
    }

    #[tokio::test]
    async fn uncorrelated_response_goes_to_oldest() {
        let bus = SubscriptionBus::new();
        let older = bus.subscribe(peer(1), MessageKind::Signatures);
        let newer = bus.subscribe(peer(1), MessageKind::Signatures);

        assert!(matches!(
            bus.deliver(peer(1), signatures(UNSOLICITED)),
            Delivery::Delivered
        ));
        assert!(older.recv(Duration::from_secs(1)).await.is_ok());
        assert_eq!(bus.pending(), 1);
        drop(newer);
        assert_eq!(bus.pending(), 0);
    }

    #[tokio::test]
    async fn timeout_releases_slot() {
        let bus = SubscriptionBus::new();
        let sub = bus.subscribe(peer(1), MessageKind::Block);
        let id = sub.id();
        assert!(sub.recv(Duration::from_millis(10)).await.is_err());
        assert_eq!(bus.pending(), 0);
        let late = Frame::new(id, WireMessage::Block { bytes: vec![] });
        assert!(matches!(bus.deliver(peer(1), late), Delivery::Unmatched(_)));
    }

    #[tokio::test]
    async fn cancel_peer_wakes_waiters() {
        let bus = SubscriptionBus::new();
        let sub = bus.subscribe(peer(1), MessageKind::Peers);
        let other = bus.subscribe(peer(2), MessageKind::Peers);
        bus.cancel_peer(peer(1));
        let err = sub.recv(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, NetworkError::SubscriptionClosed { .. }));
        assert_eq!(bus.pending(), 1);
        drop(other);
    }

    #[test]
    fn ids_are_unique_and_nonzero() {
        let bus = SubscriptionBus::new();
        let a = bus.subscribe(peer(1), MessageKind::Block);
        let b = bus.subscribe(peer(1), MessageKind::Block);
        assert_ne!(a.id(), UNSOLICITED);
        assert_ne!(a.id(), b.id());
    }
}
