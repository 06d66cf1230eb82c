//! Registry of live peer sessions and their advertised chain scores.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use wavelet_messages::{Frame, WireMessage};

use crate::peer::PeerHandle;

struct Entry {
    handle: PeerHandle,
    /// Last score the peer announced; `None` until it tells us.
    score: Option<u64>,
}

/// One entry per connected remote address.
///
/// Registration is first-wins: a second session for an address that is
/// already connected is refused, so two simultaneous dials to the same peer
/// leave exactly one handler.
pub struct PeerManager {
    peers: Mutex<HashMap<SocketAddr, Entry>>,
    /// Connected count, republished on every register and remove.
    count: watch::Sender<usize>,
}

impl Default for PeerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerManager {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            peers: Mutex::new(HashMap::new()),
            count,
        }
    }

    /// Follow the number of connected peers as sessions come and go.
    pub fn watch_connected(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<SocketAddr, Entry>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- Sessions --

    /// Register a session. Returns `false` (and leaves the existing entry
    /// untouched) if the address is already connected.
    pub fn register(&self, handle: PeerHandle) -> bool {
        let mut peers = self.peers();
        if peers.contains_key(&handle.id()) {
            return false;
        }
        peers.insert(handle.id(), Entry { handle, score: None });
        self.count.send_replace(peers.len());
        true
    }

    /// Remove a session if it is the one currently registered.
    pub fn remove(&self, handle: &PeerHandle) -> bool {
        let mut peers = self.peers();
        match peers.get(&handle.id()) {
            Some(entry) if entry.handle.session() == handle.session() => {
                peers.remove(&handle.id());
                self.count.send_replace(peers.len());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: &SocketAddr) -> Option<PeerHandle> {
        self.peers().get(id).map(|e| e.handle.clone())
    }

    pub fn is_connected(&self, id: &SocketAddr) -> bool {
        self.peers().contains_key(id)
    }

    pub fn connected_count(&self) -> usize {
        self.peers().len()
    }

    pub fn handles(&self) -> Vec<PeerHandle> {
        self.peers().values().map(|e| e.handle.clone()).collect()
    }

    // -- Scores --

    /// Record a peer's announced score. Returns `false` for unknown peers.
    pub fn update_score(&self, id: &SocketAddr, score: u64) -> bool {
        match self.peers().get_mut(id) {
            Some(entry) => {
                entry.score = Some(score);
                true
            }
            None => false,
        }
    }

    /// A connected peer's score. A peer that has not announced one yet
    /// scores 0.
    pub fn score(&self, id: &SocketAddr) -> Option<u64> {
        self.peers().get(id).map(|e| e.score.unwrap_or(0))
    }

    /// Whether the peer has announced a score since it connected.
    pub fn has_reported_score(&self, id: &SocketAddr) -> bool {
        self.peers().get(id).is_some_and(|e| e.score.is_some())
    }

    /// The connected peer with the highest score. Ties go to the lowest
    /// address so the choice is stable.
    pub fn peer_with_highest_score(&self) -> Option<(PeerHandle, u64)> {
        self.peers()
            .iter()
            .map(|(addr, e)| (addr, e, e.score.unwrap_or(0)))
            .max_by(|(a_addr, _, a), (b_addr, _, b)| a.cmp(b).then(b_addr.cmp(a_addr)))
            .map(|(_, e, score)| (e.handle.clone(), score))
    }

    // -- Fan-out --

    /// Queue `message` to every connected peer without waiting. Returns
    /// how many peers accepted it.
    pub fn broadcast(&self, message: WireMessage) -> usize {
        self.handles()
            .into_iter()
            .filter(|h| match h.try_send(Frame::unsolicited(message.clone())) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(peer = %h.id(), error = %e, "broadcast skipped peer");
                    false
                }
            })
            .count()
    }
}
