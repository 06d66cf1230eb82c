//! Chain synchronization against the best-scored peer.
//!
//! One round per tick:
//!
//! 1. pick the connected peer with the highest score;
//! 2. send it our locator and wait for the signatures that follow it;
//! 3. fetch every signature we do not know yet, one block at a time;
//! 4. check each delivered block and hand it to the store.
//!
//! The round is an explicit state machine. Every timeout or failed send
//! goes through [`Synchronizer::abandon`], which drops the round and returns
//! to [`SyncState::Idle`]. A single bad block is rejected on its own and
//! does not end the round.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Instrument;
use wavelet_ledger::Block;
use wavelet_messages::{Frame, MessageKind, WireMessage};
use wavelet_network::{PeerHandle, PeerManager, SubscriptionBus};
use wavelet_types::Signature;

use crate::config::NodeConfig;
use crate::metrics::NodeMetrics;
use crate::state::StateManager;
use crate::tracing_spans::{block_fetch_span, sync_round_span};

/// Timeouts that drive a round.
#[derive(Clone, Copy, Debug)]
pub struct SyncConfig {
    pub signatures_timeout: Duration,
    pub block_timeout: Duration,
    pub zero_score_backoff: Duration,
}

impl From<&NodeConfig> for SyncConfig {
    fn from(config: &NodeConfig) -> Self {
        Self {
            signatures_timeout: config.signatures_timeout(),
            block_timeout: config.block_timeout(),
            zero_score_backoff: config.zero_score_backoff(),
        }
    }
}

/// Where the current round stands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    AwaitingSignatures { peer: SocketAddr },
    AwaitingBlock { peer: SocketAddr, signature: Signature },
}

/// Result of one [`Synchronizer::tick`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nobody to sync from.
    NoPeers,
    /// The best peer has not reported a score; we waited the backoff.
    ZeroScore,
    Abandoned { reason: String },
    Completed {
        requested: usize,
        applied: usize,
        rejected: usize,
    },
}

enum Fetched {
    Applied,
    Rejected,
}

pub struct Synchronizer {
    state: SyncState,
    chain: Arc<dyn StateManager>,
    peers: Arc<PeerManager>,
    bus: SubscriptionBus,
    metrics: Arc<NodeMetrics>,
    config: SyncConfig,
    /// Signatures known to be stored locally.
    known: HashSet<Signature>,
}

impl Synchronizer {
    pub fn new(
        chain: Arc<dyn StateManager>,
        peers: Arc<PeerManager>,
        bus: SubscriptionBus,
        metrics: Arc<NodeMetrics>,
        config: SyncConfig,
    ) -> Self {
        Self {
            state: SyncState::Idle,
            chain,
            peers,
            bus,
            metrics,
            config,
            known: HashSet::new(),
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn is_known(&self, signature: &Signature) -> bool {
        self.known.contains(signature)
    }

    /// Run one synchronization round.
    pub async fn tick(&mut self) -> TickOutcome {
        let Some((peer, score)) = self.peers.peer_with_highest_score() else {
            return TickOutcome::NoPeers;
        };
        if score == 0 {
            tracing::debug!(peer = %peer.id(), "best peer has no score yet, backing off");
            tokio::time::sleep(self.config.zero_score_backoff).await;
            return TickOutcome::ZeroScore;
        }

        let started = Instant::now();
        let span = sync_round_span(peer.id(), score);
        let outcome = self.round(&peer).instrument(span).await;
        self.metrics
            .sync_round_ms
            .observe(started.elapsed().as_secs_f64() * 1_000.0);
        outcome
    }

    async fn round(&mut self, peer: &PeerHandle) -> TickOutcome {
        let signatures = match self.request_signatures(peer).await {
            Ok(signatures) => signatures,
            Err(reason) => return self.abandon(reason),
        };

        let mut requested = 0;
        let mut applied = 0;
        let mut rejected = 0;
        for signature in signatures {
            match self.is_stored(&signature) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(reason) => return self.abandon(reason),
            }
            requested += 1;
            let span = block_fetch_span(peer.id(), &signature);
            match self.fetch_block(peer, signature).instrument(span).await {
                Ok(Fetched::Applied) => applied += 1,
                Ok(Fetched::Rejected) => rejected += 1,
                Err(reason) => {
                    self.announce_score(applied);
                    return self.abandon(reason);
                }
            }
        }

        self.announce_score(applied);
        self.state = SyncState::Idle;
        tracing::debug!(requested, applied, rejected, "sync round completed");
        TickOutcome::Completed {
            requested,
            applied,
            rejected,
        }
    }

    fn is_stored(&mut self, signature: &Signature) -> Result<bool, String> {
        if self.known.contains(signature) {
            return Ok(true);
        }
        match self.chain.has_block(signature) {
            Ok(true) => {
                self.known.insert(*signature);
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => Err(format!("store lookup failed: {e}")),
        }
    }

    async fn request_signatures(&mut self, peer: &PeerHandle) -> Result<Vec<Signature>, String> {
        let locator = self
            .chain
            .locator()
            .map_err(|e| format!("cannot build locator: {e}"))?;

        let subscription = self.bus.subscribe(peer.id(), MessageKind::Signatures);
        self.state = SyncState::AwaitingSignatures { peer: peer.id() };
        peer.send(Frame::new(
            subscription.id(),
            WireMessage::GetSignatures { locator },
        ))
        .await
        .map_err(|e| e.to_string())?;

        let frame = subscription
            .recv(self.config.signatures_timeout)
            .await
            .map_err(|e| e.to_string())?;
        match frame.message {
            WireMessage::Signatures { signatures } => Ok(signatures),
            other => Err(format!("expected signatures, got {:?}", other.kind())),
        }
    }

    /// Request one block and store it if it checks out. `Err` abandons the
    /// round; a bad block is only `Rejected`.
    async fn fetch_block(
        &mut self,
        peer: &PeerHandle,
        signature: Signature,
    ) -> Result<Fetched, String> {
        let subscription = self.bus.subscribe(peer.id(), MessageKind::Block);
        self.state = SyncState::AwaitingBlock {
            peer: peer.id(),
            signature,
        };
        peer.send(Frame::new(subscription.id(), WireMessage::GetBlock { signature }))
            .await
            .map_err(|e| e.to_string())?;

        let frame = subscription
            .recv(self.config.block_timeout)
            .await
            .map_err(|e| e.to_string())?;
        let kind = frame.kind();
        let WireMessage::Block { bytes } = frame.message else {
            return Err(format!("expected block, got {kind:?}"));
        };

        let block = match Block::from_bytes(&bytes) {
            Ok(block) => block,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable block");
                return Ok(self.reject());
            }
        };
        if block.signature != signature {
            tracing::warn!(delivered = %block.signature, "delivered block does not match request");
            return Ok(self.reject());
        }
        if let Err(e) = block.ensure_valid_signature() {
            tracing::warn!(error = %e, "dropping block");
            return Ok(self.reject());
        }

        match self.chain.add_block(&block) {
            Ok(height) => {
                self.known.insert(signature);
                self.metrics.blocks_applied.inc();
                self.metrics.chain_height.set(i64::try_from(height).unwrap_or(i64::MAX));
                tracing::debug!(height, "block stored");
                Ok(Fetched::Applied)
            }
            Err(e) if e.is_orphan() => {
                tracing::info!(error = %e, "skipping orphaned block");
                Ok(self.reject())
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to store block");
                Ok(self.reject())
            }
        }
    }

    fn reject(&self) -> Fetched {
        self.metrics.blocks_rejected.inc();
        Fetched::Rejected
    }

    fn announce_score(&self, applied: usize) {
        if applied == 0 {
            return;
        }
        match self.chain.score() {
            Ok(score) => {
                let reached = self.peers.broadcast(WireMessage::Score(score));
                tracing::debug!(score, reached, "announced new score");
            }
            Err(e) => tracing::warn!(error = %e, "cannot read local score"),
        }
    }

    /// Drop the current round and go back to idle.
    fn abandon(&mut self, reason: String) -> TickOutcome {
        tracing::warn!(state = ?self.state, %reason, "abandoning sync round");
        self.metrics.sync_rounds_abandoned.inc();
        self.state = SyncState::Idle;
        TickOutcome::Abandoned { reason }
    }
}
