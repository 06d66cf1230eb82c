//! Serves requests from connected peers and absorbs their announcements.
//!
//! Store reads run on the blocking pool: a `GetSignatures` walk can touch
//! hundreds of LMDB keys and must not stall the runtime's workers.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::Instrument;
use wavelet_messages::{Frame, WireMessage};
use wavelet_network::{AddressRegistry, InboundMessage, PeerHandle, PeerManager};
use wavelet_store::StoreError;
use wavelet_types::Signature;

use crate::state::StateManager;
use crate::tracing_spans::network_recv_span;

pub struct MessageHandler {
    chain: Arc<dyn StateManager>,
    peers: Arc<PeerManager>,
    registry: Arc<AddressRegistry>,
    /// Gossip input of the dispatcher.
    discovered: mpsc::Sender<Vec<SocketAddr>>,
    max_signatures: usize,
}

impl MessageHandler {
    pub fn new(
        chain: Arc<dyn StateManager>,
        peers: Arc<PeerManager>,
        registry: Arc<AddressRegistry>,
        discovered: mpsc::Sender<Vec<SocketAddr>>,
        max_signatures: usize,
    ) -> Self {
        Self {
            chain,
            peers,
            registry,
            discovered,
            max_signatures,
        }
    }

    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut connected: mpsc::Receiver<PeerHandle>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                Some(handle) = connected.recv() => self.on_connected(&handle),
                message = inbound.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => break,
                },
            }
        }
        tracing::debug!("message handler stopped");
    }

    /// Greet a freshly registered peer with our score and ask for its
    /// peers.
    pub fn on_connected(&self, handle: &PeerHandle) {
        let score = match self.chain.score() {
            Ok(score) => score,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read local score");
                0
            }
        };
        for message in [WireMessage::Score(score), WireMessage::GetPeers] {
            if let Err(e) = handle.try_send(Frame::unsolicited(message)) {
                tracing::debug!(peer = %handle.id(), error = %e, "greeting not sent");
                return;
            }
        }
    }

    pub async fn handle(&self, InboundMessage { peer, frame }: InboundMessage) {
        let span = network_recv_span(peer, &format!("{:?}", frame.kind()));
        let request_id = frame.request_id;
        let reply = self.respond(peer, frame.message).instrument(span).await;

        let Some(reply) = reply else { return };
        let Some(handle) = self.peers.get(&peer) else {
            return;
        };
        if let Err(e) = handle.try_send(Frame::new(request_id, reply)) {
            tracing::debug!(%peer, error = %e, "reply dropped");
        }
    }

    async fn respond(&self, peer: SocketAddr, message: WireMessage) -> Option<WireMessage> {
        match message {
            WireMessage::Score(score) => {
                if self.peers.update_score(&peer, score) {
                    tracing::debug!(%peer, score, "peer score updated");
                }
                None
            }
            WireMessage::GetBlock { signature } => {
                match self.read_chain(move |chain| chain.get_block(&signature)).await {
                    Ok(stored) => Some(WireMessage::Block {
                        bytes: stored.block.to_bytes(),
                    }),
                    Err(e) => {
                        tracing::debug!(%peer, %signature, error = %e, "requested block unavailable");
                        None
                    }
                }
            }
            WireMessage::GetSignatures { locator } => {
                let limit = self.max_signatures;
                match self
                    .read_chain(move |chain| chain.signatures_after(&locator, limit))
                    .await
                {
                    Ok(signatures) => Some(WireMessage::Signatures { signatures }),
                    Err(e) => {
                        tracing::warn!(%peer, error = %e, "cannot list signatures");
                        None
                    }
                }
            }
            WireMessage::GetPeers => {
                let addresses = self
                    .registry
                    .greeted_addresses()
                    .into_iter()
                    .filter(|a| *a != peer)
                    .collect();
                Some(WireMessage::Peers { addresses })
            }
            WireMessage::Peers { addresses } => {
                if !addresses.is_empty() {
                    if let Err(e) = self.discovered.try_send(addresses) {
                        tracing::debug!(%peer, error = %e, "discovered addresses dropped");
                    }
                }
                None
            }
            WireMessage::Signatures { .. } | WireMessage::Block { .. } => {
                tracing::debug!(%peer, "response nobody waits for");
                None
            }
        }
    }

    /// Run a store read on the blocking pool.
    async fn read_chain<T, F>(&self, read: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StateManager) -> Result<T, StoreError> + Send + 'static,
    {
        let chain = Arc::clone(&self.chain);
        match tokio::task::spawn_blocking(move || read(chain.as_ref())).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(format!("store read task failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavelet_crypto::keypair_from_seed;
    use wavelet_ledger::{create_genesis_block, BlockBuilder, GenesisConfig};
    use wavelet_network::{Direction, RegistryConfig};
    use wavelet_nullables::NullStore;
    use wavelet_protocol::PROTOCOL_VERSION;
    use wavelet_types::{Signature, Timestamp};

    use crate::state::ChainState;

    struct Fixture {
        handler: MessageHandler,
        peers: Arc<PeerManager>,
        registry: Arc<AddressRegistry>,
        discovered: mpsc::Receiver<Vec<SocketAddr>>,
        chain: Arc<ChainState<NullStore>>,
    }

    fn fixture() -> Fixture {
        let chain = Arc::new(ChainState::new(Arc::new(NullStore::new())));
        let peers = Arc::new(PeerManager::new());
        let registry = Arc::new(AddressRegistry::new(RegistryConfig::default()));
        let (tx, discovered) = mpsc::channel(4);
        let handler = MessageHandler::new(
            Arc::clone(&chain) as Arc<dyn StateManager>,
            Arc::clone(&peers),
            Arc::clone(&registry),
            tx,
            100,
        );
        Fixture {
            handler,
            peers,
            registry,
            discovered,
            chain,
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn connect(f: &Fixture, port: u16) -> (PeerHandle, mpsc::Receiver<Frame>) {
        let (handle, rx) = PeerHandle::detached(addr(port), Direction::Inbound, PROTOCOL_VERSION);
        f.peers.register(handle.clone());
        (handle, rx)
    }

    fn message(port: u16, request_id: u64, message: WireMessage) -> InboundMessage {
        InboundMessage {
            peer: addr(port),
            frame: Frame::new(request_id, message),
        }
    }

    #[tokio::test]
    async fn score_updates_peer_manager() {
        let f = fixture();
        let (_h, _rx) = connect(&f, 1);
        f.handler.handle(message(1, 0, WireMessage::Score(42))).await;
        assert_eq!(f.peers.score(&addr(1)), Some(42));
    }

    #[tokio::test]
    async fn serves_stored_block_with_request_id() {
        let f = fixture();
        let (_h, mut rx) = connect(&f, 1);
        let kp = keypair_from_seed(&[8u8; 32]);
        let genesis = create_genesis_block(GenesisConfig {
            generator: &kp,
            timestamp: Timestamp::new(1),
            transactions: Vec::new(),
        });
        f.chain.add_block(&genesis).unwrap();

        f.handler
            .handle(message(
                1,
                17,
                WireMessage::GetBlock {
                    signature: genesis.signature,
                },
            ))
            .await;
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.request_id, 17);
        assert_eq!(
            reply.message,
            WireMessage::Block {
                bytes: genesis.to_bytes()
            }
        );
    }

    #[tokio::test]
    async fn missing_block_gets_no_reply() {
        let f = fixture();
        let (_h, mut rx) = connect(&f, 1);
        f.handler
            .handle(message(
                1,
                5,
                WireMessage::GetBlock {
                    signature: Signature([1u8; 64]),
                },
            ))
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_store_answers_empty_signatures() {
        let f = fixture();
        let (_h, mut rx) = connect(&f, 1);
        f.handler
            .handle(message(1, 9, WireMessage::GetSignatures { locator: vec![] }))
            .await;
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.request_id, 9);
        assert_eq!(
            reply.message,
            WireMessage::Signatures { signatures: vec![] }
        );
    }

    #[tokio::test]
    async fn signatures_follow_locator() {
        let f = fixture();
        let (_h, mut rx) = connect(&f, 1);
        let kp = keypair_from_seed(&[8u8; 32]);
        let genesis = create_genesis_block(GenesisConfig {
            generator: &kp,
            timestamp: Timestamp::new(1),
            transactions: Vec::new(),
        });
        let next = BlockBuilder::new(genesis.signature)
            .timestamp(Timestamp::new(2))
            .sign(&kp);
        f.chain.add_block(&genesis).unwrap();
        f.chain.add_block(&next).unwrap();

        f.handler
            .handle(message(
                1,
                3,
                WireMessage::GetSignatures {
                    locator: vec![genesis.signature],
                },
            ))
            .await;
        assert_eq!(
            rx.try_recv().unwrap().message,
            WireMessage::Signatures {
                signatures: vec![genesis.signature, next.signature]
            }
        );
    }

    #[tokio::test]
    async fn get_peers_lists_greeted_addresses_except_requester() {
        let f = fixture();
        let (_h, mut rx) = connect(&f, 1);
        for port in [1, 2, 3] {
            f.registry.register_new_address(addr(port), None);
        }
        f.registry.greeted(addr(1), PROTOCOL_VERSION);
        f.registry.greeted(addr(2), PROTOCOL_VERSION);

        f.handler.handle(message(1, 4, WireMessage::GetPeers)).await;
        assert_eq!(
            rx.try_recv().unwrap().message,
            WireMessage::Peers {
                addresses: vec![addr(2)]
            }
        );
    }

    #[tokio::test]
    async fn peers_are_forwarded_to_dispatcher() {
        let mut f = fixture();
        f.handler
            .handle(message(
                1,
                0,
                WireMessage::Peers {
                    addresses: vec![addr(5), addr(6)],
                },
            ))
            .await;
        assert_eq!(f.discovered.try_recv().unwrap(), vec![addr(5), addr(6)]);
    }

    #[test]
    fn greeting_sends_score_then_get_peers() {
        let f = fixture();
        let (handle, mut rx) = connect(&f, 1);
        f.handler.on_connected(&handle);
        assert_eq!(rx.try_recv().unwrap().message, WireMessage::Score(0));
        assert_eq!(rx.try_recv().unwrap().message, WireMessage::GetPeers);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn long_signature_walk_is_capped_by_response_limit() {
        let f = fixture();
        let (_h, mut rx) = connect(&f, 1);
        let kp = keypair_from_seed(&[8u8; 32]);
        let genesis = create_genesis_block(GenesisConfig {
            generator: &kp,
            timestamp: Timestamp::new(1),
            transactions: Vec::new(),
        });
        f.chain.add_block(&genesis).unwrap();
        let mut parent = genesis.signature;
        for ts in 2..=150 {
            let block = BlockBuilder::new(parent)
                .timestamp(Timestamp::new(ts))
                .sign(&kp);
            f.chain.add_block(&block).unwrap();
            parent = block.signature;
        }

        f.handler
            .handle(message(
                1,
                6,
                WireMessage::GetSignatures {
                    locator: vec![genesis.signature],
                },
            ))
            .await;
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.request_id, 6);
        match reply.message {
            WireMessage::Signatures { signatures } => {
                assert_eq!(signatures.len(), 100);
                assert_eq!(signatures[0], genesis.signature);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
