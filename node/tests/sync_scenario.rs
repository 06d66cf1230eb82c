//! Two real nodes talking over loopback TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use wavelet_crypto::keypair_from_seed;
use wavelet_ledger::{create_genesis_block, Block, BlockBuilder, GenesisConfig};
use wavelet_network::AddressState;
use wavelet_node::{NodeConfig, TickOutcome, WaveletNode};
use wavelet_nullables::NullStore;
use wavelet_store::BlockStore;
use wavelet_types::{Scheme, Timestamp};

fn config(name: &str) -> NodeConfig {
    NodeConfig {
        node_name: name.to_string(),
        listen: "127.0.0.1:0".parse().unwrap(),
        reconnection_interval_ms: 50,
        // Sync only when the test asks for it.
        sync_interval_ms: 3_600_000,
        zero_score_backoff_secs: 0,
        signatures_timeout_secs: 5,
        block_timeout_secs: 5,
        ..NodeConfig::default()
    }
}

fn chain(len: usize) -> Vec<Block> {
    let kp = keypair_from_seed(&[42u8; 32]);
    let mut blocks = vec![create_genesis_block(GenesisConfig {
        generator: &kp,
        timestamp: Timestamp::new(1_000),
        transactions: Vec::new(),
    })];
    for i in 1..len {
        let parent = blocks[i - 1].signature;
        blocks.push(
            BlockBuilder::new(parent)
                .timestamp(Timestamp::new(1_000 + i as u64))
                .transaction(vec![4, i as u8])
                .sign(&kp),
        );
    }
    blocks
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// The single connected peer of `node`, once it has announced its score.
async fn only_peer(node: &WaveletNode) -> SocketAddr {
    wait_until("connection", || node.peers.connected_count() == 1).await;
    let peer = node.peers.handles()[0].id();
    wait_until("score", || node.peers.has_reported_score(&peer)).await;
    peer
}

async fn start(config: NodeConfig, store: Arc<NullStore>) -> WaveletNode {
    let mut node = WaveletNode::new(config, store).unwrap();
    node.start().await.unwrap();
    node
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_score_peer_is_skipped_and_empty_response_changes_nothing() {
    let genesis = chain(1);
    let store_a = Arc::new(NullStore::with_genesis(genesis[0].signature));
    store_a.put(&genesis[0]).unwrap();
    let store_b = Arc::new(NullStore::new());

    let mut b = start(config("b"), Arc::clone(&store_b)).await;
    let b_addr = b.local_addr().unwrap();
    let mut a = start(
        NodeConfig {
            bootstrap_peers: vec![b_addr.to_string()],
            ..config("a")
        },
        Arc::clone(&store_a),
    )
    .await;

    let b_seen_by_a = only_peer(&a).await;
    let a_seen_by_b = only_peer(&b).await;
    assert_eq!(b_seen_by_a, b_addr);

    a.peers.update_score(&b_seen_by_a, 100);
    b.peers.update_score(&a_seen_by_b, 0);

    assert_eq!(b.sync_once().await, TickOutcome::ZeroScore);
    assert_eq!(
        a.sync_once().await,
        TickOutcome::Completed {
            requested: 0,
            applied: 0,
            rejected: 0
        }
    );
    assert_eq!(store_a.len(), 1);
    assert_eq!(store_a.height().unwrap(), 1);
    assert!(store_b.is_empty());

    a.stop().await;
    b.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lagging_node_catches_up() {
    let blocks = chain(6);
    let genesis = blocks[0].signature;
    let store_a = Arc::new(NullStore::with_genesis(genesis));
    for block in &blocks {
        store_a.put(block).unwrap();
    }
    let store_b = Arc::new(NullStore::with_genesis(genesis));
    store_b.put(&blocks[0]).unwrap();

    let mut a = start(config("a"), Arc::clone(&store_a)).await;
    let mut b = start(
        NodeConfig {
            bootstrap_peers: vec![a.local_addr().unwrap().to_string()],
            ..config("b")
        },
        Arc::clone(&store_b),
    )
    .await;

    let a_seen_by_b = only_peer(&b).await;
    assert_eq!(b.peers.score(&a_seen_by_b), Some(6));

    assert_eq!(
        b.sync_once().await,
        TickOutcome::Completed {
            requested: 5,
            applied: 5,
            rejected: 0
        }
    );
    assert_eq!(store_b.height().unwrap(), 6);
    for block in &blocks {
        assert_eq!(store_b.get(&block.signature).unwrap().block, *block);
    }

    // B re-announces its new score to A.
    let b_seen_by_a = a.peers.handles()[0].id();
    wait_until("announced score", || a.peers.score(&b_seen_by_a) == Some(6)).await;

    a.stop().await;
    b.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nodes_of_different_networks_never_connect() {
    let mut main = start(config("main"), Arc::new(NullStore::new())).await;
    let main_addr = main.local_addr().unwrap();
    let mut test = start(
        NodeConfig {
            scheme: Scheme::TESTNET,
            bootstrap_peers: vec![main_addr.to_string()],
            ..config("test")
        },
        Arc::new(NullStore::new()),
    )
    .await;

    // The listener drops a foreign handshake without replying, so the
    // dialer only sees a closed connection.
    wait_until("failed handshake", || {
        test.registry.get(&main_addr).is_some_and(|a| {
            a.state == AddressState::Connected && a.last_attempt.is_some()
        })
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(test.peers.connected_count(), 0);
    assert_eq!(main.peers.connected_count(), 0);
    assert_eq!(test.metrics.handshakes.get(), 0);
    assert_eq!(main.metrics.handshakes.get(), 0);

    test.stop().await;
    main.stop().await;
}
