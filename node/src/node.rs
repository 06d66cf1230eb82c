//! The wavelet node: wires the listener, dispatcher, message handler and
//! synchronization loop together.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use wavelet_network::{AddressRegistry, PeerContext, PeerManager, SubscriptionBus};
use wavelet_store::BlockStore;

use crate::config::NodeConfig;
use crate::dispatcher::{DispatchSettings, Dispatcher};
use crate::handler::MessageHandler;
use crate::metrics::NodeMetrics;
use crate::shutdown::ShutdownController;
use crate::state::{ChainState, StateManager};
use crate::sync::{SyncConfig, Synchronizer, TickOutcome};
use crate::NodeError;

/// Peer messages buffered between the session readers and the handler.
const INBOUND_QUEUE: usize = 1024;
/// Buffer for accepted sockets, discovered address batches and new
/// sessions.
const CONTROL_QUEUE: usize = 64;
/// Floor for timer periods; tokio intervals panic on zero.
pub(crate) const MIN_TICK: std::time::Duration = std::time::Duration::from_millis(1);

/// A running wavelet node.
pub struct WaveletNode {
    pub config: NodeConfig,
    pub chain: Arc<dyn StateManager>,
    pub peers: Arc<PeerManager>,
    pub registry: Arc<AddressRegistry>,
    pub metrics: Arc<NodeMetrics>,
    pub shutdown: ShutdownController,
    bus: SubscriptionBus,
    synchronizer: Arc<Mutex<Synchronizer>>,
    local_addr: Option<SocketAddr>,
    /// Handles for spawned background tasks (joined during shutdown).
    task_handles: Vec<JoinHandle<()>>,
}

impl WaveletNode {
    /// Prepare a node over `store`. Nothing touches the network until
    /// [`WaveletNode::start`].
    pub fn new<S>(config: NodeConfig, store: Arc<S>) -> Result<Self, NodeError>
    where
        S: BlockStore + 'static,
    {
        config.validate()?;
        let chain: Arc<dyn StateManager> = Arc::new(ChainState::new(store));
        let peers = Arc::new(PeerManager::new());
        let registry = Arc::new(AddressRegistry::new(config.registry_config()));
        let metrics = Arc::new(NodeMetrics::new()?);
        let bus = SubscriptionBus::new();

        let height = chain.score()?;
        metrics
            .chain_height
            .set(i64::try_from(height).unwrap_or(i64::MAX));

        let synchronizer = Synchronizer::new(
            Arc::clone(&chain),
            Arc::clone(&peers),
            bus.clone(),
            Arc::clone(&metrics),
            SyncConfig::from(&config),
        );

        Ok(Self {
            config,
            chain,
            peers,
            registry,
            metrics,
            shutdown: ShutdownController::new(),
            bus,
            synchronizer: Arc::new(Mutex::new(synchronizer)),
            local_addr: None,
            task_handles: Vec::new(),
        })
    }

    /// Bind the listener and spawn every background task. Returns the
    /// bound address.
    pub async fn start(&mut self) -> Result<SocketAddr, NodeError> {
        let listener = TcpListener::bind(self.config.listen).await?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);
        tracing::info!(
            %local_addr,
            scheme = %self.config.scheme,
            node_name = %self.config.node_name,
            version = %self.config.protocol_version,
            height = self.chain.score()?,
            "wavelet node starting"
        );

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let (accepted_tx, accepted_rx) = mpsc::channel(CONTROL_QUEUE);
        let (discovered_tx, discovered_rx) = mpsc::channel(CONTROL_QUEUE);
        let (connected_tx, connected_rx) = mpsc::channel(CONTROL_QUEUE);

        let ctx = PeerContext {
            bus: self.bus.clone(),
            peers: Arc::clone(&self.peers),
            inbound: inbound_tx,
            shutdown: self.shutdown.sender(),
        };
        let dispatcher = Dispatcher::new(
            DispatchSettings::from_config(&self.config, rand::random()),
            Arc::clone(&self.registry),
            ctx,
            Arc::clone(&self.metrics),
            connected_tx,
        );
        let handler = MessageHandler::new(
            Arc::clone(&self.chain),
            Arc::clone(&self.peers),
            Arc::clone(&self.registry),
            discovered_tx,
            self.config.max_signatures_per_response,
        );

        let bootstrap = self.config.resolve_bootstrap_peers().await;
        let added = self.registry.register_new_addresses(bootstrap);
        tracing::info!(added, "bootstrap peers registered");

        self.task_handles.push(tokio::spawn(accept_loop(
            listener,
            accepted_tx,
            self.shutdown.subscribe(),
        )));
        self.task_handles.push(tokio::spawn(dispatcher.run(
            accepted_rx,
            discovered_rx,
            self.shutdown.subscribe(),
        )));
        self.task_handles.push(tokio::spawn(handler.run(
            inbound_rx,
            connected_rx,
            self.shutdown.subscribe(),
        )));
        self.task_handles.push(tokio::spawn(connected_peers_loop(
            self.peers.watch_connected(),
            Arc::clone(&self.metrics),
            self.shutdown.subscribe(),
        )));
        self.task_handles.push(tokio::spawn(sync_loop(
            Arc::clone(&self.synchronizer),
            self.config.sync_interval(),
            self.shutdown.subscribe(),
        )));

        Ok(local_addr)
    }

    /// Run one synchronization round now, outside the periodic schedule.
    pub async fn sync_once(&self) -> TickOutcome {
        self.synchronizer.lock().await.tick().await
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Signal every task and wait for them to finish.
    pub async fn stop(&mut self) {
        tracing::info!("wavelet node stopping");
        self.shutdown.shutdown();
        for peer in self.peers.handles() {
            peer.close();
        }
        for handle in self.task_handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task failed");
            }
        }
        tracing::info!("wavelet node stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    accepted: mpsc::Sender<(tokio::net::TcpStream, SocketAddr)>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                tracing::info!("listener shutting down");
                break;
            }
            result = listener.accept() => match result {
                Ok((stream, remote)) => {
                    tracing::debug!(%remote, "accepted connection");
                    if accepted.send((stream, remote)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
        }
    }
}

async fn sync_loop(
    synchronizer: Arc<Mutex<Synchronizer>>,
    period: std::time::Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let period = period.max(MIN_TICK);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let outcome = synchronizer.lock().await.tick().await;
                tracing::trace!(?outcome, "sync tick");
            }
        }
    }
    tracing::debug!("sync loop stopped");
}

/// Keep the connected-peers gauge equal to the peer manager's count.
async fn connected_peers_loop(
    mut count: watch::Receiver<usize>,
    metrics: Arc<NodeMetrics>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let connected = *count.borrow_and_update();
        metrics
            .connected_peers
            .set(i64::try_from(connected).unwrap_or(i64::MAX));
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            changed = count.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
