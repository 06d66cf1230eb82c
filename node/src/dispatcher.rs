//! Connection dispatcher.
//!
//! One central loop reacts to four inputs: shutdown, the reconnection tick,
//! accepted sockets and newly discovered addresses. It never does network
//! I/O itself. Each dial and each inbound handshake runs in its own task,
//! bounded by its own deadlines and by the shutdown signal.
//!
//! A connection attempt goes Dialing, HandshakeSent, HandshakeReceived,
//! Validated, Registered. Leaving early records one of the outcomes in
//! [`HandshakeFailure`] against the address in the registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, MissedTickBehavior};
use tracing::Instrument;
use wavelet_network::{
    is_transient, spawn_peer, AddressRegistry, Direction, PeerContext, PeerHandle,
};
use wavelet_protocol::{DeclaredAddress, Handshake, ProtocolError, Version};
use wavelet_types::{Scheme, Timestamp};

use crate::config::NodeConfig;
use crate::metrics::NodeMetrics;
use crate::node::MIN_TICK;
use crate::tracing_spans::{dial_span, inbound_span};

/// Handshake identity and deadlines.
#[derive(Clone, Debug)]
pub struct DispatchSettings {
    pub application: String,
    pub scheme: Scheme,
    pub version: Version,
    pub node_name: String,
    /// Random per-process value; seeing it come back means we dialed
    /// ourselves.
    pub nonce: u64,
    pub declared_address: Option<SocketAddr>,
    pub reconnection_interval: Duration,
    pub dial_timeout: Duration,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
    pub dial_batch_size: usize,
}

impl DispatchSettings {
    pub fn from_config(config: &NodeConfig, nonce: u64) -> Self {
        Self {
            application: config.application.clone(),
            scheme: config.scheme,
            version: config.protocol_version,
            node_name: config.node_name.clone(),
            nonce,
            declared_address: config.declared_address,
            reconnection_interval: config.reconnection_interval(),
            dial_timeout: config.dial_timeout(),
            write_timeout: config.handshake_write_timeout(),
            read_timeout: config.handshake_read_timeout(),
            dial_batch_size: config.dial_batch_size,
        }
    }

    fn local_handshake(&self) -> Handshake {
        Handshake {
            application: self.application.clone(),
            scheme: self.scheme,
            version: self.version,
            node_name: self.node_name.clone(),
            nonce: self.nonce,
            declared_address: DeclaredAddress(self.declared_address),
            timestamp: Timestamp::now(),
        }
    }
}

/// Why a handshake did not produce a session.
#[derive(Debug)]
pub enum HandshakeFailure {
    /// Closed connection or deadline: try again later.
    Unreachable(String),
    /// Another network's scheme byte, or bytes that are not a handshake.
    /// The address is never dialed again.
    Hostile(ProtocolError),
    /// A well-formed peer of our network that runs another application or
    /// a protocol major we cannot speak. Dropped like a failed dial.
    Incompatible(ProtocolError),
    /// The remote echoed our own nonce.
    SelfConnection,
}

impl HandshakeFailure {
    fn from_protocol(e: ProtocolError) -> Self {
        if is_transient(&e) {
            return Self::Unreachable(e.to_string());
        }
        match e {
            ProtocolError::ApplicationMismatch { .. }
            | ProtocolError::IncompatibleVersion { .. } => Self::Incompatible(e),
            e => Self::Hostile(e),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    settings: Arc<DispatchSettings>,
    registry: Arc<AddressRegistry>,
    ctx: PeerContext,
    metrics: Arc<NodeMetrics>,
    /// Freshly registered sessions, for the message handler to greet.
    connected: mpsc::Sender<PeerHandle>,
}

impl Dispatcher {
    pub fn new(
        settings: DispatchSettings,
        registry: Arc<AddressRegistry>,
        ctx: PeerContext,
        metrics: Arc<NodeMetrics>,
        connected: mpsc::Sender<PeerHandle>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            registry,
            ctx,
            metrics,
            connected,
        }
    }

    /// The central event loop. Returns when shutdown fires or both input
    /// channels close.
    pub async fn run(
        self,
        mut accepted: mpsc::Receiver<(TcpStream, SocketAddr)>,
        mut discovered: mpsc::Receiver<Vec<SocketAddr>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker =
            tokio::time::interval(self.settings.reconnection_interval.max(MIN_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => self.reconnect(),
                Some((stream, remote)) = accepted.recv() => self.spawn_inbound(stream, remote),
                Some(addresses) = discovered.recv() => {
                    let added = self.registry.register_new_addresses(addresses);
                    if added > 0 {
                        tracing::debug!(added, "learned new peer addresses");
                    }
                }
                else => break,
            }
        }
        tracing::info!("dispatcher stopped");
    }

    /// Start a dial for every feasible address that is not connected.
    fn reconnect(&self) {
        for addr in self.registry.feasible_addresses(self.settings.dial_batch_size) {
            if let Some(handle) = self.ctx.peers.get(&addr) {
                self.registry.greeted(addr, handle.version());
                continue;
            }
            let this = self.clone();
            let mut shutdown = self.ctx.shutdown.subscribe();
            tokio::spawn(
                async move {
                    tokio::select! {
                        _ = shutdown.recv() => {}
                        _ = this.dial(addr) => {}
                    }
                }
                .instrument(dial_span(addr)),
            );
        }
    }

    fn spawn_inbound(&self, stream: TcpStream, remote: SocketAddr) {
        let this = self.clone();
        let mut shutdown = self.ctx.shutdown.subscribe();
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = shutdown.recv() => {}
                    _ = this.accept(stream, remote) => {}
                }
            }
            .instrument(inbound_span(remote)),
        );
    }

    /// Dial `addr`, exchange handshakes and register the session.
    pub async fn dial(&self, addr: SocketAddr) -> Option<PeerHandle> {
        let mut stream = match timeout(self.settings.dial_timeout, TcpStream::connect(addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                let state = self.registry.dial_failed(addr);
                tracing::info!(%addr, error = %e, ?state, "dial failed");
                return None;
            }
            Err(_) => {
                let state = self.registry.dial_failed(addr);
                tracing::info!(%addr, ?state, "dial timed out");
                return None;
            }
        };
        self.registry.connected(addr);

        let theirs = match self.outbound_handshake(&mut stream).await {
            Ok(theirs) => theirs,
            Err(failure) => {
                self.record_failure(addr, failure);
                return None;
            }
        };

        self.registry.greeted(addr, theirs.version);
        if let DeclaredAddress(Some(declared)) = theirs.declared_address {
            if declared != addr {
                self.registry.register_new_address(declared, Some(theirs.version));
            }
        }
        self.register(stream, addr, Direction::Outbound, theirs)
    }

    /// Run the inbound side of the handshake on an accepted socket and
    /// register the session.
    pub async fn accept(&self, mut stream: TcpStream, remote: SocketAddr) -> Option<PeerHandle> {
        let theirs = match self.inbound_handshake(&mut stream).await {
            Ok(theirs) => theirs,
            Err(failure) => {
                // The remote port is ephemeral, so there is no address to
                // blame; dropping the stream closes it.
                match failure {
                    HandshakeFailure::Hostile(e) => {
                        tracing::warn!(%remote, error = %e, "rejecting inbound handshake");
                    }
                    other => {
                        tracing::debug!(%remote, failure = ?other, "inbound handshake failed");
                    }
                }
                return None;
            }
        };

        if let DeclaredAddress(Some(declared)) = theirs.declared_address {
            if self.registry.register_new_address(declared, Some(theirs.version)) {
                tracing::debug!(%remote, %declared, "learned declared address");
            }
        }
        self.register(stream, remote, Direction::Inbound, theirs)
    }

    async fn outbound_handshake(&self, stream: &mut TcpStream) -> Result<Handshake, HandshakeFailure> {
        self.send_handshake(stream).await?;
        let theirs = self.receive_handshake(stream).await?;
        self.validate(&theirs)?;
        Ok(theirs)
    }

    async fn inbound_handshake(&self, stream: &mut TcpStream) -> Result<Handshake, HandshakeFailure> {
        let theirs = self.receive_handshake(stream).await?;
        self.validate(&theirs)?;
        self.send_handshake(stream).await?;
        Ok(theirs)
    }

    async fn send_handshake(&self, stream: &mut TcpStream) -> Result<(), HandshakeFailure> {
        let ours = self.settings.local_handshake();
        match timeout(self.settings.write_timeout, ours.write_to(stream)).await {
            Ok(result) => result.map_err(HandshakeFailure::from_protocol),
            Err(_) => Err(HandshakeFailure::Unreachable("handshake write timed out".into())),
        }
    }

    async fn receive_handshake(&self, stream: &mut TcpStream) -> Result<Handshake, HandshakeFailure> {
        match timeout(self.settings.read_timeout, Handshake::read_from(stream)).await {
            Ok(result) => result.map_err(HandshakeFailure::from_protocol),
            Err(_) => Err(HandshakeFailure::Unreachable("handshake read timed out".into())),
        }
    }

    fn validate(&self, theirs: &Handshake) -> Result<(), HandshakeFailure> {
        theirs
            .ensure_network(&self.settings.application, self.settings.scheme)
            .map_err(HandshakeFailure::from_protocol)?;
        theirs
            .ensure_compatible(&self.settings.version)
            .map_err(HandshakeFailure::from_protocol)?;
        if theirs.nonce == self.settings.nonce {
            return Err(HandshakeFailure::SelfConnection);
        }
        Ok(())
    }

    fn record_failure(&self, addr: SocketAddr, failure: HandshakeFailure) {
        match failure {
            HandshakeFailure::Unreachable(reason) => {
                self.registry.connected(addr);
                tracing::info!(%addr, %reason, "peer temporarily unreachable");
            }
            HandshakeFailure::Hostile(e) => {
                self.registry.hostile(addr);
                self.metrics.hostile_addresses.inc();
                tracing::warn!(%addr, error = %e, "marking address hostile");
            }
            HandshakeFailure::Incompatible(e) => {
                self.registry.discard(addr);
                tracing::info!(%addr, error = %e, "discarding incompatible peer");
            }
            HandshakeFailure::SelfConnection => {
                self.registry.discard(addr);
                tracing::info!(%addr, "discarding our own address");
            }
        }
    }

    fn register(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        direction: Direction,
        theirs: Handshake,
    ) -> Option<PeerHandle> {
        let handle = spawn_peer(stream, addr, direction, theirs.version, &self.ctx)?;
        self.metrics.handshakes.inc();
        tracing::info!(
            %addr,
            version = %theirs.version,
            node_name = %theirs.node_name,
            ?direction,
            "handshake complete"
        );
        if let Err(e) = self.connected.try_send(handle.clone()) {
            tracing::debug!(%addr, error = %e, "connected notification dropped");
        }
        Some(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use wavelet_network::{
        AddressState, InboundMessage, PeerManager, RegistryConfig, SubscriptionBus,
    };
    use wavelet_protocol::PROTOCOL_VERSION;

    struct Fixture {
        dispatcher: Dispatcher,
        registry: Arc<AddressRegistry>,
        peers: Arc<PeerManager>,
        connected: mpsc::Receiver<PeerHandle>,
        _inbound: mpsc::Receiver<InboundMessage>,
    }

    fn settings(nonce: u64) -> DispatchSettings {
        DispatchSettings {
            application: "wavelet".into(),
            scheme: Scheme::MAINNET,
            version: PROTOCOL_VERSION,
            node_name: "test".into(),
            nonce,
            declared_address: None,
            reconnection_interval: Duration::from_millis(50),
            dial_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_millis(500),
            dial_batch_size: 8,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(settings(1))
    }

    fn fixture_with(settings: DispatchSettings) -> Fixture {
        let registry = Arc::new(AddressRegistry::new(RegistryConfig::default()));
        let peers = Arc::new(PeerManager::new());
        let (inbound_tx, inbound) = mpsc::channel(16);
        let (shutdown, _) = broadcast::channel(1);
        let ctx = PeerContext {
            bus: SubscriptionBus::new(),
            peers: Arc::clone(&peers),
            inbound: inbound_tx,
            shutdown,
        };
        let (connected_tx, connected) = mpsc::channel(16);
        let dispatcher = Dispatcher::new(
            settings,
            Arc::clone(&registry),
            ctx,
            Arc::new(NodeMetrics::new().unwrap()),
            connected_tx,
        );
        Fixture {
            dispatcher,
            registry,
            peers,
            connected,
            _inbound: inbound,
        }
    }

    fn remote_handshake(scheme: Scheme, nonce: u64) -> Handshake {
        Handshake {
            scheme,
            nonce,
            ..settings(nonce).local_handshake()
        }
    }

    /// A listener that answers `count` dials with `reply` and keeps the
    /// sockets open.
    async fn fake_peer(reply: Handshake, count: usize) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            for _ in 0..count {
                let (mut stream, _) = listener.accept().await.unwrap();
                let reply = reply.clone();
                held.push(tokio::spawn(async move {
                    Handshake::read_from(&mut stream).await.unwrap();
                    reply.write_to(&mut stream).await.unwrap();
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }));
            }
            for task in held {
                let _ = task.await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn successful_dial_registers_peer() {
        let mut f = fixture();
        let addr = fake_peer(remote_handshake(Scheme::MAINNET, 2), 1).await;
        f.registry.register_new_address(addr, None);

        let handle = f.dispatcher.dial(addr).await.unwrap();
        assert_eq!(handle.id(), addr);
        assert_eq!(f.registry.state(&addr), Some(AddressState::Greeted));
        assert!(f.peers.is_connected(&addr));
        assert_eq!(f.connected.recv().await.unwrap().id(), addr);
    }

    #[tokio::test]
    async fn scheme_mismatch_marks_hostile() {
        let f = fixture();
        let addr = fake_peer(remote_handshake(Scheme::TESTNET, 2), 1).await;
        f.registry.register_new_address(addr, None);

        assert!(f.dispatcher.dial(addr).await.is_none());
        assert_eq!(f.registry.state(&addr), Some(AddressState::Hostile));
        assert_eq!(f.peers.connected_count(), 0);
        assert!(f.registry.feasible_addresses(10).is_empty());
    }

    #[tokio::test]
    async fn incompatible_version_discards_address() {
        let f = fixture();
        let reply = Handshake {
            version: Version::new(PROTOCOL_VERSION.major + 1, 0, 0),
            ..remote_handshake(Scheme::MAINNET, 2)
        };
        let addr = fake_peer(reply, 1).await;
        assert!(f.dispatcher.dial(addr).await.is_none());
        assert_eq!(f.registry.state(&addr), Some(AddressState::Discarded));
        assert_eq!(f.dispatcher.metrics.hostile_addresses.get(), 0);
        assert_eq!(f.peers.connected_count(), 0);
    }

    #[tokio::test]
    async fn foreign_application_discards_address() {
        let f = fixture();
        let reply = Handshake {
            application: "otherchain".into(),
            ..remote_handshake(Scheme::MAINNET, 2)
        };
        let addr = fake_peer(reply, 1).await;
        assert!(f.dispatcher.dial(addr).await.is_none());
        assert_eq!(f.registry.state(&addr), Some(AddressState::Discarded));
        assert_eq!(f.dispatcher.metrics.hostile_addresses.get(), 0);
    }

    #[tokio::test]
    async fn refused_dial_discards_address() {
        let f = fixture();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        f.registry.register_new_address(addr, None);

        assert!(f.dispatcher.dial(addr).await.is_none());
        assert_eq!(f.registry.state(&addr), Some(AddressState::Discarded));
        assert!(f.registry.feasible_addresses(10).is_empty());
    }

    #[tokio::test]
    async fn closed_during_handshake_is_unreachable_not_hostile() {
        let f = fixture();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        assert!(f.dispatcher.dial(addr).await.is_none());
        assert_eq!(f.registry.state(&addr), Some(AddressState::Connected));
    }

    #[tokio::test]
    async fn silent_peer_times_out_as_unreachable() {
        let f = fixture();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        assert!(f.dispatcher.dial(addr).await.is_none());
        assert_eq!(f.registry.state(&addr), Some(AddressState::Connected));
    }

    #[tokio::test]
    async fn own_nonce_discards_address() {
        let f = fixture();
        let addr = fake_peer(remote_handshake(Scheme::MAINNET, 1), 1).await;
        assert!(f.dispatcher.dial(addr).await.is_none());
        assert_eq!(f.registry.state(&addr), Some(AddressState::Discarded));
    }

    #[tokio::test]
    async fn concurrent_dials_leave_one_session() {
        let f = fixture();
        let addr = fake_peer(remote_handshake(Scheme::MAINNET, 2), 2).await;
        let (a, b) = tokio::join!(f.dispatcher.dial(addr), f.dispatcher.dial(addr));
        assert_eq!(usize::from(a.is_some()) + usize::from(b.is_some()), 1);
        assert_eq!(f.peers.connected_count(), 1);
    }

    async fn inbound_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (server, remote) = server.unwrap();
        (client.unwrap(), server, remote)
    }

    #[tokio::test]
    async fn inbound_handshake_replies_and_learns_declared_address() {
        let f = fixture();
        let (mut client, server, remote) = inbound_pair().await;
        let declared: SocketAddr = "10.1.2.3:6868".parse().unwrap();
        let hello = Handshake {
            declared_address: DeclaredAddress(Some(declared)),
            ..remote_handshake(Scheme::MAINNET, 9)
        };

        let (accepted, reply) = tokio::join!(f.dispatcher.accept(server, remote), async {
            hello.write_to(&mut client).await.unwrap();
            Handshake::read_from(&mut client).await.unwrap()
        });
        assert!(accepted.is_some());
        assert_eq!(reply.nonce, 1);
        assert!(f.peers.is_connected(&remote));
        assert_eq!(f.registry.state(&declared), Some(AddressState::New));
    }

    #[tokio::test]
    async fn inbound_scheme_mismatch_never_registers() {
        let f = fixture();
        let (mut client, server, remote) = inbound_pair().await;
        let hello = remote_handshake(Scheme::STAGENET, 9);

        let (accepted, _) = tokio::join!(f.dispatcher.accept(server, remote), async {
            hello.write_to(&mut client).await.unwrap();
        });
        assert!(accepted.is_none());
        assert_eq!(f.peers.connected_count(), 0);
    }

    #[tokio::test]
    async fn run_loop_dials_discovered_addresses() {
        let f = fixture();
        let addr = fake_peer(remote_handshake(Scheme::MAINNET, 2), 1).await;
        let (shutdown_tx, _) = broadcast::channel(1);
        let (_accepted_tx, accepted) = mpsc::channel(1);
        let (discovered_tx, discovered) = mpsc::channel(1);
        let task = tokio::spawn(f.dispatcher.clone().run(
            accepted,
            discovered,
            shutdown_tx.subscribe(),
        ));

        discovered_tx.send(vec![addr]).await.unwrap();
        for _ in 0..200 {
            if f.peers.is_connected(&addr) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(f.peers.is_connected(&addr));
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn zero_reconnection_interval_does_not_kill_the_loop() {
        let f = fixture_with(DispatchSettings {
            reconnection_interval: Duration::ZERO,
            ..settings(1)
        });
        let (shutdown_tx, _) = broadcast::channel(1);
        let (_accepted_tx, accepted) = mpsc::channel(1);
        let (_discovered_tx, discovered) = mpsc::channel(1);
        let task = tokio::spawn(f.dispatcher.clone().run(
            accepted,
            discovered,
            shutdown_tx.subscribe(),
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
