//! Per-peer session tasks.
//!
//! Every registered peer is a pair of tasks that own the two halves of its
//! socket. The writer drains an `mpsc` queue of outbound frames. The reader
//! decodes inbound frames, hands responses to the [`SubscriptionBus`] and
//! everything else to the node's inbound queue. Nothing else touches the
//! socket; the rest of the node talks to the peer through its
//! [`PeerHandle`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use wavelet_messages::Frame;
use wavelet_protocol::{read_frame, write_frame, Version};

use crate::bus::{Delivery, SubscriptionBus};
use crate::connection::is_transient;
use crate::peer_manager::PeerManager;
use crate::NetworkError;

/// Frames queued per peer before senders see back-pressure.
const OUTBOUND_QUEUE: usize = 256;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Who opened the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A frame received from a peer that is not a response to one of our
/// requests.
#[derive(Debug)]
pub struct InboundMessage {
    pub peer: SocketAddr,
    pub frame: Frame,
}

/// Cheap, cloneable reference to a live peer session.
#[derive(Clone, Debug)]
pub struct PeerHandle {
    id: SocketAddr,
    session: u64,
    direction: Direction,
    version: Version,
    sender: mpsc::Sender<Frame>,
    close: Arc<watch::Sender<bool>>,
}

impl PeerHandle {
    fn new(
        id: SocketAddr,
        direction: Direction,
        version: Version,
    ) -> (Self, mpsc::Receiver<Frame>, watch::Receiver<bool>) {
        let (sender, receiver) = mpsc::channel(OUTBOUND_QUEUE);
        let (close, closed) = watch::channel(false);
        let handle = Self {
            id,
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            direction,
            version,
            sender,
            close: Arc::new(close),
        };
        (handle, receiver, closed)
    }

    /// A handle with no socket behind it. Frames sent to it land on the
    /// returned receiver.
    pub fn detached(
        id: SocketAddr,
        direction: Direction,
        version: Version,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (handle, receiver, _) = Self::new(id, direction, version);
        (handle, receiver)
    }

    /// Remote address; the registry key.
    pub fn id(&self) -> SocketAddr {
        self.id
    }

    /// Distinguishes successive sessions with the same address.
    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Version negotiated in the handshake.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Queue a frame, waiting for room if the queue is full.
    pub async fn send(&self, frame: Frame) -> Result<(), NetworkError> {
        self.sender
            .send(frame)
            .await
            .map_err(|_| NetworkError::PeerGone(self.id))
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, frame: Frame) -> Result<(), NetworkError> {
        self.sender
            .try_send(frame)
            .map_err(|_| NetworkError::PeerGone(self.id))
    }

    /// Ask both session tasks to stop. The socket closes once they do.
    pub fn close(&self) {
        self.close.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.close.borrow() || self.sender.is_closed()
    }
}

/// Everything a session needs besides its socket.
#[derive(Clone)]
pub struct PeerContext {
    pub bus: SubscriptionBus,
    pub peers: Arc<PeerManager>,
    pub inbound: mpsc::Sender<InboundMessage>,
    pub shutdown: broadcast::Sender<()>,
}

/// Register a peer session for `stream` and start its tasks.
///
/// Returns `None` without starting anything if `id` is already connected;
/// the stream is dropped, which closes it.
pub fn spawn_peer(
    stream: TcpStream,
    id: SocketAddr,
    direction: Direction,
    version: Version,
    ctx: &PeerContext,
) -> Option<PeerHandle> {
    let (handle, outbound, closed) = PeerHandle::new(id, direction, version);
    if !ctx.peers.register(handle.clone()) {
        tracing::debug!(peer = %id, "already connected, dropping duplicate session");
        return None;
    }
    tracing::info!(peer = %id, ?direction, %version, "peer registered");

    let (reader, writer) = stream.into_split();
    tokio::spawn(write_loop(
        writer,
        handle.clone(),
        outbound,
        closed.clone(),
        ctx.shutdown.subscribe(),
    ));
    tokio::spawn(read_loop(reader, handle.clone(), closed, ctx.clone()));
    Some(handle)
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    handle: PeerHandle,
    mut outbound: mpsc::Receiver<Frame>,
    mut closed: watch::Receiver<bool>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = closed.changed() => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    if is_transient(&e) {
                        tracing::debug!(peer = %handle.id(), error = %e, "peer write failed");
                    } else {
                        tracing::warn!(peer = %handle.id(), error = %e, "peer write failed");
                    }
                    break;
                }
            }
        }
    }
    handle.close();
    let _ = writer.shutdown().await;
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    handle: PeerHandle,
    mut closed: watch::Receiver<bool>,
    ctx: PeerContext,
) {
    let peer = handle.id();
    let mut shutdown = ctx.shutdown.subscribe();
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = closed.changed() => break,
            result = read_frame(&mut reader) => match result {
                Ok(frame) => frame,
                Err(e) => {
                    if is_transient(&e) {
                        tracing::debug!(%peer, error = %e, "peer disconnected");
                    } else {
                        tracing::warn!(%peer, error = %e, "dropping peer after bad frame");
                    }
                    break;
                }
            },
        };

        let frame = if frame.kind().is_response() {
            match ctx.bus.deliver(peer, frame) {
                Delivery::Delivered => continue,
                Delivery::Dropped => {
                    tracing::debug!(%peer, "response arrived after its waiter left");
                    continue;
                }
                Delivery::Unmatched(frame) => frame,
            }
        } else {
            frame
        };

        if ctx
            .inbound
            .send(InboundMessage { peer, frame })
            .await
            .is_err()
        {
            break;
        }
    }

    handle.close();
    ctx.bus.cancel_peer(peer);
    if ctx.peers.remove(&handle) {
        tracing::info!(%peer, "peer removed");
    }
}
