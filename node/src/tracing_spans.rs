//! Pre-built [`tracing::Span`] constructors for common node operations.
//!
//! Consistent span names and field sets make it easy to filter one dial,
//! one inbound handshake or one sync round out of the log stream.

use std::net::SocketAddr;

use tracing::{info_span, Span};
use wavelet_types::Signature;

/// Span covering one outbound connection attempt.
pub fn dial_span(addr: SocketAddr) -> Span {
    info_span!("dial", %addr)
}

/// Span covering the handshake of one accepted connection.
pub fn inbound_span(addr: SocketAddr) -> Span {
    info_span!("inbound", %addr)
}

/// Span covering one synchronization round against `peer`.
pub fn sync_round_span(peer: SocketAddr, score: u64) -> Span {
    info_span!("sync_round", %peer, score)
}

/// Span covering the request, validation and storage of one block.
pub fn block_fetch_span(peer: SocketAddr, signature: &Signature) -> Span {
    info_span!("block_fetch", %peer, %signature)
}

/// Span covering the handling of a single inbound request.
pub fn network_recv_span(peer: SocketAddr, kind: &str) -> Span {
    info_span!("network_recv", %peer, kind)
}
