//! Network message types for wavelet node-to-node communication.
//!
//! Every message after the handshake travels inside a [`Frame`]. Requests
//! carry a fresh non-zero `request_id` and the matching response echoes it,
//! which lets the requester correlate replies without relying on message
//! ordering.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use wavelet_types::Signature;

/// Request id carried by frames that answer nothing in particular.
pub const UNSOLICITED: u64 = 0;

/// One framed protocol message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub request_id: u64,
    pub message: WireMessage,
}

impl Frame {
    pub fn new(request_id: u64, message: WireMessage) -> Self {
        Self {
            request_id,
            message,
        }
    }

    /// A frame that does not answer any request.
    pub fn unsolicited(message: WireMessage) -> Self {
        Self::new(UNSOLICITED, message)
    }

    pub fn kind(&self) -> MessageKind {
        self.message.kind()
    }
}

/// All post-handshake payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    // Chain sync
    /// Ask for signatures following the first locator entry the peer knows.
    GetSignatures { locator: Vec<Signature> },
    Signatures { signatures: Vec<Signature> },
    GetBlock { signature: Signature },
    /// A block in its canonical binary encoding.
    Block { bytes: Vec<u8> },

    // Peer state
    Score(u64),
    GetPeers,
    Peers { addresses: Vec<SocketAddr> },
}

/// Payload-free tag of a [`WireMessage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    GetSignatures,
    Signatures,
    GetBlock,
    Block,
    Score,
    GetPeers,
    Peers,
}

impl MessageKind {
    /// Whether this kind answers a request and should be routed to a
    /// waiting subscriber.
    pub fn is_response(self) -> bool {
        matches!(self, Self::Signatures | Self::Block | Self::Peers)
    }
}

impl WireMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::GetSignatures { .. } => MessageKind::GetSignatures,
            Self::Signatures { .. } => MessageKind::Signatures,
            Self::GetBlock { .. } => MessageKind::GetBlock,
            Self::Block { .. } => MessageKind::Block,
            Self::Score(_) => MessageKind::Score,
            Self::GetPeers => MessageKind::GetPeers,
            Self::Peers { .. } => MessageKind::Peers,
        }
    }
}
