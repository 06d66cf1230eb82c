use std::net::SocketAddr;

use thiserror::Error;
use wavelet_messages::MessageKind;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("peer {0} disconnected")]
    PeerGone(SocketAddr),

    #[error("timed out waiting for {kind:?} from {peer}")]
    ResponseTimeout { peer: SocketAddr, kind: MessageKind },

    #[error("subscription for {kind:?} from {peer} was dropped")]
    SubscriptionClosed { peer: SocketAddr, kind: MessageKind },
}
