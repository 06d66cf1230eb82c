//! P2P networking layer for the wavelet node.
//!
//! Tracks known peer addresses and their connectivity state, owns the
//! per-peer reader/writer tasks, and correlates outstanding requests with
//! their responses.

pub mod bus;
pub mod connection;
pub mod error;
pub mod peer;
pub mod peer_manager;
pub mod registry;

pub use bus::{Delivery, Subscription, SubscriptionBus};
pub use connection::{is_connection_closed, is_transient};
pub use error::NetworkError;
pub use peer::{spawn_peer, Direction, InboundMessage, PeerContext, PeerHandle};
pub use peer_manager::PeerManager;
pub use registry::{AddressRegistry, AddressState, KnownAddress, RegistryConfig};
