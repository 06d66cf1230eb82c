//! wavelet full node.
//!
//! Wires the peer-to-peer core together:
//! - [`dispatcher`] dials and accepts connections and runs the handshake;
//! - [`handler`] serves requests from connected peers;
//! - [`sync`] pulls missing blocks from the best-scored peer;
//! - [`state`] is the chain view both of them work against.
//!
//! [`importer`] is the offline transaction-id audit over a chain export.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod importer;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod shutdown;
pub mod state;
pub mod sync;
pub mod tracing_spans;

pub use config::NodeConfig;
pub use dispatcher::{DispatchSettings, Dispatcher, HandshakeFailure};
pub use error::NodeError;
pub use handler::MessageHandler;
pub use importer::{DuplicateAlarm, ImportReport, Importer, MatchedTransaction};
pub use logging::{init_logging, LogFormat};
pub use metrics::NodeMetrics;
pub use node::WaveletNode;
pub use shutdown::{wait_for_signal, ShutdownController, StopSignal};
pub use state::{ChainState, StateManager};
pub use sync::{SyncConfig, SyncState, Synchronizer, TickOutcome};
