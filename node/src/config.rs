//! Node configuration with TOML file support.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wavelet_network::RegistryConfig;
use wavelet_protocol::{Version, PROTOCOL_VERSION};
use wavelet_types::{Scheme, Signature};

use crate::NodeError;

/// Configuration for a wavelet node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network scheme byte, appended to the application name in handshakes.
    #[serde(default = "default_scheme")]
    pub scheme: Scheme,

    #[serde(default = "default_application")]
    pub application: String,

    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Address to accept peer connections on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Address announced to peers in the handshake.
    #[serde(default)]
    pub declared_address: Option<SocketAddr>,

    /// Data directory for block storage.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Hex signature of the genesis block. Without it any block with a zero
    /// parent is accepted as genesis.
    #[serde(default)]
    pub genesis_signature: Option<String>,

    /// `host:port` peers registered on startup.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    #[serde(default = "default_protocol_version")]
    pub protocol_version: Version,

    // -- Dispatcher --
    #[serde(default = "default_reconnection_interval_ms")]
    pub reconnection_interval_ms: u64,

    #[serde(default = "default_thirty")]
    pub dial_timeout_secs: u64,

    #[serde(default = "default_thirty")]
    pub handshake_write_timeout_secs: u64,

    #[serde(default = "default_thirty")]
    pub handshake_read_timeout_secs: u64,

    /// Addresses dialed per reconnection tick.
    #[serde(default = "default_dial_batch_size")]
    pub dial_batch_size: usize,

    #[serde(default = "default_redial_backoff_secs")]
    pub redial_backoff_secs: u64,

    #[serde(default = "default_max_dial_failures")]
    pub max_dial_failures: u32,

    // -- Synchronization --
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    #[serde(default = "default_signatures_timeout_secs")]
    pub signatures_timeout_secs: u64,

    #[serde(default = "default_thirty")]
    pub block_timeout_secs: u64,

    /// Pause when the best peer has not reported a score yet.
    #[serde(default = "default_zero_score_backoff_secs")]
    pub zero_score_backoff_secs: u64,

    #[serde(default = "default_max_signatures_per_response")]
    pub max_signatures_per_response: usize,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// -- Serde default helpers --

fn default_scheme() -> Scheme {
    Scheme::MAINNET
}

fn default_application() -> String {
    "wavelet".to_string()
}

fn default_node_name() -> String {
    "wavelet-node".to_string()
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], Scheme::MAINNET.default_port()))
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./wavelet_data")
}

fn default_protocol_version() -> Version {
    PROTOCOL_VERSION
}

fn default_reconnection_interval_ms() -> u64 {
    1_000
}

fn default_thirty() -> u64 {
    30
}

fn default_dial_batch_size() -> usize {
    16
}

fn default_redial_backoff_secs() -> u64 {
    60
}

fn default_max_dial_failures() -> u32 {
    1
}

fn default_sync_interval_ms() -> u64 {
    5_000
}

fn default_signatures_timeout_secs() -> u64 {
    15
}

fn default_zero_score_backoff_secs() -> u64 {
    5
}

fn default_max_signatures_per_response() -> usize {
    100
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// -- Impl --

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        let config: Self = toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the node cannot run with. Periodic timers need a
    /// non-zero period.
    pub fn validate(&self) -> Result<(), NodeError> {
        for (name, value) in [
            ("reconnection_interval_ms", self.reconnection_interval_ms),
            ("sync_interval_ms", self.sync_interval_ms),
        ] {
            if value == 0 {
                return Err(NodeError::Config(format!("{name} must be greater than 0")));
            }
        }
        if self.dial_batch_size == 0 {
            return Err(NodeError::Config("dial_batch_size must be greater than 0".into()));
        }
        Ok(())
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// The configured genesis signature, if any.
    pub fn genesis(&self) -> Result<Option<Signature>, NodeError> {
        self.genesis_signature
            .as_deref()
            .map(|hex| {
                Signature::from_hex(hex)
                    .map_err(|e| NodeError::Config(format!("genesis_signature: {e}")))
            })
            .transpose()
    }

    /// Resolve `bootstrap_peers` to socket addresses. Entries that fail to
    /// resolve are logged and skipped.
    pub async fn resolve_bootstrap_peers(&self) -> Vec<SocketAddr> {
        let mut out = Vec::new();
        for peer in &self.bootstrap_peers {
            match tokio::net::lookup_host(peer.as_str()).await {
                Ok(addrs) => out.extend(addrs),
                Err(e) => tracing::warn!(%peer, error = %e, "cannot resolve bootstrap peer"),
            }
        }
        out
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            redial_backoff: Duration::from_secs(self.redial_backoff_secs),
            max_dial_failures: self.max_dial_failures,
        }
    }

    pub fn reconnection_interval(&self) -> Duration {
        Duration::from_millis(self.reconnection_interval_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn handshake_write_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_write_timeout_secs)
    }

    pub fn handshake_read_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_read_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn signatures_timeout(&self) -> Duration {
        Duration::from_secs(self.signatures_timeout_secs)
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_secs(self.block_timeout_secs)
    }

    pub fn zero_score_backoff(&self) -> Duration {
        Duration::from_secs(self.zero_score_backoff_secs)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            application: default_application(),
            node_name: default_node_name(),
            listen: default_listen(),
            declared_address: None,
            data_dir: default_data_dir(),
            genesis_signature: None,
            bootstrap_peers: Vec::new(),
            protocol_version: default_protocol_version(),
            reconnection_interval_ms: default_reconnection_interval_ms(),
            dial_timeout_secs: default_thirty(),
            handshake_write_timeout_secs: default_thirty(),
            handshake_read_timeout_secs: default_thirty(),
            dial_batch_size: default_dial_batch_size(),
            redial_backoff_secs: default_redial_backoff_secs(),
            max_dial_failures: default_max_dial_failures(),
            sync_interval_ms: default_sync_interval_ms(),
            signatures_timeout_secs: default_signatures_timeout_secs(),
            block_timeout_secs: default_thirty(),
            zero_score_backoff_secs: default_zero_score_backoff_secs(),
            max_signatures_per_response: default_max_signatures_per_response(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}
