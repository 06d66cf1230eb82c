//! Prometheus metrics for the wavelet node.
//!
//! Covers connection handling and chain synchronization. The
//! [`NodeMetrics`] struct owns a dedicated [`Registry`] that an embedding
//! application can encode into the Prometheus text exposition format.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Histogram, HistogramOpts, IntCounter, IntGauge, Opts,
    Registry,
};

/// Central collection of all node-level Prometheus metrics.
pub struct NodeMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // -- Counters --
    /// Handshakes that completed and registered a peer session.
    pub handshakes: IntCounter,
    /// Addresses marked hostile after a protocol violation.
    pub hostile_addresses: IntCounter,
    /// Blocks validated and written to the store.
    pub blocks_applied: IntCounter,
    /// Delivered blocks dropped: mismatched, invalid signature or orphaned.
    pub blocks_rejected: IntCounter,
    /// Sync rounds abandoned on timeout or send failure.
    pub sync_rounds_abandoned: IntCounter,

    // -- Gauges --
    pub connected_peers: IntGauge,
    /// Highest stored height, i.e. the local score.
    pub chain_height: IntGauge,

    // -- Histograms --
    /// Wall time of one sync round, in milliseconds.
    pub sync_round_ms: Histogram,
}

impl NodeMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let handshakes = register_int_counter_with_registry!(
            Opts::new(
                "wavelet_handshakes_total",
                "Handshakes completed with a registered peer"
            ),
            registry
        )?;

        let hostile_addresses = register_int_counter_with_registry!(
            Opts::new(
                "wavelet_hostile_addresses_total",
                "Addresses marked hostile"
            ),
            registry
        )?;

        let blocks_applied = register_int_counter_with_registry!(
            Opts::new(
                "wavelet_blocks_applied_total",
                "Blocks fetched from peers and stored"
            ),
            registry
        )?;

        let blocks_rejected = register_int_counter_with_registry!(
            Opts::new(
                "wavelet_blocks_rejected_total",
                "Blocks fetched from peers and dropped"
            ),
            registry
        )?;

        let sync_rounds_abandoned = register_int_counter_with_registry!(
            Opts::new(
                "wavelet_sync_rounds_abandoned_total",
                "Sync rounds abandoned before completion"
            ),
            registry
        )?;

        let connected_peers = register_int_gauge_with_registry!(
            Opts::new("wavelet_connected_peers", "Current number of connected peers"),
            registry
        )?;

        let chain_height = register_int_gauge_with_registry!(
            Opts::new("wavelet_chain_height", "Highest stored block height"),
            registry
        )?;

        // 1 ms to ~16 s.
        let sync_round_ms = register_histogram_with_registry!(
            HistogramOpts::new("wavelet_sync_round_ms", "Sync round duration in milliseconds")
                .buckets(prometheus::exponential_buckets(1.0, 2.0, 15)?),
            registry
        )?;

        Ok(Self {
            registry,
            handshakes,
            hostile_addresses,
            blocks_applied,
            blocks_rejected,
            sync_rounds_abandoned,
            connected_peers,
            chain_height,
            sync_round_ms,
        })
    }
}
