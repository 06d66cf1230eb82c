//! Known peer addresses and their connectivity state.
//!
//! Every address learned from configuration, gossip or an inbound handshake
//! lives here with one of the states below. The dispatcher pulls dial
//! candidates with [`AddressRegistry::feasible_addresses`] and reports each
//! attempt's outcome back.
//!
//! ```text
//! New ──> Feasible ──> Connected ──> Greeted
//!             │            │    └──> Hostile
//!             └────────────┴───────> Discarded
//! ```
//!
//! Hostile and Discarded entries are kept for diagnostics but are never
//! offered for dialing again.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use wavelet_protocol::Version;

/// Connectivity state of one known address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressState {
    /// Learned but never dialed.
    New,
    /// Handed out for dialing.
    Feasible,
    /// TCP was established but the handshake did not complete.
    Connected,
    /// Handshake succeeded.
    Greeted,
    /// Violated the protocol. Never dialed again.
    Hostile,
    /// Dialing failed. Never dialed again.
    Discarded,
}

impl AddressState {
    /// States that permanently exclude an address from dialing.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Hostile | Self::Discarded)
    }
}

/// A known address and what we have learned about it.
#[derive(Clone, Debug)]
pub struct KnownAddress {
    pub address: SocketAddr,
    /// Version negotiated at the last successful handshake, or declared by
    /// whoever told us about the address.
    pub version: Option<Version>,
    pub state: AddressState,
    pub last_attempt: Option<Instant>,
    /// Consecutive dial failures.
    pub failures: u32,
}

impl KnownAddress {
    fn new(address: SocketAddr, version: Option<Version>) -> Self {
        Self {
            address,
            version,
            state: AddressState::New,
            last_attempt: None,
            failures: 0,
        }
    }

    fn is_feasible(&self, now: Instant, backoff: Duration) -> bool {
        match self.state {
            AddressState::New => true,
            AddressState::Feasible | AddressState::Connected | AddressState::Greeted => self
                .last_attempt
                .map_or(true, |at| now.saturating_duration_since(at) >= backoff),
            AddressState::Hostile | AddressState::Discarded => false,
        }
    }
}

/// Tunables for [`AddressRegistry`].
#[derive(Clone, Copy, Debug)]
pub struct RegistryConfig {
    /// Minimum time between two dials of the same address.
    pub redial_backoff: Duration,
    /// Dial failures after which an address is discarded.
    pub max_dial_failures: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            redial_backoff: Duration::from_secs(60),
            max_dial_failures: 1,
        }
    }
}

/// Thread-safe map from address to [`KnownAddress`].
///
/// The lock is held only for the state mutation itself.
pub struct AddressRegistry {
    entries: Mutex<HashMap<SocketAddr, KnownAddress>>,
    config: RegistryConfig,
}

impl AddressRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<SocketAddr, KnownAddress>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- Discovery --

    /// Add an address if it is not yet known. Returns whether it was new.
    pub fn register_new_address(&self, address: SocketAddr, version: Option<Version>) -> bool {
        let mut entries = self.entries();
        if entries.contains_key(&address) {
            return false;
        }
        entries.insert(address, KnownAddress::new(address, version));
        tracing::debug!(%address, "new peer address");
        true
    }

    /// Add many addresses. Returns how many were new.
    pub fn register_new_addresses<I>(&self, addresses: I) -> usize
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        addresses
            .into_iter()
            .filter(|addr| self.register_new_address(*addr, None))
            .count()
    }

    // -- Dial candidates --

    /// Up to `limit` addresses eligible for a new dial. Returned entries are
    /// marked Feasible and stamped with the current time.
    pub fn feasible_addresses(&self, limit: usize) -> Vec<SocketAddr> {
        self.feasible_addresses_at(Instant::now(), limit)
    }

    /// [`Self::feasible_addresses`] against an explicit clock reading.
    pub fn feasible_addresses_at(&self, now: Instant, limit: usize) -> Vec<SocketAddr> {
        let mut entries = self.entries();
        let mut picked: Vec<&mut KnownAddress> = entries
            .values_mut()
            .filter(|e| e.is_feasible(now, self.config.redial_backoff))
            .collect();
        // Never-tried first, then least recently tried.
        picked.sort_by_key(|e| (e.state != AddressState::New, e.last_attempt));
        picked
            .into_iter()
            .take(limit)
            .map(|e| {
                e.state = AddressState::Feasible;
                e.last_attempt = Some(now);
                e.address
            })
            .collect()
    }

    // -- Attempt outcomes --

    /// Exclude an address from all future dialing.
    pub fn discard(&self, address: SocketAddr) {
        self.set_state(address, AddressState::Discarded);
    }

    /// Record a failed dial. The address is discarded once it has failed
    /// `max_dial_failures` times in a row. Returns the resulting state.
    pub fn dial_failed(&self, address: SocketAddr) -> AddressState {
        let mut entries = self.entries();
        let entry = entries
            .entry(address)
            .or_insert_with(|| KnownAddress::new(address, None));
        if entry.state.is_terminal() {
            return entry.state;
        }
        entry.failures += 1;
        if entry.failures >= self.config.max_dial_failures {
            entry.state = AddressState::Discarded;
        }
        entry.state
    }

    /// Record an open connection whose handshake did not complete.
    pub fn connected(&self, address: SocketAddr) {
        self.set_state(address, AddressState::Connected);
    }

    /// Record a protocol violation.
    pub fn hostile(&self, address: SocketAddr) {
        self.set_state(address, AddressState::Hostile);
    }

    /// Record a successful handshake.
    pub fn greeted(&self, address: SocketAddr, version: Version) {
        let mut entries = self.entries();
        let entry = entries
            .entry(address)
            .or_insert_with(|| KnownAddress::new(address, None));
        if entry.state.is_terminal() {
            return;
        }
        entry.state = AddressState::Greeted;
        entry.version = Some(version);
        entry.failures = 0;
    }

    fn set_state(&self, address: SocketAddr, state: AddressState) {
        let mut entries = self.entries();
        let entry = entries
            .entry(address)
            .or_insert_with(|| KnownAddress::new(address, None));
        // Terminal states are sticky; Hostile outranks Discarded.
        if entry.state == AddressState::Hostile
            || (entry.state == AddressState::Discarded && state != AddressState::Hostile)
        {
            return;
        }
        entry.state = state;
    }

    // -- Queries --

    pub fn state(&self, address: &SocketAddr) -> Option<AddressState> {
        self.entries().get(address).map(|e| e.state)
    }

    pub fn get(&self, address: &SocketAddr) -> Option<KnownAddress> {
        self.entries().get(address).cloned()
    }

    /// Addresses that completed a handshake, for peer exchange.
    pub fn greeted_addresses(&self) -> Vec<SocketAddr> {
        self.entries()
            .values()
            .filter(|e| e.state == AddressState::Greeted)
            .map(|e| e.address)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl Default for AddressRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
