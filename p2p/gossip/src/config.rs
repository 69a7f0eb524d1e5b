use std::time::Duration;

use galena_wire::Node;

use crate::constants::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_PARALLEL_DOWNLOADS,
    DEFAULT_MAX_RETRIES, DEFAULT_RELAY_FACTOR, DEFAULT_RELAY_SATURATION,
};

/// Classifies a backend error as fatal (abort the download) or transient
/// (eligible for retry and source fail-over).
///
/// The gossip core itself cannot tell a corrupt block from a full disk, so
/// the node supplies this. The default treats every backend error as
/// transient.
pub type FatalClassifier = fn(&tower::BoxError) -> bool;

/// The default [`FatalClassifier`]: no backend error is fatal.
pub fn no_fatal_errors(_: &tower::BoxError) -> bool {
    false
}

/// The retry policy a download worker applies against a single source.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RetryConfig {
    /// The number of retries after the initial attempt. `0` means a single
    /// attempt per source.
    pub max_retries: u32,
    /// The delay before the first retry.
    pub initial_backoff: Duration,
    /// The multiplier applied to the delay after every retry. Must be at
    /// least `1.0`.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl RetryConfig {
    /// The delay before retry number `attempt` (0-based):
    /// `initial_backoff * backoff_factor^attempt`.
    ///
    /// Returns [`None`] if the computation leaves the range a [`Duration`]
    /// can represent, which callers must treat as a fatal configuration
    /// error.
    pub(crate) fn backoff_delay(&self, attempt: u32) -> Option<Duration> {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_factor.powi(exponent);

        Duration::try_from_secs_f64(secs).ok()
    }
}

/// The gossip core config.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// The local node's identity, named as the sender in block
    /// announcements.
    pub local_node: Node,

    /// The number of distinct accepted-as-new responses the relay engine
    /// aims for per announced hash. `0` disables relaying.
    pub relay_factor: usize,
    /// The saturation percentage, `0..=100`.
    ///
    /// Caps the number of peers contacted per hash at
    /// `relay_factor * 100 / (100 - saturation)`; at `100` the cap is
    /// lifted entirely.
    pub relay_saturation: usize,
    /// If `true`, `relay` blocks the caller until the relay round has
    /// finished and returns an already completed handle.
    pub is_synchronous: bool,

    /// The number of fetch permits: concurrent chunked block transfers
    /// across all download workers. Must be at least `1`.
    pub max_parallel_downloads: usize,
    /// The per-source retry policy.
    pub retries: RetryConfig,
    /// Classifies backend errors as fatal or transient.
    pub fatal_classifier: FatalClassifier,
}

impl GossipConfig {
    /// A config with defaults for everything but the local node identity.
    pub fn new(local_node: Node) -> Self {
        Self {
            local_node,
            relay_factor: DEFAULT_RELAY_FACTOR,
            relay_saturation: DEFAULT_RELAY_SATURATION,
            is_synchronous: false,
            max_parallel_downloads: DEFAULT_MAX_PARALLEL_DOWNLOADS,
            retries: RetryConfig::default(),
            fatal_classifier: no_fatal_errors,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.relay_saturation > 100 {
            return Err(ConfigError::SaturationOutOfRange(self.relay_saturation));
        }

        if self.max_parallel_downloads == 0 {
            return Err(ConfigError::NoFetchPermits);
        }

        // A `<` comparison would let NaN through.
        if !(self.retries.backoff_factor >= 1.0) {
            return Err(ConfigError::BackoffFactorTooSmall(
                self.retries.backoff_factor,
            ));
        }

        Ok(())
    }

    /// The maximum number of peers to contact per relayed hash.
    pub(crate) fn max_peers_to_try(&self) -> usize {
        if self.relay_saturation == 100 {
            usize::MAX
        } else {
            self.relay_factor * 100 / (100 - self.relay_saturation)
        }
    }
}

/// An invalid [`GossipConfig`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("relay saturation must be within 0..=100, got {0}")]
    SaturationOutOfRange(usize),
    #[error("max parallel downloads must be at least 1")]
    NoFetchPermits,
    #[error("retry backoff factor must be at least 1.0, got {0}")]
    BackoffFactorTooSmall(f64),
}
