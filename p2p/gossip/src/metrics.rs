//! Gossip metrics.
//!
//! One [`Metrics`] instance is created per gossip core and registered into
//! its own [`Registry`]; the node wires that registry into whatever
//! exporter it runs. The core never serves metrics itself.
use prometheus::{IntCounter, IntGauge, Registry};

/// The counters and gauges the gossip core maintains.
///
/// Everything starts at zero.
pub struct Metrics {
    /// Announcements a peer accepted as new.
    pub relay_accepted: IntCounter,
    /// Announcements a peer rejected as already known.
    pub relay_rejected: IntCounter,
    /// Announcements that failed with a transport or remote error.
    pub relay_failed: IntCounter,
    /// Blocks downloaded, validated and stored.
    pub downloads_succeeded: IntCounter,
    /// Failed download attempts: one per retry scheduled and one per
    /// terminal download failure.
    pub downloads_failed: IntCounter,
    /// Download items currently scheduled, tombstones included.
    pub downloads_scheduled: IntGauge,
    /// Download workers currently running.
    pub downloads_ongoing: IntGauge,
    /// Chunked block transfers currently in flight.
    pub fetches_ongoing: IntGauge,

    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! register {
    ($registry:expr, $collector:expr) => {{
        let collector = $collector.unwrap();
        $registry.register(Box::new(collector.clone())).unwrap();
        collector
    }};
}

impl Metrics {
    /// Creates the metrics set, registered into a fresh [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        Self {
            relay_accepted: register!(
                registry,
                IntCounter::new("relay_accepted", "Announcements peers accepted as new")
            ),
            relay_rejected: register!(
                registry,
                IntCounter::new("relay_rejected", "Announcements peers rejected")
            ),
            relay_failed: register!(
                registry,
                IntCounter::new("relay_failed", "Announcements that errored")
            ),
            downloads_succeeded: register!(
                registry,
                IntCounter::new("downloads_succeeded", "Blocks downloaded and stored")
            ),
            downloads_failed: register!(
                registry,
                IntCounter::new("downloads_failed", "Failed download attempts")
            ),
            downloads_scheduled: register!(
                registry,
                IntGauge::new("downloads_scheduled", "Download items currently scheduled")
            ),
            downloads_ongoing: register!(
                registry,
                IntGauge::new("downloads_ongoing", "Download workers currently running")
            ),
            fetches_ongoing: register!(
                registry,
                IntGauge::new("fetches_ongoing", "Chunked block transfers in flight")
            ),
            registry,
        }
    }

    /// The registry every gossip metric is registered in.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Increments a gauge for the guard's lifetime.
pub(crate) struct GaugeGuard(IntGauge);

impl GaugeGuard {
    pub(crate) fn increment(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self(gauge.clone())
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every metric must be declared, and at zero, from startup.
    #[test]
    fn metrics_start_at_zero() {
        let metrics = Metrics::new();

        assert_eq!(metrics.relay_accepted.get(), 0);
        assert_eq!(metrics.relay_rejected.get(), 0);
        assert_eq!(metrics.relay_failed.get(), 0);
        assert_eq!(metrics.downloads_succeeded.get(), 0);
        assert_eq!(metrics.downloads_failed.get(), 0);
        assert_eq!(metrics.downloads_scheduled.get(), 0);
        assert_eq!(metrics.downloads_ongoing.get(), 0);
        assert_eq!(metrics.fetches_ongoing.get(), 0);

        assert_eq!(metrics.registry().gather().len(), 8);
    }

    #[test]
    fn gauge_guard_tracks_lifetime() {
        let metrics = Metrics::new();

        let guard = GaugeGuard::increment(&metrics.fetches_ongoing);
        assert_eq!(metrics.fetches_ongoing.get(), 1);

        drop(guard);
        assert_eq!(metrics.fetches_ongoing.get(), 0);
    }
}
