use std::time::Duration;

/// The default number of distinct accepted-as-new responses the relay
/// engine aims for per announced hash.
pub(crate) const DEFAULT_RELAY_FACTOR: usize = 2;

/// The default relay saturation, in percent.
///
/// At 90% the relay engine will contact at most `10 * relay_factor` peers
/// per hash before giving up on finding acceptors.
pub(crate) const DEFAULT_RELAY_SATURATION: usize = 90;

/// The default number of fetch permits, i.e. the maximum number of
/// concurrent chunked block transfers.
pub(crate) const DEFAULT_MAX_PARALLEL_DOWNLOADS: usize = 3;

/// The default number of retries against a single source before failing
/// over to the next one.
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;

/// The default delay before the first retry against a source.
pub(crate) const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// The default multiplier applied to the backoff delay after every retry.
pub(crate) const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// The capacity of the scheduler's signal queue.
///
/// The scheduler consumes one signal at a time from a one-slot queue;
/// senders park on the channel until their signal is accepted.
pub(crate) const SIGNAL_QUEUE_SLOTS: usize = 1;

#[cfg(test)]
mod tests {
    use super::*;

    /// A backoff factor below 1.0 would make retries more aggressive over
    /// time, which the retry config rejects.
    #[test]
    fn default_backoff_factor_is_valid() {
        assert!(DEFAULT_BACKOFF_FACTOR >= 1.0);
    }

    /// Saturation is a percentage.
    #[test]
    fn default_relay_saturation_is_a_percentage() {
        assert!(DEFAULT_RELAY_SATURATION <= 100);
    }

    #[test]
    fn scheduler_queue_has_one_slot() {
        assert_eq!(SIGNAL_QUEUE_SLOTS, 1);
    }
}
