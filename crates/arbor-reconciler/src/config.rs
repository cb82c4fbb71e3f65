#![forbid(unsafe_code)]

//! Reconciler configuration.
//!
//! Every timing constant the reconciler uses lives here so hosts can tune
//! them. Defaults follow the usual interactive budgets: input work expires
//! after a quarter second, background work after five.

use std::time::Duration;

use arbor_core::{LaneConfig, Lanes};

/// Minimum time a suspense fallback stays on screen before retry-lane work
/// may replace it.
pub const DEFAULT_FALLBACK_THROTTLE: Duration = Duration::from_millis(300);

/// Throttle windows shorter than this commit immediately instead of
/// scheduling a timeout.
pub const DEFAULT_THROTTLE_MIN_DELAY: Duration = Duration::from_millis(10);

/// Default number of entries kept in the render trace ring.
pub const DEFAULT_TRACE_CAPACITY: usize = 1024;

/// Tunables for a [`Reconciler`](crate::Reconciler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Starvation windows per lane class.
    pub lanes: LaneConfig,
    /// Minimum on-screen time of a suspense fallback before retries commit.
    pub fallback_throttle: Duration,
    /// Remaining throttle below which the commit is not delayed.
    pub throttle_min_delay: Duration,
    /// Render default-lane work in time slices instead of to completion.
    pub time_slice_default_updates: bool,
    /// Capacity of the render trace ring. Zero disables tracing.
    pub trace_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            lanes: LaneConfig::default(),
            fallback_throttle: DEFAULT_FALLBACK_THROTTLE,
            throttle_min_delay: DEFAULT_THROTTLE_MIN_DELAY,
            time_slice_default_updates: false,
            trace_capacity: DEFAULT_TRACE_CAPACITY,
        }
    }
}

impl ReconcilerConfig {
    /// Whether work on `lanes` may yield between units.
    pub fn should_time_slice(&self, lanes: Lanes) -> bool {
        if lanes.includes_sync_lane() || lanes.includes_some(Lanes::INPUT_CONTINUOUS) {
            return false;
        }
        if lanes.includes_some(Lanes::DEFAULT) {
            return self.time_slice_default_updates;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.fallback_throttle, Duration::from_millis(300));
        assert_eq!(config.throttle_min_delay, Duration::from_millis(10));
        assert!(!config.time_slice_default_updates);
        assert_eq!(config.lanes, LaneConfig::default());
    }

    #[test]
    fn blocking_lanes_never_slice() {
        let config = ReconcilerConfig::default();
        assert!(!config.should_time_slice(Lanes::SYNC));
        assert!(!config.should_time_slice(Lanes::INPUT_CONTINUOUS));
        assert!(!config.should_time_slice(Lanes::DEFAULT));
        assert!(config.should_time_slice(Lanes::TRANSITION_1));
        assert!(config.should_time_slice(Lanes::RETRY_1));
        assert!(config.should_time_slice(Lanes::IDLE));
    }

    #[test]
    fn default_lane_slices_when_enabled() {
        let config = ReconcilerConfig {
            time_slice_default_updates: true,
            ..ReconcilerConfig::default()
        };
        assert!(config.should_time_slice(Lanes::DEFAULT));
        assert!(!config.should_time_slice(Lanes::DEFAULT | Lanes::SYNC));
    }
}
