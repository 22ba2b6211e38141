//! Clustering traits and types.

use crate::error::ClusteringError;
use crate::record::DepositRecord;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A time-stamped object that can be folded into a cluster.
pub trait Clusterable {
    /// Time used for gap and window decisions.
    fn time(&self) -> f64;

    /// Statistical weight; clusters below the configured minimum are dropped.
    fn weight(&self) -> f64;

    /// Folds `other` into `self`.
    fn absorb(&mut self, other: &Self);

    /// Whether folding `other` into `self` takes a zero-weight fallback.
    fn is_zero_weight_merge(&self, other: &Self) -> bool {
        self.weight() + other.weight() <= 0.0
    }

    /// Ingestion check; invalid objects are skipped and counted.
    fn validate(&self) -> Result<(), crate::error::RecordError> {
        Ok(())
    }
}

impl Clusterable for DepositRecord {
    #[inline]
    fn time(&self) -> f64 {
        self.time
    }

    #[inline]
    fn weight(&self) -> f64 {
        self.energy
    }

    #[inline]
    fn absorb(&mut self, other: &Self) {
        DepositRecord::absorb(self, other);
    }

    fn validate(&self) -> Result<(), crate::error::RecordError> {
        DepositRecord::validate(self)
    }
}

/// Stable index of an open cluster inside a clusterer's slot table.
///
/// Handles are recycled after the cluster is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterHandle(pub usize);

/// An open or emitted cluster: the folded object plus bookkeeping.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterAccumulator<T> {
    /// Folded cluster contents.
    pub value: T,
    /// Time of the first member.
    pub start_time: f64,
    /// Time of the most recently merged member.
    pub last_update_time: f64,
    /// Number of members folded in.
    pub member_count: usize,
}

impl<T: Clusterable> ClusterAccumulator<T> {
    /// Seeds a cluster with its first member.
    pub fn seed(value: T) -> Self {
        let t = value.time();
        Self {
            value,
            start_time: t,
            last_update_time: t,
            member_count: 1,
        }
    }

    /// Folds another member in and advances the update time.
    pub fn merge(&mut self, item: &T) {
        let t = item.time();
        self.value.absorb(item);
        self.start_time = self.start_time.min(t);
        self.last_update_time = self.last_update_time.max(t);
        self.member_count += 1;
    }

    /// Whether a record at `time` is close enough to join this cluster.
    #[inline]
    pub fn accepts(&self, time: f64, gap: f64) -> bool {
        time <= self.last_update_time + gap
    }

    /// Consumes the accumulator and returns the folded value.
    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Receiver for clusters finalized by a windowed clusterer.
pub trait ClusterSink<T> {
    /// Takes ownership of a finalized cluster.
    fn process_finalized(&mut self, cluster: ClusterAccumulator<T>);
}

impl<T> ClusterSink<T> for Vec<ClusterAccumulator<T>> {
    fn process_finalized(&mut self, cluster: ClusterAccumulator<T>) {
        self.push(cluster);
    }
}

/// Configuration for time-window clustering.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClusteringConfig {
    /// Maximum time gap [ns] between a record and its cluster's last update.
    pub gap: f64,
    /// Lifetime [ns] after the last update before a windowed cluster is final.
    pub window_time: f64,
    /// Emitted clusters with a smaller total weight are discarded.
    pub min_cluster_energy: f64,
    /// Upper bound on simultaneously open clusters in the windowed variant.
    pub max_open_clusters: Option<usize>,
    /// Run the finalization scan every N records in the windowed variant.
    pub scan_interval: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            gap: 50.0,
            window_time: 50.0,
            min_cluster_energy: 0.0,
            max_open_clusters: None,
            scan_interval: 1,
        }
    }
}

impl ClusteringConfig {
    /// Creates a new clustering configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the merge gap; the window is widened to at least the gap.
    #[must_use]
    pub fn with_gap(mut self, gap: f64) -> Self {
        self.gap = gap;
        self.window_time = self.window_time.max(gap);
        self
    }

    /// Sets the finalization window.
    #[must_use]
    pub fn with_window_time(mut self, window_time: f64) -> Self {
        self.window_time = window_time;
        self
    }

    /// Sets the minimum emitted cluster energy.
    #[must_use]
    pub fn with_min_cluster_energy(mut self, energy: f64) -> Self {
        self.min_cluster_energy = energy;
        self
    }

    /// Bounds the number of open clusters in the windowed variant.
    #[must_use]
    pub fn with_max_open_clusters(mut self, max: usize) -> Self {
        self.max_open_clusters = Some(max);
        self
    }

    /// Sets the finalization scan interval.
    #[must_use]
    pub fn with_scan_interval(mut self, interval: usize) -> Self {
        self.scan_interval = interval;
        self
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    /// Returns [`ClusteringError::InvalidConfig`] for a negative or non-finite
    /// gap, a window shorter than the gap, or a zero scan interval.
    pub fn validate(&self) -> Result<(), ClusteringError> {
        if !self.gap.is_finite() || self.gap < 0.0 {
            return Err(ClusteringError::InvalidConfig(format!(
                "gap must be finite and non-negative, got {}",
                self.gap
            )));
        }
        if !self.window_time.is_finite() || self.window_time < self.gap {
            return Err(ClusteringError::InvalidConfig(format!(
                "window_time {} must be finite and at least the gap {}",
                self.window_time, self.gap
            )));
        }
        if self.scan_interval == 0 {
            return Err(ClusteringError::InvalidConfig(
                "scan_interval must be positive".into(),
            ));
        }
        if self.max_open_clusters == Some(0) {
            return Err(ClusteringError::InvalidConfig(
                "max_open_clusters must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Counters maintained by the clusterers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusteringStatistics {
    /// Records offered to `add`.
    pub records_seen: usize,
    /// Records skipped by the ingestion check.
    pub records_rejected: usize,
    /// Records refused because they arrived out of order.
    pub records_out_of_order: usize,
    /// Clusters opened.
    pub clusters_opened: usize,
    /// Clusters handed to the caller.
    pub clusters_emitted: usize,
    /// Clusters discarded for falling below the energy threshold.
    pub clusters_below_threshold: usize,
    /// Open clusters dropped after an out-of-order record for their key.
    pub clusters_aborted: usize,
    /// Clusters finalized early because the open-cluster buffer was full.
    pub clusters_forced: usize,
    /// Merges that took the zero-weight fallback.
    pub zero_weight_merges: usize,
}
