//! Streaming time-window clustering.
//!
//! Key characteristics:
//! - One open cluster per grouping key, looked up through a hash index
//! - Clusters live in a slot table addressed by [`ClusterHandle`]; emitted
//!   slots go on a free list and are reused
//! - [`TimeWindowClusterer`] closes a key's cluster when a record for the
//!   same key arrives more than `gap` after the last update
//! - [`SlidingWindowClusterer`] finalizes clusters from the global stream
//!   time, so keys that fall silent still drain with latency `window_time`
//!
//! Within a key, records must arrive in non-decreasing time order. Nothing
//! is re-sorted; an earlier record is refused with
//! [`ClusteringError::OutOfOrderRecord`] and the key's open cluster is dropped.
//! The sliding variant also refuses a record that would have joined a
//! cluster it already finalized.

use ibdscan_core::clustering::{
    ClusterAccumulator, ClusterHandle, ClusterSink, Clusterable, ClusteringConfig,
    ClusteringStatistics,
};
use ibdscan_core::error::ClusteringError;
use ibdscan_core::record::DepositRecord;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::Hash;

/// Grouping key of a record: its volume.
#[inline]
#[must_use]
pub fn volume_key(record: &DepositRecord) -> i32 {
    record.volume_id
}

/// Grouping key of a record: its volume and particle type.
#[inline]
#[must_use]
pub fn volume_particle_key(record: &DepositRecord) -> (i32, i32) {
    (record.volume_id, record.particle_type)
}

fn unit_key<T>(_: &T) {}

/// Open cluster slot.
#[derive(Debug, Clone)]
struct Slot<T, K> {
    key: K,
    cluster: ClusterAccumulator<T>,
    /// No further record can join; waiting for finalization.
    closed: bool,
}

/// Slot table plus key index shared by both clusterers.
#[derive(Debug, Clone)]
struct ClusterTable<T, K> {
    slots: Vec<Option<Slot<T, K>>>,
    free: Vec<usize>,
    index: HashMap<K, ClusterHandle>,
    /// Latest time consumed per key, kept after its cluster is gone.
    watermarks: HashMap<K, f64>,
    /// Per key whose latest cluster was finalized: records up to this time
    /// (inclusive) would have merged into it.
    sealed: HashMap<K, f64>,
    live: usize,
}

impl<T, K> ClusterTable<T, K>
where
    T: Clusterable,
    K: Eq + Hash + Clone + Debug,
{
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            watermarks: HashMap::new(),
            sealed: HashMap::new(),
            live: 0,
        }
    }

    fn open_handle(&self, key: &K) -> Option<ClusterHandle> {
        self.index.get(key).copied()
    }

    fn slot(&self, handle: ClusterHandle) -> Option<&Slot<T, K>> {
        self.slots.get(handle.0).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, handle: ClusterHandle) -> Option<&mut Slot<T, K>> {
        self.slots.get_mut(handle.0).and_then(Option::as_mut)
    }

    fn watermark(&self, key: &K) -> Option<f64> {
        let open = self
            .open_handle(key)
            .and_then(|h| self.slot(h))
            .map(|s| s.cluster.last_update_time);
        match (open, self.watermarks.get(key).copied()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    fn insert(&mut self, key: K, item: T) -> ClusterHandle {
        let slot = Slot {
            key: key.clone(),
            cluster: ClusterAccumulator::seed(item),
            closed: false,
        };
        let handle = if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(slot);
            ClusterHandle(idx)
        } else {
            self.slots.push(Some(slot));
            ClusterHandle(self.slots.len() - 1)
        };
        self.index.insert(key, handle);
        self.live += 1;
        handle
    }

    /// Detaches a key's open cluster from the index; it stays in its slot.
    fn close(&mut self, handle: ClusterHandle) {
        if let Some(slot) = self.slots.get_mut(handle.0).and_then(Option::as_mut) {
            slot.closed = true;
            if self.index.get(&slot.key) == Some(&handle) {
                self.index.remove(&slot.key);
            }
        }
    }

    fn remove(&mut self, handle: ClusterHandle) -> Option<(K, ClusterAccumulator<T>)> {
        let slot = self.slots.get_mut(handle.0)?.take()?;
        if self.index.get(&slot.key) == Some(&handle) {
            self.index.remove(&slot.key);
        }
        let wm = self.watermarks.entry(slot.key.clone()).or_insert(f64::NEG_INFINITY);
        *wm = wm.max(slot.cluster.last_update_time);
        self.free.push(handle.0);
        self.live -= 1;
        Some((slot.key, slot.cluster))
    }

    fn handles(&self) -> impl Iterator<Item = ClusterHandle> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| ClusterHandle(i))
    }

    /// Live handles ordered by (start time, handle).
    fn handles_by_start(&self) -> Vec<ClusterHandle> {
        let mut handles: Vec<_> = self.handles().collect();
        handles.sort_by(|a, b| {
            let (sa, sb) = (self.slots[a.0].as_ref(), self.slots[b.0].as_ref());
            let ta = sa.map_or(f64::INFINITY, |s| s.cluster.start_time);
            let tb = sb.map_or(f64::INFINITY, |s| s.cluster.start_time);
            ta.total_cmp(&tb).then(a.cmp(b))
        });
        handles
    }

    /// The watermark a record at `time` for `key` violates, if any.
    fn refuses(&self, key: &K, time: f64) -> Option<f64> {
        if let Some(watermark) = self.watermark(key) {
            if time < watermark {
                return Some(watermark);
            }
        }
        self.sealed.get(key).copied().filter(|&sealed| time <= sealed)
    }

    /// Marks `key`'s finalized cluster as unreachable for later records.
    fn seal(&mut self, key: K, last_update_time: f64, gap: f64) {
        let sealed = self.sealed.entry(key).or_insert(f64::NEG_INFINITY);
        *sealed = sealed.max(last_update_time + gap);
    }

    /// Forgets ordering history that lies entirely before `horizon`.
    fn prune_history(&mut self, horizon: f64) {
        self.watermarks.retain(|_, &mut t| t >= horizon);
        self.sealed.retain(|_, &mut t| t >= horizon);
    }

    fn forget_history(&mut self) {
        self.watermarks.clear();
        self.sealed.clear();
    }

    /// Clusters that can still accept records.
    fn open_count(&self) -> usize {
        self.slots.iter().flatten().filter(|s| !s.closed).count()
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.forget_history();
        self.live = 0;
    }
}

/// Outcome of offering one record to a table.
enum Placement {
    Merged,
    Opened { replaced: Option<ClusterHandle> },
    Skipped,
}

/// Validation, ordering check and merge-or-open step shared by both clusterers.
fn place<T, K>(
    table: &mut ClusterTable<T, K>,
    stats: &mut ClusteringStatistics,
    gap: f64,
    key: K,
    item: T,
) -> Result<Placement, ClusteringError>
where
    T: Clusterable,
    K: Eq + Hash + Clone + Debug,
{
    stats.records_seen += 1;

    if let Err(err) = item.validate() {
        stats.records_rejected += 1;
        log::warn!("skipping invalid record for key {key:?}: {err}");
        return Ok(Placement::Skipped);
    }

    let time = item.time();
    if let Some(watermark) = table.refuses(&key, time) {
        stats.records_out_of_order += 1;
        if let Some(handle) = table.open_handle(&key) {
            table.remove(handle);
            stats.clusters_aborted += 1;
        }
        log::warn!("out-of-order record for key {key:?}: t={time} against {watermark}; open cluster aborted");
        return Err(ClusteringError::OutOfOrderRecord {
            key: format!("{key:?}"),
            time,
            watermark,
        });
    }

    match table.open_handle(&key) {
        Some(handle) => {
            let Some(slot) = table.slot_mut(handle) else {
                return Ok(Placement::Skipped);
            };
            if slot.cluster.accepts(time, gap) {
                if slot.cluster.value.is_zero_weight_merge(&item) {
                    stats.zero_weight_merges += 1;
                }
                slot.cluster.merge(&item);
                Ok(Placement::Merged)
            } else {
                table.close(handle);
                table.insert(key, item);
                stats.clusters_opened += 1;
                Ok(Placement::Opened {
                    replaced: Some(handle),
                })
            }
        }
        None => {
            table.insert(key, item);
            stats.clusters_opened += 1;
            Ok(Placement::Opened { replaced: None })
        }
    }
}

/// Applies the energy threshold to a cluster leaving the table.
fn passes_threshold<T: Clusterable>(
    cluster: &ClusterAccumulator<T>,
    config: &ClusteringConfig,
    stats: &mut ClusteringStatistics,
) -> bool {
    if cluster.value.weight() < config.min_cluster_energy {
        stats.clusters_below_threshold += 1;
        false
    } else {
        stats.clusters_emitted += 1;
        true
    }
}

/// Gap-based clusterer: emits a key's cluster as soon as a record for the
/// same key arrives too late to join it.
#[derive(Clone)]
pub struct TimeWindowClusterer<T, K = ()> {
    config: ClusteringConfig,
    key_fn: fn(&T) -> K,
    table: ClusterTable<T, K>,
    stats: ClusteringStatistics,
}

impl<T: Clusterable> TimeWindowClusterer<T, ()> {
    /// Clusterer with a single grouping key.
    ///
    /// # Errors
    /// Returns [`ClusteringError::InvalidConfig`] if the configuration is invalid.
    pub fn ungrouped(config: ClusteringConfig) -> Result<Self, ClusteringError> {
        Self::new(config, unit_key::<T>)
    }
}

impl<T, K> TimeWindowClusterer<T, K>
where
    T: Clusterable,
    K: Eq + Hash + Clone + Debug,
{
    /// Clusterer grouping records by `key_fn`.
    ///
    /// # Errors
    /// Returns [`ClusteringError::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: ClusteringConfig, key_fn: fn(&T) -> K) -> Result<Self, ClusteringError> {
        config.validate()?;
        Ok(Self {
            config,
            key_fn,
            table: ClusterTable::new(),
            stats: ClusteringStatistics::default(),
        })
    }

    /// Offers one record.
    ///
    /// Returns the cluster it displaced, if that cluster passes the energy
    /// threshold. Invalid records are skipped and counted.
    ///
    /// # Errors
    /// [`ClusteringError::OutOfOrderRecord`] if the record is earlier than
    /// the latest time already consumed for its key.
    pub fn add(&mut self, item: T) -> Result<Option<ClusterAccumulator<T>>, ClusteringError> {
        let key = (self.key_fn)(&item);
        match place(&mut self.table, &mut self.stats, self.config.gap, key, item)? {
            Placement::Opened {
                replaced: Some(handle),
            } => Ok(self.take(handle)),
            Placement::Opened { replaced: None } | Placement::Merged | Placement::Skipped => {
                Ok(None)
            }
        }
    }

    fn take(&mut self, handle: ClusterHandle) -> Option<ClusterAccumulator<T>> {
        let (_, cluster) = self.table.remove(handle)?;
        passes_threshold(&cluster, &self.config, &mut self.stats).then_some(cluster)
    }

    /// Offers every record of `items`, collecting displaced clusters.
    ///
    /// # Errors
    /// Stops at the first out-of-order record.
    pub fn extend<I>(&mut self, items: I) -> Result<Vec<ClusterAccumulator<T>>, ClusteringError>
    where
        I: IntoIterator<Item = T>,
    {
        let mut out = Vec::new();
        for item in items {
            if let Some(cluster) = self.add(item)? {
                out.push(cluster);
            }
        }
        Ok(out)
    }

    /// Closes and returns every open cluster, ordered by start time.
    ///
    /// Ends the stream: per-key ordering history is forgotten so the
    /// clusterer can be reused for the next event.
    pub fn flush(&mut self) -> Vec<ClusterAccumulator<T>> {
        let handles = self.table.handles_by_start();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(cluster) = self.take(handle) {
                out.push(cluster);
            }
        }
        self.table.forget_history();
        out
    }

    /// Drops all state and counters.
    pub fn reset(&mut self) {
        self.table.clear();
        self.stats = ClusteringStatistics::default();
    }

    /// Number of open clusters.
    #[must_use]
    pub fn open_clusters(&self) -> usize {
        self.table.live
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    /// Counters since construction or the last reset.
    #[must_use]
    pub fn statistics(&self) -> &ClusteringStatistics {
        &self.stats
    }
}

/// Windowed clusterer for unbounded streams.
///
/// A cluster is handed to the sink only once the largest time seen on the
/// whole stream exceeds its last update by more than `window_time`, so keys
/// may interleave with a bounded lag. Closed and open clusters share one
/// buffer, optionally capped by `max_open_clusters`.
///
/// A record that arrives after its key's cluster was finalized but within
/// `gap` of it is refused as out of order. Per-key history older than the
/// window is dropped, so a key lagging the stream by more than `window_time`
/// is no longer checked.
pub struct SlidingWindowClusterer<T, K = ()> {
    config: ClusteringConfig,
    key_fn: fn(&T) -> K,
    table: ClusterTable<T, K>,
    stats: ClusteringStatistics,
    max_seen_time: f64,
    since_scan: usize,
}

impl<T, K> fmt::Debug for TimeWindowClusterer<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeWindowClusterer")
            .field("config", &self.config)
            .field("open_clusters", &self.table.live)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<T, K> fmt::Debug for SlidingWindowClusterer<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindowClusterer")
            .field("config", &self.config)
            .field("buffered_clusters", &self.table.live)
            .field("max_seen_time", &self.max_seen_time)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<T: Clusterable> SlidingWindowClusterer<T, ()> {
    /// Windowed clusterer with a single grouping key.
    ///
    /// # Errors
    /// Returns [`ClusteringError::InvalidConfig`] if the configuration is invalid.
    pub fn ungrouped(config: ClusteringConfig) -> Result<Self, ClusteringError> {
        Self::new(config, unit_key::<T>)
    }
}

impl<T, K> SlidingWindowClusterer<T, K>
where
    T: Clusterable,
    K: Eq + Hash + Clone + Debug,
{
    /// Windowed clusterer grouping records by `key_fn`.
    ///
    /// # Errors
    /// Returns [`ClusteringError::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: ClusteringConfig, key_fn: fn(&T) -> K) -> Result<Self, ClusteringError> {
        config.validate()?;
        Ok(Self {
            config,
            key_fn,
            table: ClusterTable::new(),
            stats: ClusteringStatistics::default(),
            max_seen_time: f64::NEG_INFINITY,
            since_scan: 0,
        })
    }

    /// Offers one record; finalized clusters go to `sink`.
    ///
    /// # Errors
    /// [`ClusteringError::OutOfOrderRecord`] if the record is earlier than
    /// the latest time already consumed for its key.
    pub fn add<S>(&mut self, item: T, sink: &mut S) -> Result<(), ClusteringError>
    where
        S: ClusterSink<T> + ?Sized,
    {
        let time = item.time();
        let key = (self.key_fn)(&item);
        let placement = place(&mut self.table, &mut self.stats, self.config.gap, key, item)?;
        if matches!(placement, Placement::Skipped) {
            return Ok(());
        }

        self.max_seen_time = self.max_seen_time.max(time);
        self.since_scan += 1;
        if self.since_scan >= self.config.scan_interval {
            self.since_scan = 0;
            self.scan_and_finalize(sink);
        }
        self.enforce_capacity(sink);
        Ok(())
    }

    /// Finalizes every cluster whose window has expired, oldest first.
    fn scan_and_finalize<S>(&mut self, sink: &mut S)
    where
        S: ClusterSink<T> + ?Sized,
    {
        let horizon = self.max_seen_time - self.config.window_time;
        let mut expired: Vec<(f64, ClusterHandle)> = self
            .table
            .handles()
            .filter_map(|h| {
                let slot = self.table.slot(h)?;
                (slot.cluster.last_update_time < horizon).then_some((slot.cluster.last_update_time, h))
            })
            .collect();
        expired.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        for (_, handle) in expired {
            self.finalize(handle, sink);
        }
        self.table.prune_history(horizon);
    }

    fn finalize<S>(&mut self, handle: ClusterHandle, sink: &mut S)
    where
        S: ClusterSink<T> + ?Sized,
    {
        let was_open = self
            .table
            .slot(handle)
            .is_some_and(|s| self.table.open_handle(&s.key) == Some(handle));
        if let Some((key, cluster)) = self.table.remove(handle) {
            if was_open {
                self.table
                    .seal(key.clone(), cluster.last_update_time, self.config.gap);
            }
            if passes_threshold(&cluster, &self.config, &mut self.stats) {
                log::debug!(
                    "finalized cluster for key {key:?}: {} members, last update {}",
                    cluster.member_count,
                    cluster.last_update_time
                );
                sink.process_finalized(cluster);
            }
        }
    }

    /// Forces out the stalest clusters while the buffer is over capacity.
    fn enforce_capacity<S>(&mut self, sink: &mut S)
    where
        S: ClusterSink<T> + ?Sized,
    {
        let Some(max) = self.config.max_open_clusters else {
            return;
        };
        while self.table.live > max {
            let oldest = self
                .table
                .handles()
                .filter_map(|h| self.table.slot(h).map(|s| (s.cluster.last_update_time, h)))
                .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            let Some((_, handle)) = oldest else {
                break;
            };
            self.stats.clusters_forced += 1;
            if let Some(slot) = self.table.slot(handle) {
                log::warn!(
                    "cluster buffer full ({max}); finalizing key {:?} before its window expired",
                    slot.key
                );
            }
            self.finalize(handle, sink);
        }
    }

    /// Finalizes every remaining cluster, ordered by start time.
    pub fn flush<S>(&mut self, sink: &mut S)
    where
        S: ClusterSink<T> + ?Sized,
    {
        for handle in self.table.handles_by_start() {
            self.finalize(handle, sink);
        }
        self.table.forget_history();
        self.since_scan = 0;
    }

    /// Largest record time seen so far.
    #[must_use]
    pub fn max_seen_time(&self) -> f64 {
        self.max_seen_time
    }

    /// Number of buffered (open or closed, not yet finalized) clusters.
    #[must_use]
    pub fn buffered_clusters(&self) -> usize {
        self.table.live
    }

    /// Number of buffered clusters that can still accept records.
    #[must_use]
    pub fn open_clusters(&self) -> usize {
        self.table.open_count()
    }

    /// Counters since construction.
    #[must_use]
    pub fn statistics(&self) -> &ClusteringStatistics {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rec(volume: i32, energy: f64, time: f64) -> DepositRecord {
        DepositRecord::new(1, volume, 11, energy, time)
    }

    #[test]
    fn test_gap_merges_and_splits() {
        let mut clusterer =
            TimeWindowClusterer::new(ClusteringConfig::new().with_gap(50.0), volume_key).unwrap();

        assert!(clusterer.add(rec(1, 1.0, 0.0)).unwrap().is_none());
        assert!(clusterer.add(rec(1, 1.0, 40.0)).unwrap().is_none());
        // 40 + 50 < 100: starts a new cluster and returns the old one
        let closed = clusterer.add(rec(1, 2.0, 100.0)).unwrap().unwrap();
        assert_eq!(closed.member_count, 2);
        assert_relative_eq!(closed.value.time, 20.0);
        assert_relative_eq!(closed.last_update_time, 40.0);

        let rest = clusterer.flush();
        assert_eq!(rest.len(), 1);
        assert_relative_eq!(rest[0].value.energy, 2.0);
        assert_eq!(clusterer.statistics().clusters_emitted, 2);
        assert_eq!(clusterer.open_clusters(), 0);
    }

    #[test]
    fn test_gap_boundary_is_inclusive() {
        let mut clusterer = TimeWindowClusterer::ungrouped(ClusteringConfig::new()).unwrap();
        clusterer.add(rec(1, 1.0, 0.0)).unwrap();
        assert!(clusterer.add(rec(2, 1.0, 50.0)).unwrap().is_none());
        assert_eq!(clusterer.flush().len(), 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut clusterer = TimeWindowClusterer::new(ClusteringConfig::new(), volume_key).unwrap();
        clusterer.add(rec(1, 1.0, 0.0)).unwrap();
        clusterer.add(rec(2, 1.0, 10.0)).unwrap();
        clusterer.add(rec(1, 1.0, 20.0)).unwrap();
        assert_eq!(clusterer.open_clusters(), 2);

        let clusters = clusterer.flush();
        assert_eq!(clusters.len(), 2);
        // ordered by start time
        assert_eq!(clusters[0].value.volume_id, 1);
        assert_eq!(clusters[0].member_count, 2);
        assert_eq!(clusters[1].value.volume_id, 2);
    }

    #[test]
    fn test_out_of_order_aborts_open_cluster() {
        let mut clusterer = TimeWindowClusterer::new(ClusteringConfig::new(), volume_key).unwrap();
        clusterer.add(rec(3, 1.0, 100.0)).unwrap();
        let err = clusterer.add(rec(3, 1.0, 90.0)).unwrap_err();
        assert!(matches!(
            err,
            ClusteringError::OutOfOrderRecord { ref key, .. } if key == "3"
        ));
        assert_eq!(clusterer.open_clusters(), 0);
        assert_eq!(clusterer.statistics().clusters_aborted, 1);

        // Still refused: older than what was consumed for the key.
        assert!(clusterer.add(rec(3, 1.0, 95.0)).is_err());
        // Other keys are unaffected.
        assert!(clusterer.add(rec(4, 1.0, 10.0)).is_ok());
    }

    #[test]
    fn test_record_older_than_emitted_cluster_is_refused() {
        let mut clusterer = TimeWindowClusterer::new(ClusteringConfig::new(), volume_key).unwrap();
        clusterer.add(rec(1, 1.0, 0.0)).unwrap();
        clusterer.add(rec(1, 1.0, 500.0)).unwrap();
        assert!(clusterer.add(rec(1, 1.0, 200.0)).is_err());
    }

    #[test]
    fn test_invalid_records_are_counted_not_merged() {
        let mut clusterer = TimeWindowClusterer::ungrouped(ClusteringConfig::new()).unwrap();
        clusterer.add(rec(1, 1.0, 0.0)).unwrap();
        assert!(clusterer.add(rec(1, -2.0, 5.0)).unwrap().is_none());
        assert!(clusterer.add(rec(1, 1.0, f64::NAN)).unwrap().is_none());

        let clusters = clusterer.flush();
        assert_relative_eq!(clusters[0].value.energy, 1.0);
        assert_eq!(clusterer.statistics().records_rejected, 2);
        assert_eq!(clusterer.statistics().records_seen, 3);
    }

    #[test]
    fn test_energy_threshold_and_zero_weight_merges() {
        let config = ClusteringConfig::new().with_min_cluster_energy(0.01);
        let mut clusterer = TimeWindowClusterer::new(config, volume_key).unwrap();
        clusterer.add(rec(1, 0.0, 0.0)).unwrap();
        clusterer.add(rec(1, 0.0, 1.0)).unwrap();
        clusterer.add(rec(2, 0.5, 0.0)).unwrap();

        let clusters = clusterer.flush();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].value.volume_id, 2);
        assert_eq!(clusterer.statistics().zero_weight_merges, 1);
        assert_eq!(clusterer.statistics().clusters_below_threshold, 1);
    }

    #[test]
    fn test_flush_allows_reuse_for_next_event() {
        let mut clusterer = TimeWindowClusterer::ungrouped(ClusteringConfig::new()).unwrap();
        clusterer.add(rec(1, 1.0, 1000.0)).unwrap();
        clusterer.flush();
        assert!(clusterer.add(rec(1, 1.0, 0.0)).is_ok());
    }

    #[test]
    fn test_slot_reuse() {
        let mut clusterer = TimeWindowClusterer::ungrouped(ClusteringConfig::new()).unwrap();
        for i in 0..10 {
            clusterer.add(rec(1, 1.0, f64::from(i) * 1000.0)).unwrap();
        }
        assert_eq!(clusterer.table.slots.len(), 2);
    }

    #[test]
    fn test_sliding_window_waits_for_stream_time() {
        let config = ClusteringConfig::new().with_gap(50.0).with_window_time(200.0);
        let mut clusterer = SlidingWindowClusterer::new(config, volume_key).unwrap();
        let mut sink = Vec::new();

        clusterer.add(rec(1, 1.0, 0.0), &mut sink).unwrap();
        clusterer.add(rec(2, 1.0, 100.0), &mut sink).unwrap();
        clusterer.add(rec(2, 1.0, 150.0), &mut sink).unwrap();
        assert!(sink.is_empty());

        // 201 > 0 + 200: volume 1 is final even though it saw no new record.
        clusterer.add(rec(3, 1.0, 201.0), &mut sink).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].value.volume_id, 1);
        assert_eq!(clusterer.open_clusters(), 2);

        clusterer.flush(&mut sink);
        assert_eq!(sink.len(), 3);
        assert_eq!(sink[1].value.volume_id, 2);
        assert_eq!(sink[1].member_count, 2);
        assert_eq!(clusterer.buffered_clusters(), 0);
    }

    #[test]
    fn test_sliding_window_tolerates_cross_key_lag() {
        let config = ClusteringConfig::new().with_gap(10.0).with_window_time(100.0);
        let mut clusterer = SlidingWindowClusterer::new(config, volume_key).unwrap();
        let mut sink = Vec::new();

        clusterer.add(rec(1, 1.0, 50.0), &mut sink).unwrap();
        // Volume 2 lags behind the stream maximum but stays within the window.
        clusterer.add(rec(2, 1.0, 0.0), &mut sink).unwrap();
        clusterer.add(rec(2, 1.0, 5.0), &mut sink).unwrap();
        clusterer.flush(&mut sink);

        assert_eq!(sink.len(), 2);
        assert_eq!(sink[0].value.volume_id, 2);
        assert_eq!(sink[0].member_count, 2);
    }

    #[test]
    fn test_sliding_window_refuses_record_for_finalized_cluster() {
        let mut clusterer = SlidingWindowClusterer::new(ClusteringConfig::new(), volume_key).unwrap();
        let mut sink = Vec::new();

        clusterer.add(rec(1, 1.0, 0.0), &mut sink).unwrap();
        // 51 > 0 + 50: volume 1 is finalized
        clusterer.add(rec(2, 1.0, 51.0), &mut sink).unwrap();
        assert_eq!(sink.len(), 1);

        // Per-key order holds, but 40 would have joined the emitted cluster.
        let err = clusterer.add(rec(1, 1.0, 40.0), &mut sink).unwrap_err();
        assert!(matches!(
            err,
            ClusteringError::OutOfOrderRecord { ref key, watermark, .. }
                if key == "1" && (watermark - 50.0).abs() < 1e-12
        ));
        // The gap boundary is inclusive.
        assert!(clusterer.add(rec(1, 1.0, 50.0), &mut sink).is_err());
        assert_eq!(clusterer.statistics().records_out_of_order, 2);
        assert_eq!(clusterer.statistics().clusters_aborted, 0);

        // Beyond the gap a new cluster may start.
        clusterer.add(rec(1, 1.0, 60.0), &mut sink).unwrap();
        clusterer.flush(&mut sink);
        assert_eq!(sink.len(), 3);
        assert_eq!(sink.iter().map(|c| c.member_count).sum::<usize>(), 3);
    }

    #[test]
    fn test_gap_variant_merges_same_lagging_record() {
        let mut clusterer = TimeWindowClusterer::new(ClusteringConfig::new(), volume_key).unwrap();
        clusterer.add(rec(1, 1.0, 0.0)).unwrap();
        clusterer.add(rec(2, 1.0, 51.0)).unwrap();
        clusterer.add(rec(1, 1.0, 40.0)).unwrap();
        let clusters = clusterer.flush();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].member_count, 2);
    }

    #[test]
    fn test_sliding_window_prunes_key_history() {
        let mut clusterer = SlidingWindowClusterer::new(ClusteringConfig::new(), volume_key).unwrap();
        let mut sink = Vec::new();

        clusterer.add(rec(1, 1.0, 0.0), &mut sink).unwrap();
        clusterer.add(rec(2, 1.0, 51.0), &mut sink).unwrap();
        // volume 1 consumed nothing after 0 < horizon 1; only its seal remains
        assert!(clusterer.table.watermarks.is_empty());
        assert_eq!(clusterer.table.sealed.len(), 1);

        // horizon 150 passes both keys' history
        clusterer.add(rec(3, 1.0, 200.0), &mut sink).unwrap();
        assert_eq!(sink.len(), 2);
        assert!(clusterer.table.watermarks.is_empty());
        assert!(clusterer.table.sealed.is_empty());
        assert_eq!(clusterer.buffered_clusters(), 1);
    }

    #[test]
    fn test_sliding_window_capacity_forces_oldest() {
        let config = ClusteringConfig::new()
            .with_window_time(1e6)
            .with_max_open_clusters(2);
        let mut clusterer = SlidingWindowClusterer::new(config, volume_key).unwrap();
        let mut sink = Vec::new();

        clusterer.add(rec(1, 1.0, 0.0), &mut sink).unwrap();
        clusterer.add(rec(2, 1.0, 1.0), &mut sink).unwrap();
        clusterer.add(rec(3, 1.0, 2.0), &mut sink).unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].value.volume_id, 1);
        assert_eq!(clusterer.statistics().clusters_forced, 1);
        assert_eq!(clusterer.buffered_clusters(), 2);
    }
}
