//! Per-event pipeline: deposit merging, detector response, classification
//! and coincidence grouping.

use crate::coincidence::{AnalysisStatistics, TimeStructureAnalyzer};
use crate::response::DetectorResponse;
use crate::window::{volume_particle_key, TimeWindowClusterer};
use ibdscan_core::clustering::{ClusterAccumulator, ClusteringConfig, ClusteringStatistics};
use ibdscan_core::config::{AnalysisConfig, Calibration, ResponseConfig};
use ibdscan_core::error::{Error, Result};
use ibdscan_core::event::{ClassifiedHit, CoincidenceEvent};
use ibdscan_core::pulse::{compare_pulse_times, ResponsePulse};
use ibdscan_core::record::DepositRecord;
use ibdscan_core::sink::EventSink;
use rayon::prelude::*;
use std::iter::Peekable;

/// Time-sorts pulses, ties broken by event and segment.
pub fn sort_pulses_by_time(pulses: &mut [ResponsePulse]) {
    pulses.sort_by(|a, b| {
        compare_pulse_times(a, b)
            .then(a.event_id.cmp(&b.event_id))
            .then(a.volume_id.cmp(&b.volume_id))
    });
}

/// Splits a record stream into runs of equal `event_id`.
///
/// Only consecutive records are grouped; an event id that reappears later
/// starts a new group.
pub struct EventGroups<I: Iterator<Item = DepositRecord>> {
    records: Peekable<I>,
}

impl<I: Iterator<Item = DepositRecord>> EventGroups<I> {
    /// Groups `records` by consecutive event id.
    pub fn new<T: IntoIterator<IntoIter = I>>(records: T) -> Self {
        Self {
            records: records.into_iter().peekable(),
        }
    }
}

impl<I: Iterator<Item = DepositRecord>> Iterator for EventGroups<I> {
    type Item = (i64, Vec<DepositRecord>);

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.records.next()?;
        let event_id = first.event_id;
        let mut group = vec![first];
        while let Some(record) = self.records.next_if(|r| r.event_id == event_id) {
            group.push(record);
        }
        Some((event_id, group))
    }
}

/// Output of one processed event.
#[derive(Debug, Clone, Default)]
pub struct EventOutput {
    /// Simulation event the output came from.
    pub event_id: i64,
    /// Every classified pulse, time-ordered, dead hits included.
    pub hits: Vec<ClassifiedHit>,
    /// Coincidence events in time order.
    pub events: Vec<CoincidenceEvent>,
}

/// Counters maintained by [`EventProcessor`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingStatistics {
    /// Events that completed.
    pub events_processed: usize,
    /// Events dropped after a pipeline error.
    pub events_failed: usize,
    /// Records offered, bookkeeping included.
    pub records: usize,
    /// Zero-energy records dropped before merging.
    pub bookkeeping_records: usize,
    /// Deposits left after the per-(volume, particle) merge.
    pub merged_deposits: usize,
    /// Response pulses formed.
    pub pulses: usize,
    /// Deposit merge counters.
    pub clustering: ClusteringStatistics,
    /// Classification and coincidence counters.
    pub analysis: AnalysisStatistics,
}

impl ProcessingStatistics {
    /// Adds another processor's counters.
    pub fn merge(&mut self, other: &Self) {
        self.events_processed += other.events_processed;
        self.events_failed += other.events_failed;
        self.records += other.records;
        self.bookkeeping_records += other.bookkeeping_records;
        self.merged_deposits += other.merged_deposits;
        self.pulses += other.pulses;
        let (a, b) = (&mut self.clustering, &other.clustering);
        a.records_seen += b.records_seen;
        a.records_rejected += b.records_rejected;
        a.records_out_of_order += b.records_out_of_order;
        a.clusters_opened += b.clusters_opened;
        a.clusters_emitted += b.clusters_emitted;
        a.clusters_below_threshold += b.clusters_below_threshold;
        a.clusters_aborted += b.clusters_aborted;
        a.clusters_forced += b.clusters_forced;
        a.zero_weight_merges += b.zero_weight_merges;
        self.analysis.merge(&other.analysis);
    }
}

/// Runs events through merge, response and coincidence analysis.
///
/// Events are independent: no state other than the counters survives from
/// one event to the next.
#[derive(Debug, Clone)]
pub struct EventProcessor {
    merger: TimeWindowClusterer<DepositRecord, (i32, i32)>,
    response: DetectorResponse,
    analyzer: TimeStructureAnalyzer,
    runtime: Option<f64>,
    stats: ProcessingStatistics,
}

impl EventProcessor {
    /// Builds the pipeline.
    ///
    /// # Errors
    /// Returns an error for an invalid clustering configuration or an
    /// incomplete calibration.
    pub fn new(
        clustering: ClusteringConfig,
        calibration: &Calibration,
        response: ResponseConfig,
        analysis: AnalysisConfig,
    ) -> Result<Self> {
        Ok(Self {
            merger: TimeWindowClusterer::new(clustering, volume_particle_key)?,
            response: DetectorResponse::new(calibration, response)?,
            analyzer: TimeStructureAnalyzer::new(analysis),
            runtime: None,
            stats: ProcessingStatistics::default(),
        })
    }

    /// Wraps shifted pulse times into a run of this length [ns].
    #[must_use]
    pub fn with_runtime(mut self, runtime: f64) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Replaces the coincidence analyzer, e.g. to install another classifier.
    #[must_use]
    pub fn with_analyzer(mut self, analyzer: TimeStructureAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Same pipeline with fresh counters.
    #[must_use]
    pub fn fresh(&self) -> Self {
        let mut copy = self.clone();
        copy.merger.reset();
        copy.stats = ProcessingStatistics::default();
        copy
    }

    fn merge_deposits(&mut self, records: &[DepositRecord]) -> Result<Vec<DepositRecord>> {
        let mut merged = Vec::new();
        for record in records {
            if record.is_bookkeeping() {
                self.stats.bookkeeping_records += 1;
                continue;
            }
            match self.merger.add(*record) {
                Ok(Some(cluster)) => merged.push(cluster.into_inner()),
                Ok(None) => {}
                Err(err) => {
                    self.merger.flush();
                    return Err(err.into());
                }
            }
        }
        merged.extend(self.merger.flush().into_iter().map(ClusterAccumulator::into_inner));
        merged.sort_by(|a, b| a.time.total_cmp(&b.time));
        Ok(merged)
    }

    /// Processes the records of one simulation event.
    ///
    /// Pulse times are shifted by `time_offset` and, with a runtime set,
    /// wrapped into the run before classification and grouping.
    ///
    /// # Errors
    /// Returns [`Error::Clustering`] if records of one volume and particle
    /// are not time-ordered.
    pub fn process_event(
        &mut self,
        records: &[DepositRecord],
        time_offset: f64,
    ) -> Result<EventOutput> {
        let event_id = records.first().map_or(0, |r| r.event_id);
        self.stats.records += records.len();

        let outcome = self.run_event(records, time_offset);
        let stats = self.merger.statistics().clone();
        self.stats.clustering = stats;
        match outcome {
            Ok(mut output) => {
                output.event_id = event_id;
                self.stats.events_processed += 1;
                log::debug!(
                    "event {event_id}: {} records -> {} hits, {} coincidence events",
                    records.len(),
                    output.hits.len(),
                    output.events.len()
                );
                Ok(output)
            }
            Err(err) => {
                self.stats.events_failed += 1;
                log::warn!("event {event_id} failed: {err}");
                Err(err)
            }
        }
    }

    fn run_event(&mut self, records: &[DepositRecord], time_offset: f64) -> Result<EventOutput> {
        let merged = self.merge_deposits(records)?;
        self.stats.merged_deposits += merged.len();

        let runtime = self.runtime.unwrap_or(0.0);
        let mut pulses: Vec<ResponsePulse> = self
            .response
            .respond(&merged)?
            .into_iter()
            .map(|p| p.placed_in_run(time_offset, runtime))
            .collect();
        sort_pulses_by_time(&mut pulses);
        self.stats.pulses += pulses.len();

        let hits = self.analyzer.classify_all(&pulses);
        self.stats.analysis.record_hits(&hits);

        let mut scanner = self.analyzer.scanner();
        scanner.set_time_offset(time_offset);
        let mut events = Vec::new();
        for hit in &hits {
            if let Some(event) = scanner.push(*hit)? {
                events.push(event);
            }
        }
        events.extend(scanner.finish());
        for event in &events {
            self.stats.analysis.record_event(event);
        }

        Ok(EventOutput {
            event_id: 0,
            hits,
            events,
        })
    }

    /// Groups a record stream by event and writes every event's output to
    /// `sink`. Returns the number of events processed.
    ///
    /// # Errors
    /// Stops at the first pipeline or sink error.
    pub fn process_stream<I, S>(
        &mut self,
        records: I,
        sink: &mut S,
    ) -> std::result::Result<usize, S::Error>
    where
        I: IntoIterator<Item = DepositRecord>,
        S: EventSink + ?Sized,
        S::Error: From<Error>,
    {
        let mut count = 0;
        for (_, group) in EventGroups::new(records) {
            let output = self.process_event(&group, 0.0)?;
            sink.write_hits(&output.hits)?;
            for event in &output.events {
                sink.write_event(event)?;
            }
            count += 1;
        }
        sink.flush()?;
        Ok(count)
    }

    /// Logs the end-of-stream summary and returns the counters.
    pub fn finish(&mut self) -> ProcessingStatistics {
        let s = &self.stats;
        log::info!(
            "processed {} events ({} failed): {} records, {} pulses",
            s.events_processed,
            s.events_failed,
            s.records,
            s.pulses
        );
        log::info!(
            "{} coincidence events, {} IBD-like, {} signal pairs, {} vetoed clusters",
            s.analysis.events,
            s.analysis.ibd_like,
            s.analysis.signal_pairs,
            s.analysis.vetoed_clusters
        );
        self.take_statistics()
    }

    /// Takes the counters without logging.
    fn take_statistics(&mut self) -> ProcessingStatistics {
        self.merger.reset();
        std::mem::take(&mut self.stats)
    }

    /// Counters so far.
    #[must_use]
    pub fn statistics(&self) -> &ProcessingStatistics {
        &self.stats
    }
}

/// Processes independent events on the rayon pool.
///
/// Each worker runs its own copy of `template`; results come back in input
/// order together with the summed counters.
pub fn process_events_parallel(
    template: &EventProcessor,
    events: &[Vec<DepositRecord>],
) -> (Vec<Result<EventOutput>>, ProcessingStatistics) {
    let results: Vec<(Result<EventOutput>, ProcessingStatistics)> = events
        .par_iter()
        .map_init(
            || template.fresh(),
            |processor, records| {
                let output = processor.process_event(records, 0.0);
                (output, processor.take_statistics())
            },
        )
        .collect();

    let mut stats = ProcessingStatistics::default();
    let outputs = results
        .into_iter()
        .map(|(output, s)| {
            stats.merge(&s);
            output
        })
        .collect();
    (outputs, stats)
}
