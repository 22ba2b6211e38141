//! Hit classification and the two-level coincidence time structure.
//!
//! Classified hits are grouped into prompt clusters (hits within
//! `prompt_timescale` of the previous hit) and prompt clusters into
//! coincidence events (each cluster starting within `delayed_timescale` of
//! the previous cluster's median time). Dead hits never take part.

use ibdscan_core::config::AnalysisConfig;
use ibdscan_core::error::ClusteringError;
use ibdscan_core::event::{ClassifiedHit, CoincidenceEvent, PromptCluster};
use ibdscan_core::pulse::{compare_pulse_times, HitClass, ResponsePulse};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Classification policy: a pure function of one pulse and the thresholds.
pub type Classifier = fn(&ResponsePulse, &AnalysisConfig) -> HitClass;

/// Default classification policy.
///
/// Veto segments need more than `veto_thresh`. Elsewhere the
/// `deposited / dE/dx` proxy separates heavy particles (below `psd_cut`):
/// heavy hits in the capture window are captures, other heavy hits above
/// trigger are recoils, light hits above trigger are ionization.
#[must_use]
pub fn classify(pulse: &ResponsePulse, config: &AnalysisConfig) -> HitClass {
    if pulse.volume_id < 0 {
        return HitClass::Dead;
    }
    if config.veto_volumes.contains(&pulse.volume_id) {
        return if pulse.energy > config.veto_thresh {
            HitClass::Veto
        } else {
            HitClass::Dead
        };
    }

    let heavy = pulse.dedx_proxy() < config.psd_cut;
    let e = pulse.energy;
    if heavy && (config.ncapt_emin..=config.ncapt_emax).contains(&e) {
        HitClass::NeutronCapture
    } else if e > config.trig_thresh && heavy {
        HitClass::Recoil
    } else if e > config.trig_thresh {
        HitClass::Ionization
    } else {
        HitClass::Dead
    }
}

#[derive(Debug, Default)]
enum ScanState {
    #[default]
    NoOpenEvent,
    BuildingEvent {
        event: CoincidenceEvent,
        prompt: PromptCluster,
    },
}

/// Incremental prompt-cluster and coincidence-event builder.
///
/// Hits must arrive in non-decreasing time order.
#[derive(Debug)]
pub struct CoincidenceScanner {
    prompt_timescale: f64,
    delayed_timescale: f64,
    state: ScanState,
    last_time: Option<f64>,
    time_offset: f64,
    dead_hits: usize,
    aborted_events: usize,
}

impl CoincidenceScanner {
    /// Creates a scanner with the timescales of `config`.
    #[must_use]
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            prompt_timescale: config.prompt_timescale,
            delayed_timescale: config.delayed_timescale,
            state: ScanState::NoOpenEvent,
            last_time: None,
            time_offset: 0.0,
            dead_hits: 0,
            aborted_events: 0,
        }
    }

    /// Run time offset stamped on events opened from now on.
    pub fn set_time_offset(&mut self, offset: f64) {
        self.time_offset = offset;
    }

    fn open_event(&self, hit: ClassifiedHit) -> ScanState {
        log::trace!("open event {} at t={}", hit.pulse.event_id, hit.time());
        ScanState::BuildingEvent {
            event: CoincidenceEvent::new(hit.pulse.event_id).with_time_offset(self.time_offset),
            prompt: PromptCluster::start(hit),
        }
    }

    /// Feeds one hit; returns the coincidence event it closed, if any.
    ///
    /// # Errors
    /// [`ClusteringError::OutOfOrderRecord`] if the hit is earlier than the
    /// previous one. The open event is discarded and scanning restarts with
    /// the next hit.
    pub fn push(
        &mut self,
        hit: ClassifiedHit,
    ) -> Result<Option<CoincidenceEvent>, ClusteringError> {
        if hit.class == HitClass::Dead {
            self.dead_hits += 1;
            return Ok(None);
        }

        let t = hit.time();
        if let Some(last) = self.last_time {
            if t < last {
                self.state = ScanState::NoOpenEvent;
                self.last_time = None;
                self.aborted_events += 1;
                log::warn!("coincidence scan: hit at t={t} precedes t={last}; open event dropped");
                return Err(ClusteringError::OutOfOrderRecord {
                    key: format!("segment {}", hit.pulse.volume_id),
                    time: t,
                    watermark: last,
                });
            }
        }
        self.last_time = Some(t);

        let (next, closed) = match std::mem::take(&mut self.state) {
            ScanState::NoOpenEvent => (self.open_event(hit), None),
            ScanState::BuildingEvent {
                mut event,
                mut prompt,
            } => {
                let last = prompt.last_time().unwrap_or(t);
                if t - last < self.prompt_timescale {
                    prompt.push(hit);
                    (ScanState::BuildingEvent { event, prompt }, None)
                } else {
                    prompt.tally();
                    let median = prompt.median_time();
                    event.clusters.push(prompt);
                    if t - median < self.delayed_timescale {
                        log::trace!("new prompt cluster at t={t}, {} so far", event.clusters.len());
                        let prompt = PromptCluster::start(hit);
                        (ScanState::BuildingEvent { event, prompt }, None)
                    } else {
                        event.finalize();
                        log::trace!(
                            "close event {} with {} clusters",
                            event.event_id,
                            event.clusters.len()
                        );
                        (self.open_event(hit), Some(event))
                    }
                }
            }
        };
        self.state = next;
        Ok(closed)
    }

    /// Closes the open event, if any.
    pub fn finish(&mut self) -> Option<CoincidenceEvent> {
        self.last_time = None;
        match std::mem::take(&mut self.state) {
            ScanState::NoOpenEvent => None,
            ScanState::BuildingEvent {
                mut event,
                mut prompt,
            } => {
                prompt.tally();
                event.clusters.push(prompt);
                event.finalize();
                Some(event)
            }
        }
    }

    /// Dead hits dropped so far.
    #[must_use]
    pub fn dead_hits(&self) -> usize {
        self.dead_hits
    }

    /// Events discarded after an out-of-order hit.
    #[must_use]
    pub fn aborted_events(&self) -> usize {
        self.aborted_events
    }
}

/// Tallies over analyzed coincidence events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AnalysisStatistics {
    /// Coincidence events seen.
    pub events: usize,
    /// Prompt clusters across all events.
    pub prompt_clusters: usize,
    /// Events matching the two-cluster IBD pattern.
    pub ibd_like: usize,
    /// Ionization/capture cluster combinations.
    pub signal_pairs: usize,
    /// Prompt clusters containing a veto hit.
    pub vetoed_clusters: usize,
    /// Classified hits per class, indexed by [`HitClass::index`].
    pub hits_by_class: [usize; HitClass::COUNT],
}

impl AnalysisStatistics {
    /// Counts classified hits, dead ones included.
    pub fn record_hits(&mut self, hits: &[ClassifiedHit]) {
        for hit in hits {
            self.hits_by_class[hit.class.index()] += 1;
        }
    }

    /// Counts one finalized event.
    pub fn record_event(&mut self, event: &CoincidenceEvent) {
        self.events += 1;
        self.prompt_clusters += event.clusters.len();
        if event.is_ibd_like() > 0 {
            self.ibd_like += 1;
        }
        self.signal_pairs += event.signal_pairs().len();
        self.vetoed_clusters += event.clusters.iter().filter(|c| c.has_veto()).count();
    }

    /// Hits recorded for `class`.
    #[must_use]
    pub fn hits(&self, class: HitClass) -> usize {
        self.hits_by_class[class.index()]
    }

    /// Adds another set of tallies.
    pub fn merge(&mut self, other: &Self) {
        self.events += other.events;
        self.prompt_clusters += other.prompt_clusters;
        self.ibd_like += other.ibd_like;
        self.signal_pairs += other.signal_pairs;
        self.vetoed_clusters += other.vetoed_clusters;
        for (a, b) in self.hits_by_class.iter_mut().zip(other.hits_by_class) {
            *a += b;
        }
    }
}

/// Classification and coincidence grouping of a pulse list.
#[derive(Debug, Clone)]
pub struct TimeStructureAnalyzer {
    config: AnalysisConfig,
    classifier: Classifier,
}

impl TimeStructureAnalyzer {
    /// Analyzer using [`classify`].
    #[must_use]
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            classifier: classify,
        }
    }

    /// Replaces the classification policy.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Analysis settings.
    #[must_use]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Classifies one pulse.
    #[must_use]
    pub fn classify(&self, pulse: &ResponsePulse) -> HitClass {
        (self.classifier)(pulse, &self.config)
    }

    /// Classifies pulses, keeping their order.
    #[must_use]
    pub fn classify_all(&self, pulses: &[ResponsePulse]) -> Vec<ClassifiedHit> {
        pulses
            .iter()
            .map(|p| ClassifiedHit::new(*p, self.classify(p)))
            .collect()
    }

    /// Scanner configured with this analyzer's timescales.
    #[must_use]
    pub fn scanner(&self) -> CoincidenceScanner {
        CoincidenceScanner::new(&self.config)
    }

    /// Time-sorts, classifies and groups `pulses` into coincidence events.
    ///
    /// # Errors
    /// Only if a pulse time is not comparable; sorted finite input never fails.
    pub fn analyze(
        &self,
        pulses: &[ResponsePulse],
    ) -> Result<Vec<CoincidenceEvent>, ClusteringError> {
        let mut sorted = pulses.to_vec();
        sorted.sort_by(compare_pulse_times);

        let mut scanner = self.scanner();
        let mut events = Vec::new();
        for hit in self.classify_all(&sorted) {
            if let Some(event) = scanner.push(hit)? {
                events.push(event);
            }
        }
        events.extend(scanner.finish());
        Ok(events)
    }
}
