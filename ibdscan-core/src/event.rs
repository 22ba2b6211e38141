//! Prompt clusters and delayed-coincidence events.

use crate::pulse::{HitClass, ResponsePulse};
use std::collections::BTreeSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A response pulse with its assigned classification.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClassifiedHit {
    pub pulse: ResponsePulse,
    pub class: HitClass,
}

impl ClassifiedHit {
    #[must_use]
    pub fn new(pulse: ResponsePulse, class: HitClass) -> Self {
        Self { pulse, class }
    }

    #[inline]
    #[must_use]
    pub fn time(&self) -> f64 {
        self.pulse.time
    }
}

/// Hits that arrived within the prompt timescale of one another.
///
/// Hits are kept in arrival (time) order. Tallies are computed by
/// [`PromptCluster::tally`] once no further hit can join.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PromptCluster {
    /// Member hits, time-ordered.
    pub hits: Vec<ClassifiedHit>,
    counts: [usize; HitClass::COUNT],
    energies: [f64; HitClass::COUNT],
    median_time: f64,
    tallied: bool,
}

impl PromptCluster {
    /// Starts a cluster with its first hit.
    #[must_use]
    pub fn start(hit: ClassifiedHit) -> Self {
        Self {
            hits: vec![hit],
            ..Self::default()
        }
    }

    /// Appends a hit; tallies are invalidated.
    pub fn push(&mut self, hit: ClassifiedHit) {
        self.hits.push(hit);
        self.tallied = false;
    }

    /// Time of the latest member.
    #[must_use]
    pub fn last_time(&self) -> Option<f64> {
        self.hits.last().map(ClassifiedHit::time)
    }

    /// Computes per-class counts and energies and the median time.
    pub fn tally(&mut self) {
        self.counts = [0; HitClass::COUNT];
        self.energies = [0.0; HitClass::COUNT];
        for hit in &self.hits {
            self.counts[hit.class.index()] += 1;
            self.energies[hit.class.index()] += hit.pulse.energy;
        }
        self.median_time = self.hits.get(self.hits.len() / 2).map_or(0.0, ClassifiedHit::time);
        self.tallied = true;
    }

    /// Whether [`PromptCluster::tally`] is up to date.
    #[must_use]
    pub fn is_tallied(&self) -> bool {
        self.tallied
    }

    /// Time of the middle hit.
    #[must_use]
    pub fn median_time(&self) -> f64 {
        self.median_time
    }

    /// Number of member hits of `class`.
    #[must_use]
    pub fn count(&self, class: HitClass) -> usize {
        self.counts[class.index()]
    }

    /// Summed quenched energy of member hits of `class`.
    #[must_use]
    pub fn energy_of(&self, class: HitClass) -> f64 {
        self.energies[class.index()]
    }

    /// Summed quenched energy of ionization hits.
    #[must_use]
    pub fn ionization_energy(&self) -> f64 {
        self.energy_of(HitClass::Ionization)
    }

    fn sole_class(&self) -> Option<HitClass> {
        let mut present = HitClass::ALL.iter().filter(|c| self.counts[c.index()] > 0);
        match (present.next(), present.next()) {
            (Some(&class), None) => Some(class),
            _ => None,
        }
    }

    /// Whether every member is a neutron capture.
    #[must_use]
    pub fn is_capture(&self) -> bool {
        self.sole_class() == Some(HitClass::NeutronCapture)
    }

    /// Number of distinct segments hit, if every member is ionization; else 0.
    #[must_use]
    pub fn ionization_multiplicity(&self) -> usize {
        if self.sole_class() != Some(HitClass::Ionization) {
            return 0;
        }
        self.hits
            .iter()
            .map(|h| h.pulse.volume_id)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Whether any member is a veto hit.
    #[must_use]
    pub fn has_veto(&self) -> bool {
        self.count(HitClass::Veto) > 0
    }
}

/// Candidate correlated pair inside one coincidence event.
#[derive(Debug, Clone, Copy)]
pub struct SignalPair<'a> {
    /// Index of the ionization cluster in the event.
    pub ionization_index: usize,
    /// Index of the capture cluster in the event.
    pub capture_index: usize,
    pub ionization: &'a PromptCluster,
    pub capture: &'a PromptCluster,
}

impl SignalPair<'_> {
    /// Capture time minus ionization time.
    #[must_use]
    pub fn delay(&self) -> f64 {
        self.capture.median_time() - self.ionization.median_time()
    }
}

/// Prompt clusters each within the delayed timescale of the previous one.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CoincidenceEvent {
    /// Originating simulation event.
    pub event_id: i64,
    /// Time offset of the originating event inside the run [ns].
    pub time_offset: f64,
    /// Prompt clusters in time order.
    pub clusters: Vec<PromptCluster>,
}

impl CoincidenceEvent {
    #[must_use]
    pub fn new(event_id: i64) -> Self {
        Self {
            event_id,
            ..Self::default()
        }
    }

    /// Sets the run time offset.
    #[must_use]
    pub fn with_time_offset(mut self, offset: f64) -> Self {
        self.time_offset = offset;
        self
    }

    /// Tallies any cluster that is not yet tallied.
    pub fn finalize(&mut self) {
        for cluster in self.clusters.iter_mut().filter(|c| !c.is_tallied()) {
            cluster.tally();
        }
    }

    /// Total number of hits across clusters.
    #[must_use]
    pub fn hit_count(&self) -> usize {
        self.clusters.iter().map(|c| c.hits.len()).sum()
    }

    /// IBD-like pattern: exactly two clusters, one pure capture and one pure
    /// ionization. Returns the ionization multiplicity, or 0.
    #[must_use]
    pub fn is_ibd_like(&self) -> usize {
        match self.clusters.as_slice() {
            [first, second] if first.is_capture() => second.ionization_multiplicity(),
            [first, second] if second.is_capture() => first.ionization_multiplicity(),
            _ => 0,
        }
    }

    /// Every (pure ionization, pure capture) cluster combination.
    #[must_use]
    pub fn signal_pairs(&self) -> Vec<SignalPair<'_>> {
        let mut pairs = Vec::new();
        for (ci, capture) in self.clusters.iter().enumerate() {
            if !capture.is_capture() {
                continue;
            }
            for (ii, ionization) in self.clusters.iter().enumerate() {
                if ionization.ionization_multiplicity() > 0 {
                    pairs.push(SignalPair {
                        ionization_index: ii,
                        capture_index: ci,
                        ionization,
                        capture,
                    });
                }
            }
        }
        pairs
    }

    /// Whether any cluster carries a veto hit.
    #[must_use]
    pub fn has_veto(&self) -> bool {
        self.clusters.iter().any(PromptCluster::has_veto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn hit(volume_id: i32, energy: f64, time: f64, class: HitClass) -> ClassifiedHit {
        ClassifiedHit::new(
            ResponsePulse {
                volume_id,
                energy,
                time,
                ..Default::default()
            },
            class,
        )
    }

    fn cluster(hits: &[ClassifiedHit]) -> PromptCluster {
        let mut c = PromptCluster::start(hits[0]);
        for h in &hits[1..] {
            c.push(*h);
        }
        c.tally();
        c
    }

    #[test]
    fn test_tally_counts_and_median() {
        let c = cluster(&[
            hit(1, 1.0, 0.0, HitClass::Ionization),
            hit(2, 0.5, 10.0, HitClass::Ionization),
            hit(1000, 3.0, 20.0, HitClass::Veto),
        ]);
        assert_eq!(c.count(HitClass::Ionization), 2);
        assert_relative_eq!(c.ionization_energy(), 1.5);
        assert_relative_eq!(c.median_time(), 10.0);
        assert!(c.has_veto());
        assert_eq!(c.ionization_multiplicity(), 0);
    }

    #[test]
    fn test_ionization_multiplicity_counts_segments() {
        let c = cluster(&[
            hit(3, 1.0, 0.0, HitClass::Ionization),
            hit(4, 0.5, 5.0, HitClass::Ionization),
            hit(3, 0.2, 7.0, HitClass::Ionization),
        ]);
        assert_eq!(c.ionization_multiplicity(), 2);
        assert!(!c.is_capture());
    }

    #[test]
    fn test_ibd_like_and_pairs() {
        let ioni = cluster(&[hit(5, 1.5, 0.0, HitClass::Ionization)]);
        let capt = cluster(&[hit(5, 0.5, 5e4, HitClass::NeutronCapture)]);

        let event = CoincidenceEvent {
            event_id: 9,
            time_offset: 0.0,
            clusters: vec![ioni.clone(), capt.clone()],
        };
        assert_eq!(event.is_ibd_like(), 1);
        let pairs = event.signal_pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].ionization_index, 0);
        assert_eq!(pairs[0].capture_index, 1);
        assert_relative_eq!(pairs[0].delay(), 5e4);

        let reversed = CoincidenceEvent {
            clusters: vec![capt.clone(), ioni.clone()],
            ..event.clone()
        };
        assert_eq!(reversed.is_ibd_like(), 1);

        let three = CoincidenceEvent {
            clusters: vec![ioni.clone(), capt, ioni],
            ..event
        };
        assert_eq!(three.is_ibd_like(), 0);
        assert_eq!(three.signal_pairs().len(), 2);
    }
}
