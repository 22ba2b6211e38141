//! Detector response: quenching, PSD and per-segment pulse formation.

use crate::window::TimeWindowClusterer;
use ibdscan_core::clustering::{Clusterable, ClusteringConfig};
use ibdscan_core::config::{Calibration, PsdModel, QuenchingCurve, ResponseConfig};
use ibdscan_core::error::{ClusteringError, Error, RecordError, Result};
use ibdscan_core::pulse::ResponsePulse;
use ibdscan_core::record::DepositRecord;

/// Running sums for one pulse under construction.
#[derive(Debug, Clone, Copy)]
struct PulseAccumulator {
    /// Energy-weighted merge of the contributing deposits.
    merged: DepositRecord,
    quenched: f64,
    /// Quenched-energy-weighted PSD sum.
    psd_moment: f64,
}

impl Clusterable for PulseAccumulator {
    fn time(&self) -> f64 {
        self.merged.time
    }

    fn weight(&self) -> f64 {
        self.merged.energy
    }

    fn absorb(&mut self, other: &Self) {
        self.merged.absorb(&other.merged);
        self.quenched += other.quenched;
        self.psd_moment += other.psd_moment;
    }

    fn validate(&self) -> std::result::Result<(), RecordError> {
        self.merged.validate()
    }
}

fn segment_key(acc: &PulseAccumulator) -> (i64, i32) {
    (acc.merged.event_id, acc.merged.volume_id)
}

/// Converts merged deposits into calibrated response pulses.
#[derive(Debug, Clone)]
pub struct DetectorResponse {
    curve: QuenchingCurve,
    psd: PsdModel,
    config: ResponseConfig,
}

impl DetectorResponse {
    /// Builds the response from calibration constants.
    ///
    /// # Errors
    /// Fails if a calibration constant is missing or non-finite, or if the
    /// pulse gap or position axis is unusable.
    pub fn new(calibration: &Calibration, config: ResponseConfig) -> Result<Self> {
        let (curve, psd) = calibration.resolve()?;
        if config.position_axis > 2 {
            return Err(Error::ConfigError(format!(
                "position_axis must be 0, 1 or 2, got {}",
                config.position_axis
            )));
        }
        ClusteringConfig::new().with_gap(config.pulse_gap).validate()?;
        Ok(Self { curve, psd, config })
    }

    /// Quenched (visible) energy of a deposit.
    #[must_use]
    pub fn quench(&self, record: &DepositRecord) -> f64 {
        record.energy * self.curve.factor(record.dedx_ratio())
    }

    /// PSD value of a deposit in `[0, 1]`.
    #[must_use]
    pub fn psd(&self, record: &DepositRecord) -> f64 {
        let u = if record.is_electron_like() {
            self.psd.gamma0
        } else {
            self.psd.raw(record.dedx_ratio())
        };
        self.psd.rescale(u)
    }

    /// Response settings.
    #[must_use]
    pub fn config(&self) -> &ResponseConfig {
        &self.config
    }

    /// Combines deposits into one pulse per segment and time window.
    ///
    /// Deposits of one event and volume that lie within `pulse_gap` of each
    /// other form a single pulse: quenched energies add, PSD is averaged with
    /// quenched-energy weights, time and position come from the
    /// energy-weighted merge. Zero-energy bookkeeping records are discarded
    /// and pulses without visible energy are not emitted. The result is
    /// time-ordered and does not depend on the input order.
    ///
    /// # Errors
    /// Propagates clustering errors; none occur for finite input.
    pub fn respond(
        &self,
        records: &[DepositRecord],
    ) -> std::result::Result<Vec<ResponsePulse>, ClusteringError> {
        let mut deposits: Vec<&DepositRecord> =
            records.iter().filter(|r| !r.is_bookkeeping()).collect();
        deposits.sort_by(|a, b| {
            a.time
                .total_cmp(&b.time)
                .then(a.event_id.cmp(&b.event_id))
                .then(a.volume_id.cmp(&b.volume_id))
                .then(a.particle_type.cmp(&b.particle_type))
                .then(a.energy.total_cmp(&b.energy))
        });

        let config = ClusteringConfig::new().with_gap(self.config.pulse_gap);
        let mut clusterer = TimeWindowClusterer::new(config, segment_key)?;
        let mut pulses = Vec::new();
        for record in deposits {
            let quenched = self.quench(record);
            let acc = PulseAccumulator {
                merged: *record,
                quenched,
                psd_moment: quenched * self.psd(record),
            };
            if let Some(done) = clusterer.add(acc)? {
                pulses.extend(self.finish(&done.value));
            }
        }
        for done in clusterer.flush() {
            pulses.extend(self.finish(&done.value));
        }

        pulses.sort_by(|a, b| {
            a.time
                .total_cmp(&b.time)
                .then(a.event_id.cmp(&b.event_id))
                .then(a.volume_id.cmp(&b.volume_id))
        });
        log::debug!(
            "response: {} deposits -> {} pulses",
            clusterer.statistics().records_seen,
            pulses.len()
        );
        Ok(pulses)
    }

    fn finish(&self, acc: &PulseAccumulator) -> Option<ResponsePulse> {
        if acc.quenched <= 0.0 {
            return None;
        }
        let merged = &acc.merged;
        Some(ResponsePulse {
            event_id: merged.event_id,
            volume_id: merged.volume_id,
            energy: acc.quenched,
            time: merged.time,
            position: merged.position[self.config.position_axis],
            psd: acc.psd_moment / acc.quenched,
            deposited_energy: merged.energy,
            dedx_integral: merged.dedx_integral,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const ALPHA: i32 = 1_000_020_040;

    fn response() -> DetectorResponse {
        DetectorResponse::new(&Calibration::default(), ResponseConfig::default()).unwrap()
    }

    #[test]
    fn test_missing_calibration_is_fatal() {
        let cal = Calibration {
            psd_ncapt: None,
            ..Calibration::default()
        };
        let err = DetectorResponse::new(&cal, ResponseConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Calibration(_)));

        let bad_axis = ResponseConfig::default().with_position_axis(3);
        assert!(DetectorResponse::new(&Calibration::default(), bad_axis).is_err());
    }

    #[test]
    fn test_quench_uses_mean_dedx() {
        let r = response();
        let rec = DepositRecord::new(1, 4, ALPHA, 2.0, 0.0).with_mean_dedx(10.0);
        assert_relative_eq!(r.quench(&rec), 2.0 / (1.0 + 0.1049 * 10.0), epsilon = 1e-12);

        let bare = DepositRecord::new(1, 4, ALPHA, 2.0, 0.0);
        assert_relative_eq!(r.quench(&bare), 2.0);
    }

    #[test]
    fn test_electron_psd_is_gamma_anchor() {
        let r = response();
        let e = DepositRecord::new(1, 4, -11, 1.0, 0.0).with_mean_dedx(300.0);
        assert_relative_eq!(r.psd(&e), 0.14, epsilon = 1e-12);
    }

    #[test]
    fn test_pulses_per_volume_and_window() {
        let r = response();
        let records = [
            DepositRecord::new(7, 1, 11, 1.0, 10.0),
            DepositRecord::new(7, 2, 11, 0.5, 12.0),
            DepositRecord::new(7, 1, 22, 0.0, 11.0),
            DepositRecord::new(7, 1, 11, 0.5, 40.0),
            // delayed activity in the same segment is a separate pulse
            DepositRecord::new(7, 1, ALPHA, 0.6, 5e4),
        ];
        let pulses = r.respond(&records).unwrap();
        assert_eq!(pulses.len(), 3);
        assert_eq!(pulses[0].volume_id, 2);
        assert_relative_eq!(pulses[0].time, 12.0);
        assert_eq!(pulses[1].volume_id, 1);
        assert_relative_eq!(pulses[1].energy, 1.5);
        assert_relative_eq!(pulses[1].time, 20.0);
        assert_eq!(pulses[2].volume_id, 1);
        assert_relative_eq!(pulses[2].time, 5e4);
    }

    #[test]
    fn test_position_axis_selection() {
        let r = DetectorResponse::new(
            &Calibration::default(),
            ResponseConfig::default().with_position_axis(0),
        )
        .unwrap();
        let rec = DepositRecord::new(1, 3, 11, 1.0, 0.0).with_position([12.0, -4.0, 80.0]);
        let pulses = r.respond(&[rec]).unwrap();
        assert_relative_eq!(pulses[0].position, 12.0);
    }

    #[test]
    fn test_zero_visible_energy_emits_nothing() {
        let r = DetectorResponse::new(
            &Calibration::default().with_quenching(-1.0, 0.0, 0.0, 0.0),
            ResponseConfig::default(),
        )
        .unwrap();
        let rec = DepositRecord::new(1, 3, ALPHA, 1.0, 0.0).with_mean_dedx(5.0);
        assert!(r.respond(&[rec]).unwrap().is_empty());
    }
}
