//! Energy-weighted merge operator for deposition records.
//!
//! Means are combined as energy-weighted averages and RMS spreads through
//! their second moments, so merging is commutative and associative up to
//! floating-point rounding and can be used as the fold step of clustering.

use crate::record::DepositRecord;

/// Combines two records into one, preserving energy-weighted statistics.
///
/// Identifiers (`event_id`, `volume_id`, `particle_type`) are taken from `a`.
/// When both operands have zero energy the unweighted fallback of
/// [`DepositRecord::absorb`] applies.
#[must_use]
pub fn merge(a: &DepositRecord, b: &DepositRecord) -> DepositRecord {
    let mut c = *a;
    c.absorb(b);
    c
}

/// Whether merging `a` and `b` takes the zero-weight fallback path.
#[inline]
#[must_use]
pub fn is_zero_weight_pair(a: &DepositRecord, b: &DepositRecord) -> bool {
    a.energy + b.energy <= 0.0
}

/// Weighted mean and RMS of two (mean, rms, weight) samples.
///
/// Uses the second-moment identity `var = <x^2> - <x>^2`; small negative
/// variances from cancellation are clamped to zero.
#[inline]
fn combine_weighted(a: (f64, f64, f64), b: (f64, f64, f64), total: f64) -> (f64, f64) {
    let (mean_a, rms_a, w_a) = a;
    let (mean_b, rms_b, w_b) = b;
    let mean = (mean_a * w_a + mean_b * w_b) / total;
    let second = ((rms_a * rms_a + mean_a * mean_a) * w_a + (rms_b * rms_b + mean_b * mean_b) * w_b)
        / total;
    (mean, (second - mean * mean).max(0.0).sqrt())
}

/// Unweighted midpoint of two (mean, rms) samples.
///
/// Averages the squared spreads without the parallel-axis term.
#[inline]
fn combine_unweighted(a: (f64, f64), b: (f64, f64)) -> (f64, f64) {
    let mean = 0.5 * (a.0 + b.0);
    let var = 0.5 * (a.1 * a.1 + b.1 * b.1);
    (mean, var.max(0.0).sqrt())
}

impl DepositRecord {
    /// Merges `other` into `self` in place.
    pub fn absorb(&mut self, other: &DepositRecord) {
        let total = self.energy + other.energy;

        if total > 0.0 {
            let (t, dt) = combine_weighted(
                (self.time, self.time_spread, self.energy),
                (other.time, other.time_spread, other.energy),
                total,
            );
            self.time = t;
            self.time_spread = dt;
            for axis in 0..3 {
                let (x, dx) = combine_weighted(
                    (self.position[axis], self.position_spread[axis], self.energy),
                    (other.position[axis], other.position_spread[axis], other.energy),
                    total,
                );
                self.position[axis] = x;
                self.position_spread[axis] = dx;
            }
        } else {
            let (t, dt) = combine_unweighted(
                (self.time, self.time_spread),
                (other.time, other.time_spread),
            );
            self.time = t;
            self.time_spread = dt;
            for axis in 0..3 {
                let (x, dx) = combine_unweighted(
                    (self.position[axis], self.position_spread[axis]),
                    (other.position[axis], other.position_spread[axis]),
                );
                self.position[axis] = x;
                self.position_spread[axis] = dx;
            }
        }

        self.energy = total;
        self.path_length += other.path_length;
        self.dedx_integral += other.dedx_integral;
        self.dedx2_integral += other.dedx2_integral;
    }
}
