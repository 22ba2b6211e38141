//! Detector response pulses and hit classifications.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Classification of a finalized response pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum HitClass {
    /// Electron, gamma or muon ionization.
    Ionization,
    /// Neutron capture.
    NeutronCapture,
    /// Nuclear recoil (fast neutron).
    Recoil,
    /// Veto detector hit.
    Veto,
    /// Dead volume or below threshold.
    Dead,
}

impl HitClass {
    /// Number of classes.
    pub const COUNT: usize = 5;

    /// All classes, in tally order.
    pub const ALL: [HitClass; Self::COUNT] = [
        HitClass::Ionization,
        HitClass::NeutronCapture,
        HitClass::Recoil,
        HitClass::Veto,
        HitClass::Dead,
    ];

    /// Position in [`HitClass::ALL`], used to index tallies.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            HitClass::Ionization => 0,
            HitClass::NeutronCapture => 1,
            HitClass::Recoil => 2,
            HitClass::Veto => 3,
            HitClass::Dead => 4,
        }
    }

    /// Particle-ID flag written to pulse tables (0 is reserved for unclassified).
    #[inline]
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            HitClass::Ionization => 1,
            HitClass::NeutronCapture => 2,
            HitClass::Recoil => 3,
            HitClass::Veto => 4,
            HitClass::Dead => 5,
        }
    }

    /// Short lowercase name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            HitClass::Ionization => "ionization",
            HitClass::NeutronCapture => "ncapt",
            HitClass::Recoil => "recoil",
            HitClass::Veto => "veto",
            HitClass::Dead => "dead",
        }
    }
}

impl std::fmt::Display for HitClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Calibrated energy deposition in one detector segment.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResponsePulse {
    /// Simulation event number.
    pub event_id: i64,
    /// Segment (volume) number.
    pub volume_id: i32,
    /// Quenched (visible) energy [MeVee].
    pub energy: f64,
    /// Pulse time [ns].
    pub time: f64,
    /// Position along the segment's readout axis [mm].
    pub position: f64,
    /// Pulse-shape discrimination value in `[0, 1]`.
    pub psd: f64,
    /// Deposited (unquenched) energy [MeV].
    pub deposited_energy: f64,
    /// Summed energy-weighted dE/dx integral of the contributing deposits.
    pub dedx_integral: f64,
}

impl ResponsePulse {
    /// Cheap particle-ID proxy `deposited_energy / dedx_integral`.
    ///
    /// Infinite when no dE/dx was recorded.
    #[inline]
    #[must_use]
    pub fn dedx_proxy(&self) -> f64 {
        if self.dedx_integral > 0.0 {
            self.deposited_energy / self.dedx_integral
        } else {
            f64::INFINITY
        }
    }

    /// Shifts the pulse by an event time offset and wraps it into `[0, runtime)`.
    ///
    /// Long-delayed pulses that run past the end of the run reappear at its
    /// start, and negative times wrap to its end. A non-positive `runtime`
    /// only applies the offset.
    #[must_use]
    pub fn placed_in_run(mut self, offset: f64, runtime: f64) -> Self {
        self.time += offset;
        if runtime > 0.0 && self.time.is_finite() && !(0.0..runtime).contains(&self.time) {
            let wrapped = self.time.rem_euclid(runtime);
            // rem_euclid rounds tiny negative values up to `runtime`
            self.time = if wrapped < runtime { wrapped } else { 0.0 };
        }
        self
    }
}

/// Total-order comparison of pulse times.
#[inline]
#[must_use]
pub fn compare_pulse_times(a: &ResponsePulse, b: &ResponsePulse) -> std::cmp::Ordering {
    a.time.total_cmp(&b.time)
}

/// Whether ionization is confined to a single segment.
///
/// True when exactly one volume holds more than 0.2 MeV and no volume holds
/// more than 20 MeV.
#[must_use]
pub fn is_isolated_segment<'a, I>(volume_energies: I) -> bool
where
    I: IntoIterator<Item = &'a f64>,
{
    let mut above_threshold = 0;
    let mut saturated = 0;
    for &e in volume_energies {
        above_threshold += usize::from(e > 0.2);
        saturated += usize::from(e > 20.0);
    }
    above_threshold == 1 && saturated == 0
}
