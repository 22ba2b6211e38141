//! Energy-deposition records produced by the transport simulation.

use crate::error::RecordError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// PDG code of the electron.
pub const PDG_ELECTRON: i32 = 11;

/// Localized energy deposition of one track segment in one detector volume.
///
/// Energy is the weight for every averaged quantity. A record with zero
/// energy carries no statistical weight and is only a bookkeeping tag.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DepositRecord {
    /// Deposited energy [MeV].
    pub energy: f64,
    /// Energy-weighted mean time [ns].
    pub time: f64,
    /// RMS time spread [ns].
    pub time_spread: f64,
    /// Energy-weighted mean position [mm].
    pub position: [f64; 3],
    /// RMS position spread per axis [mm].
    pub position_spread: [f64; 3],
    /// Accumulated track length [mm].
    pub path_length: f64,
    /// Energy-weighted integral of dE/dx.
    pub dedx_integral: f64,
    /// Energy-weighted integral of (dE/dx)^2.
    pub dedx2_integral: f64,
    /// Detector volume (segment) number; negative for dead material.
    pub volume_id: i32,
    /// PDG particle code, treated as an opaque integer.
    pub particle_type: i32,
    /// Originating simulation event.
    pub event_id: i64,
}

impl DepositRecord {
    /// Creates a point-like record with zero spreads and no dE/dx information.
    #[must_use]
    pub fn new(event_id: i64, volume_id: i32, particle_type: i32, energy: f64, time: f64) -> Self {
        Self {
            energy,
            time,
            volume_id,
            particle_type,
            event_id,
            ..Self::default()
        }
    }

    /// Sets the mean position.
    #[must_use]
    pub fn with_position(mut self, position: [f64; 3]) -> Self {
        self.position = position;
        self
    }

    /// Sets the RMS position spread.
    #[must_use]
    pub fn with_position_spread(mut self, spread: [f64; 3]) -> Self {
        self.position_spread = spread;
        self
    }

    /// Sets the RMS time spread.
    #[must_use]
    pub fn with_time_spread(mut self, spread: f64) -> Self {
        self.time_spread = spread;
        self
    }

    /// Sets the accumulated track length.
    #[must_use]
    pub fn with_path_length(mut self, length: f64) -> Self {
        self.path_length = length;
        self
    }

    /// Sets the dE/dx integrals.
    #[must_use]
    pub fn with_dedx(mut self, dedx_integral: f64, dedx2_integral: f64) -> Self {
        self.dedx_integral = dedx_integral;
        self.dedx2_integral = dedx2_integral;
        self
    }

    /// Sets the dE/dx integral from a mean dE/dx, so that `dedx_ratio() == d`.
    #[must_use]
    pub fn with_mean_dedx(mut self, d: f64) -> Self {
        self.dedx_integral = d * self.energy;
        self.dedx2_integral = d * d * self.energy;
        self
    }

    /// Whether this record is a zero-energy bookkeeping tag.
    #[inline]
    #[must_use]
    pub fn is_bookkeeping(&self) -> bool {
        self.energy == 0.0
    }

    /// Energy-weighted mean dE/dx, `dedx_integral / energy`.
    ///
    /// Zero for bookkeeping records.
    #[inline]
    #[must_use]
    pub fn dedx_ratio(&self) -> f64 {
        if self.energy > 0.0 {
            self.dedx_integral / self.energy
        } else {
            0.0
        }
    }

    /// Whether the particle is an electron or positron.
    #[inline]
    #[must_use]
    pub fn is_electron_like(&self) -> bool {
        self.particle_type.abs() == PDG_ELECTRON
    }

    /// Checks the ingestion invariants.
    ///
    /// # Errors
    /// Returns the first violated invariant: negative or non-finite energy,
    /// non-finite time, position or spread.
    pub fn validate(&self) -> Result<(), RecordError> {
        if !self.energy.is_finite() {
            return Err(RecordError::NonFiniteEnergy);
        }
        if self.energy < 0.0 {
            return Err(RecordError::NegativeEnergy(self.energy));
        }
        if !self.time.is_finite() {
            return Err(RecordError::NonFiniteTime);
        }
        if let Some(axis) = self.position.iter().position(|x| !x.is_finite()) {
            return Err(RecordError::NonFinitePosition { axis });
        }
        if !self.time_spread.is_finite() || self.position_spread.iter().any(|x| !x.is_finite()) {
            return Err(RecordError::NonFiniteSpread);
        }
        Ok(())
    }
}
