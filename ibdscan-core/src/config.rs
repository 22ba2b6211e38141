//! Calibration constants and analysis settings.
#![allow(clippy::doc_markdown)]

use crate::error::CalibrationError;
use std::ops::Range;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Quenching and PSD calibration constants, supplied externally.
///
/// Every constant is optional so that an incomplete calibration can be
/// detected when the detector response is built rather than producing
/// silently wrong energies.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Calibration {
    /// Linear dE/dx coefficient of the quenching denominator.
    pub k0: Option<f64>,
    /// Quadratic dE/dx coefficient of the quenching denominator.
    pub k1: Option<f64>,
    /// Cubic dE/dx coefficient of the quenching denominator.
    pub k2: Option<f64>,
    /// Quadratic dE/dx coefficient of the quenching numerator.
    pub k3: Option<f64>,
    /// dE/dx scale inside the PSD arctangent.
    pub psd_scale: Option<f64>,
    /// Raw PSD value of electron-like deposits.
    pub psd_gamma0: Option<f64>,
    /// Raw PSD value of neutron-capture deposits.
    pub psd_ncapt0: Option<f64>,
    /// Output PSD assigned to electron-like deposits.
    pub psd_gamma: Option<f64>,
    /// Output PSD assigned to neutron-capture deposits.
    pub psd_ncapt: Option<f64>,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            k0: Some(0.1049),
            k1: Some(0.0),
            k2: Some(0.0),
            k3: Some(0.0),
            psd_scale: Some(0.2),
            psd_gamma0: Some(0.04),
            psd_ncapt0: Some(0.98),
            psd_gamma: Some(0.14),
            psd_ncapt: Some(0.31),
        }
    }
}

/// Rational quenching curve `(1 + k3 d^2) / (1 + k0 d + k1 d^2 + k2 d^3)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuenchingCurve {
    pub k0: f64,
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
}

impl QuenchingCurve {
    /// Visible-energy fraction at mean dE/dx `d`, never negative.
    #[inline]
    #[must_use]
    pub fn factor(&self, d: f64) -> f64 {
        let d2 = d * d;
        let num = 1.0 + self.k3 * d2;
        let den = 1.0 + self.k0 * d + self.k1 * d2 + self.k2 * d2 * d;
        if den > 0.0 {
            (num / den).max(0.0)
        } else {
            0.0
        }
    }
}

/// PSD model: arctangent of scaled dE/dx, mapped onto the output range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PsdModel {
    pub scale: f64,
    pub gamma0: f64,
    pub ncapt0: f64,
    pub gamma: f64,
    pub ncapt: f64,
}

impl PsdModel {
    /// Raw PSD in `[0, 1)` for a mean dE/dx `d`.
    #[inline]
    #[must_use]
    pub fn raw(&self, d: f64) -> f64 {
        (self.scale * d).atan() * std::f64::consts::FRAC_2_PI
    }

    /// Affine map from raw PSD onto `[gamma, ncapt]` anchors, clamped to `[0, 1]`.
    #[inline]
    #[must_use]
    pub fn rescale(&self, u: f64) -> f64 {
        let v = self.gamma + (u - self.gamma0) / (self.ncapt0 - self.gamma0) * (self.ncapt - self.gamma);
        v.clamp(0.0, 1.0)
    }
}

fn required(name: &'static str, value: Option<f64>) -> Result<f64, CalibrationError> {
    match value {
        None => Err(CalibrationError::Missing(name)),
        Some(v) if !v.is_finite() => Err(CalibrationError::NonFinite { name, value: v }),
        Some(v) => Ok(v),
    }
}

impl Calibration {
    /// A calibration with no constants set.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            k0: None,
            k1: None,
            k2: None,
            k3: None,
            psd_scale: None,
            psd_gamma0: None,
            psd_ncapt0: None,
            psd_gamma: None,
            psd_ncapt: None,
        }
    }

    /// Sets the quenching constants.
    #[must_use]
    pub fn with_quenching(mut self, k0: f64, k1: f64, k2: f64, k3: f64) -> Self {
        self.k0 = Some(k0);
        self.k1 = Some(k1);
        self.k2 = Some(k2);
        self.k3 = Some(k3);
        self
    }

    /// Sets the PSD scale and the raw/output anchor values.
    #[must_use]
    pub fn with_psd(mut self, scale: f64, gamma0: f64, ncapt0: f64, gamma: f64, ncapt: f64) -> Self {
        self.psd_scale = Some(scale);
        self.psd_gamma0 = Some(gamma0);
        self.psd_ncapt0 = Some(ncapt0);
        self.psd_gamma = Some(gamma);
        self.psd_ncapt = Some(ncapt);
        self
    }

    /// Resolves the constants into the quenching curve and PSD model.
    ///
    /// # Errors
    /// [`CalibrationError::Missing`] for an absent constant,
    /// [`CalibrationError::NonFinite`] for NaN or infinity, and
    /// [`CalibrationError::Inconsistent`] when the PSD anchors coincide.
    pub fn resolve(&self) -> Result<(QuenchingCurve, PsdModel), CalibrationError> {
        let curve = QuenchingCurve {
            k0: required("k0", self.k0)?,
            k1: required("k1", self.k1)?,
            k2: required("k2", self.k2)?,
            k3: required("k3", self.k3)?,
        };
        let psd = PsdModel {
            scale: required("psd_scale", self.psd_scale)?,
            gamma0: required("psd_gamma0", self.psd_gamma0)?,
            ncapt0: required("psd_ncapt0", self.psd_ncapt0)?,
            gamma: required("psd_gamma", self.psd_gamma)?,
            ncapt: required("psd_ncapt", self.psd_ncapt)?,
        };
        if (psd.ncapt0 - psd.gamma0).abs() < f64::EPSILON {
            return Err(CalibrationError::Inconsistent(
                "psd_ncapt0 and psd_gamma0 must differ".into(),
            ));
        }
        Ok((curve, psd))
    }
}

/// Settings for combining per-particle deposits into response pulses.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ResponseConfig {
    /// Deposits of one volume closer than this [ns] form one pulse.
    pub pulse_gap: f64,
    /// Position axis (0, 1 or 2) reported as the pulse position.
    pub position_axis: usize,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            pulse_gap: 50.0,
            position_axis: 2,
        }
    }
}

impl ResponseConfig {
    /// Sets the pulse gap.
    #[must_use]
    pub fn with_pulse_gap(mut self, gap: f64) -> Self {
        self.pulse_gap = gap;
        self
    }

    /// Sets the reported position axis.
    #[must_use]
    pub fn with_position_axis(mut self, axis: usize) -> Self {
        self.position_axis = axis;
        self
    }
}

/// Thresholds and timescales for hit classification and coincidence grouping.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AnalysisConfig {
    /// Timescale [ns] for grouping hits into prompt clusters.
    pub prompt_timescale: f64,
    /// Timescale [ns] for grouping prompt clusters into coincidence events.
    pub delayed_timescale: f64,
    /// Lower edge of the neutron-capture energy window [MeVee].
    pub ncapt_emin: f64,
    /// Upper edge of the neutron-capture energy window [MeVee].
    pub ncapt_emax: f64,
    /// Segment trigger threshold [MeVee].
    pub trig_thresh: f64,
    /// Veto trigger threshold [MeVee].
    pub veto_thresh: f64,
    /// Cut on the energy / dE/dx proxy separating heavy from light particles.
    pub psd_cut: f64,
    /// Volume numbers belonging to the veto detector.
    pub veto_volumes: Range<i32>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            prompt_timescale: 100.0,
            delayed_timescale: 300e3,
            ncapt_emin: 0.40,
            ncapt_emax: 0.60,
            trig_thresh: 0.10,
            veto_thresh: 0.50,
            psd_cut: 0.1,
            veto_volumes: 1000..i32::MAX,
        }
    }
}

impl AnalysisConfig {
    /// Creates the default analysis settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the prompt and delayed timescales.
    #[must_use]
    pub fn with_timescales(mut self, prompt: f64, delayed: f64) -> Self {
        self.prompt_timescale = prompt;
        self.delayed_timescale = delayed;
        self
    }

    /// Sets the neutron-capture energy window.
    #[must_use]
    pub fn with_capture_window(mut self, emin: f64, emax: f64) -> Self {
        self.ncapt_emin = emin;
        self.ncapt_emax = emax;
        self
    }

    /// Sets the trigger and veto thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, trig: f64, veto: f64) -> Self {
        self.trig_thresh = trig;
        self.veto_thresh = veto;
        self
    }

    /// Sets the dE/dx proxy cut.
    #[must_use]
    pub fn with_psd_cut(mut self, cut: f64) -> Self {
        self.psd_cut = cut;
        self
    }

    /// Sets the veto volume range.
    #[must_use]
    pub fn with_veto_volumes(mut self, volumes: Range<i32>) -> Self {
        self.veto_volumes = volumes;
        self
    }
}
