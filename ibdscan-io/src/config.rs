//! Run configuration loaded from JSON.

use crate::{Error, Result};
use ibdscan_algorithms::EventProcessor;
use ibdscan_core::{AnalysisConfig, Calibration, ClusteringConfig, ResponseConfig};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Every setting of one processing run.
///
/// Missing sections take their defaults. Inside an explicit `calibration`
/// object, missing constants stay unset and are reported when the run is
/// validated.
///
/// ```json
/// {
///   "clustering": { "gap": 50.0 },
///   "calibration": { "k0": 0.1049, "k1": 0, "k2": 0, "k3": 0,
///                    "psd_scale": 0.2, "psd_gamma0": 0.04, "psd_ncapt0": 0.98,
///                    "psd_gamma": 0.14, "psd_ncapt": 0.31 },
///   "analysis": { "prompt_timescale": 100.0, "delayed_timescale": 300000.0 },
///   "runtime": 1e9
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Deposit merge settings.
    pub clustering: ClusteringConfig,
    /// Quenching and PSD constants.
    pub calibration: Calibration,
    /// Pulse formation settings.
    pub response: ResponseConfig,
    /// Classification and coincidence settings.
    pub analysis: AnalysisConfig,
    /// Run length [ns] into which event times are wrapped.
    pub runtime: Option<f64>,
}

impl RunConfig {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if the
    /// settings are unusable.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        log::info!("loaded run configuration from {}", path.display());
        Ok(config)
    }

    /// Parses and validates a configuration string.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or the settings are unusable.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Pretty-printed JSON form.
    ///
    /// # Errors
    /// Returns an error if a value cannot be encoded.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks every section.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.clustering
            .validate()
            .map_err(|e| Error::CoreError(e.into()))?;
        self.calibration
            .resolve()
            .map_err(|e| Error::CoreError(e.into()))?;
        if let Some(runtime) = self.runtime {
            if !runtime.is_finite() || runtime <= 0.0 {
                return Err(Error::InvalidFormat(format!(
                    "runtime must be positive and finite, got {runtime}"
                )));
            }
        }
        Ok(())
    }

    /// Builds the event pipeline for this run.
    ///
    /// # Errors
    /// Returns an error if the pipeline rejects the settings.
    pub fn build_processor(&self) -> Result<EventProcessor> {
        let processor = EventProcessor::new(
            self.clustering.clone(),
            &self.calibration,
            self.response.clone(),
            self.analysis.clone(),
        )?;
        Ok(match self.runtime {
            Some(runtime) => processor.with_runtime(runtime),
            None => processor,
        })
    }
}
