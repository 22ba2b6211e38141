//! Error types for ibdscan-core.

use thiserror::Error;

/// Result type alias for ibdscan operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for ibdscan operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A deposition record failed ingestion checks.
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] RecordError),

    /// Clustering error.
    #[error("clustering error: {0}")]
    Clustering(#[from] ClusteringError),

    /// Calibration error.
    #[error("calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Reasons a [`DepositRecord`](crate::DepositRecord) is rejected at ingestion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    /// Deposited energy below zero.
    #[error("negative energy: {0}")]
    NegativeEnergy(f64),

    /// Energy is NaN or infinite.
    #[error("non-finite energy")]
    NonFiniteEnergy,

    /// Time is NaN or infinite.
    #[error("non-finite time")]
    NonFiniteTime,

    /// Position component is NaN or infinite.
    #[error("non-finite position on axis {axis}")]
    NonFinitePosition { axis: usize },

    /// One of the RMS spreads is NaN or infinite.
    #[error("non-finite spread")]
    NonFiniteSpread,
}

/// Clustering errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusteringError {
    /// A record arrived earlier than the time already consumed for its key.
    #[error("out-of-order record for key {key}: time {time} precedes {watermark}")]
    OutOfOrderRecord {
        /// Grouping key, rendered with `Debug`.
        key: String,
        /// Time of the offending record.
        time: f64,
        /// Latest time already merged or finalized for the key.
        watermark: f64,
    },

    /// Invalid clustering configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Calibration errors, fatal at construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// A required constant was not supplied.
    #[error("missing calibration constant `{0}`")]
    Missing(&'static str),

    /// A constant was supplied but is NaN or infinite.
    #[error("calibration constant `{name}` is not finite: {value}")]
    NonFinite { name: &'static str, value: f64 },

    /// Constants are individually valid but inconsistent.
    #[error("inconsistent calibration: {0}")]
    Inconsistent(String),
}
