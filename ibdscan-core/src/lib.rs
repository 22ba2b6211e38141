//! ibdscan-core: Core types for scintillator deposition processing.
//!
//! This crate provides the deposition record and its energy-weighted merge
//! operator, the clustering contracts shared by the streaming clusterers,
//! response pulses, coincidence structures and configuration.
//!

pub mod clustering;
pub mod config;
pub mod error;
pub mod event;
pub mod merge;
pub mod pulse;
pub mod record;
pub mod sink;

pub use clustering::{
    ClusterAccumulator, ClusterHandle, ClusterSink, Clusterable, ClusteringConfig,
    ClusteringStatistics,
};
pub use config::{AnalysisConfig, Calibration, PsdModel, QuenchingCurve, ResponseConfig};
pub use error::{CalibrationError, ClusteringError, Error, RecordError, Result};
pub use event::{ClassifiedHit, CoincidenceEvent, PromptCluster, SignalPair};
pub use merge::{is_zero_weight_pair, merge};
pub use pulse::{compare_pulse_times, is_isolated_segment, HitClass, ResponsePulse};
pub use record::{DepositRecord, PDG_ELECTRON};
pub use sink::{EventSink, MemorySink};
