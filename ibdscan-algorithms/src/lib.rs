//! ibdscan-algorithms: Streaming clustering and event classification.
//!
//! This crate provides:
//! - **Window clustering** - gap-based and sliding-window clusterers over
//!   keyed, time-ordered streams
//! - **Detector response** - quenching, PSD and per-segment pulse formation
//! - **Coincidence analysis** - hit classification, prompt clusters and
//!   delayed-coincidence events
//! - **Processing** - the per-event pipeline and a rayon batch driver
//!
#![warn(missing_docs)]

mod coincidence;
mod processing;
mod response;
pub mod window;

pub use coincidence::{
    classify, AnalysisStatistics, Classifier, CoincidenceScanner, TimeStructureAnalyzer,
};
pub use processing::{
    process_events_parallel, sort_pulses_by_time, EventGroups, EventOutput, EventProcessor,
    ProcessingStatistics,
};
pub use response::DetectorResponse;
pub use window::{SlidingWindowClusterer, TimeWindowClusterer};

// Re-export core clustering types
pub use ibdscan_core::clustering::{ClusterSink, ClusteringConfig, ClusteringStatistics};
