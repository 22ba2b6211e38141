//! ibdscan-io: Run configuration and CSV output for ibdscan.
//!
//! This crate loads a [`RunConfig`] from JSON and provides CSV
//! implementations of [`ibdscan_core::EventSink`] for response pulses and
//! classified coincidence events.
//!

mod config;
mod error;
mod writer;

pub use config::RunConfig;
pub use error::{Error, Result};
pub use writer::{CsvEventSink, CsvOutput, CsvPulseSink};
