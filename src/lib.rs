//! refforge - calibration reference files from anneal-cycle frame collections
//!
//! This library partitions time-stamped raw bias and dark frames into weekly and
//! biweekly periods of an anneal cycle, then builds the base and per-period
//! reference artifacts in dependency order. The output tree is the build state:
//! re-running skips every artifact already on disk.

pub mod anneal;
pub mod build;
pub mod cli;
pub mod combine;
pub mod config;
pub mod discovery;
pub mod error;
pub mod layout;
pub mod maintenance;
pub mod observation;
pub mod period;
pub mod pipeline;
pub mod strategy;

pub use error::{RefError, Result};
