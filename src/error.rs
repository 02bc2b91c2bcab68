//! Error taxonomy for reference-file construction
//!
//! Configuration errors (unknown detector mode, unclassifiable folder) abort the
//! run and are never retried. Empty periods are fatal or advisory depending on
//! the partitioning entry point. Combine failures are fatal for the failing node.

use crate::combine::CombineError;
use crate::layout::PeriodLabel;
use crate::observation::{Category, ModeKey};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by partitioning, discovery, planning and building
#[derive(Error, Debug)]
pub enum RefError {
    #[error("No imset threshold configured for detector mode {mode} (gain={}, xbin={}, ybin={})", .mode.gain, .mode.xbin, .mode.ybin)]
    UnknownMode { mode: ModeKey },

    #[error("Folder {} is neither a bias nor a dark period folder", .path.display())]
    UnrecognizedFolder { path: PathBuf },

    #[error("Frames in {} mix detector modes {first} and {other}", .folder.display())]
    MixedModes {
        folder: PathBuf,
        first: ModeKey,
        other: ModeKey,
    },

    #[error("Period folder {} holds no raw frames", .folder.display())]
    NoFrames { folder: PathBuf },

    #[error("Period {label} [{begin:.5}, {end:.5}) of {category} {mode} received no observations")]
    EmptyPeriod {
        category: Category,
        mode: ModeKey,
        label: PeriodLabel,
        begin: f64,
        end: f64,
    },

    #[error("Combine failed for {node} -> {}: {source}", .output.display())]
    Combine {
        node: String,
        output: PathBuf,
        #[source]
        source: CombineError,
    },

    #[error("Baseline {} required by {node} does not exist", .path.display())]
    MissingBaseline { node: String, path: PathBuf },

    #[error("Metadata unavailable for {}: {reason}", .frame.display())]
    Metadata { frame: PathBuf, reason: String },

    #[error("Anneal cycle end {end:.5} does not follow its start {begin:.5}")]
    InvalidCycle { begin: f64, end: f64 },

    #[error("Period policy returned {got} lengths for {expected} periods")]
    PolicyMismatch { expected: usize, got: usize },

    #[error("Period policy lengths leave {label} empty: begins at {begin:.5}, cycle ends at {end:.5}")]
    PolicyOverrun {
        label: PeriodLabel,
        begin: f64,
        end: f64,
    },

    #[error("Observation {id} is missing at {} after relocation", .path.display())]
    MoveVerification { id: String, path: PathBuf },

    #[error("Build graph contains a dependency cycle through {0}")]
    DependencyCycle(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RefError {
    /// Attach a path to an IO error
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        RefError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Configuration errors are never retried
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RefError::UnknownMode { .. }
                | RefError::UnrecognizedFolder { .. }
                | RefError::MixedModes { .. }
                | RefError::Config(_)
        )
    }
}

/// Result type for reference-file operations
pub type Result<T> = std::result::Result<T, RefError>;
