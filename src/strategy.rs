//! Construction strategy per build node
//!
//! Biases with too few imsets for their detector mode are combined against the
//! base bias instead of on their own. Very deep biases are built from two
//! interleaved halves that are averaged. Darks are always combined against
//! their baselines.

use crate::config::{PipelineConfig, ThresholdTable};
use crate::error::{RefError, Result};
use crate::observation::{Category, ModeKey, Observation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a node's frames are turned into its artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Independent combine of the frames
    Direct,
    /// Combine differentially against one or more baseline artifacts
    BaselineAssisted,
    /// Combine two time-interleaved halves directly, then average them
    SplitAverage,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Direct => "direct",
            Strategy::BaselineAssisted => "baseline-assisted",
            Strategy::SplitAverage => "split-average",
        };
        f.write_str(name)
    }
}

impl Strategy {
    /// A split needs at least one frame per half; a lone frame is combined directly
    pub fn for_frame_count(self, frames: usize) -> Strategy {
        match self {
            Strategy::SplitAverage if frames < 2 => Strategy::Direct,
            other => other,
        }
    }
}

/// Chooses a strategy from imset counts and the threshold table
#[derive(Debug, Clone)]
pub struct StrategySelector<'c> {
    thresholds: &'c ThresholdTable,
    split_above: u32,
}

impl<'c> StrategySelector<'c> {
    pub fn new(config: &'c PipelineConfig) -> Self {
        Self {
            thresholds: &config.thresholds,
            split_above: config.split_above,
        }
    }

    /// Strategy for a node of `category` holding `imsets` exposures in `mode`
    ///
    /// # Errors
    /// `UnknownMode` when a bias mode has no threshold; there is no default.
    pub fn select(&self, category: Category, imsets: u32, mode: ModeKey) -> Result<Strategy> {
        match category {
            Category::Dark => Ok(Strategy::BaselineAssisted),
            Category::Bias => {
                let threshold = self
                    .thresholds
                    .get(mode)
                    .ok_or(RefError::UnknownMode { mode })?;

                let strategy = if imsets > self.split_above {
                    Strategy::SplitAverage
                } else if imsets < threshold {
                    Strategy::BaselineAssisted
                } else {
                    Strategy::Direct
                };
                tracing::debug!(
                    "{} imsets in mode {} (threshold {}): {}",
                    imsets,
                    mode,
                    threshold,
                    strategy
                );
                Ok(strategy)
            }
        }
    }
}

/// Split frames into two halves of alternating acquisition order
///
/// Frames are sorted by timestamp; even ranks go to the first half and odd ranks
/// to the second, so both halves span the whole period.
pub fn split_interleaved(frames: &[Observation]) -> (Vec<Observation>, Vec<Observation>) {
    let mut sorted: Vec<&Observation> = frames.iter().collect();
    sorted.sort_by(|a, b| a.timestamp().total_cmp(&b.timestamp()));

    let (mut first, mut second) = (Vec::new(), Vec::new());
    for (rank, obs) in sorted.into_iter().enumerate() {
        if rank % 2 == 0 {
            first.push(obs.clone());
        } else {
            second.push(obs.clone());
        }
    }
    (first, second)
}
