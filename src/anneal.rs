//! Anneal cycles: the maintenance intervals bounding one batch of reference files
//!
//! A cycle runs from the end of one CCD anneal to the start of the next. Cycles
//! are normally supplied by the caller; an [`AnnealTable`] can also resolve them
//! from a list of anneals, and [`AnnealCycle::from_extent`] derives one from the
//! time span of the frames themselves.

use crate::error::{RefError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Time interval `[begin, end)` in MJD
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnnealCycle {
    pub begin: f64,
    pub end: f64,
}

impl AnnealCycle {
    pub fn new(begin: f64, end: f64) -> Result<Self> {
        if !(begin.is_finite() && end.is_finite()) || end <= begin {
            return Err(RefError::InvalidCycle { begin, end });
        }
        Ok(Self { begin, end })
    }

    /// Cycle spanning the earliest to the latest of `timestamps`
    pub fn from_extent(timestamps: impl IntoIterator<Item = f64>) -> Result<Self> {
        let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
        for t in timestamps {
            lo = lo.min(t);
            hi = hi.max(t);
        }
        Self::new(lo, hi)
    }

    pub fn span_days(&self) -> f64 {
        self.end - self.begin
    }
}

/// One anneal as recorded in the anneal list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnealRecord {
    pub proposal: u32,
    pub visit: u32,
    /// Anneal start, MJD
    pub start: f64,
    /// Anneal end, MJD
    pub end: f64,
}

impl AnnealRecord {
    /// Product folder name of the cycle closed by this anneal, e.g. `13535_04`
    pub fn folder_name(&self) -> String {
        format!("{}_{:02}", self.proposal, self.visit)
    }
}

/// A cycle together with the product folder it is built in
#[derive(Debug, Clone, PartialEq)]
pub struct NamedCycle {
    pub folder: String,
    pub cycle: AnnealCycle,
}

/// Chronological list of anneals
///
/// # Example TOML
/// ```toml
/// [[anneal]]
/// proposal = 13535
/// visit = 3
/// start = 56900.1
/// end = 56900.9
/// ```
#[derive(Debug, Clone, Default)]
pub struct AnnealTable {
    anneals: Vec<AnnealRecord>,
}

impl AnnealTable {
    pub fn from_records(mut anneals: Vec<AnnealRecord>) -> Self {
        anneals.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self { anneals }
    }

    /// Load the anneal list from a TOML file
    pub fn from_toml<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read anneal table: {}", path.as_ref().display())
        })?;

        #[derive(Deserialize)]
        struct AnnealFile {
            #[serde(default)]
            anneal: Vec<AnnealRecord>,
        }

        let file: AnnealFile =
            toml::from_str(&content).context("Failed to parse TOML anneal table")?;
        Ok(Self::from_records(file.anneal))
    }

    pub fn len(&self) -> usize {
        self.anneals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anneals.is_empty()
    }

    /// Cycle closed by the anneal `(proposal, visit)`: from the previous anneal's
    /// end to this anneal's start
    pub fn cycle_for(&self, proposal: u32, visit: u32) -> Result<AnnealCycle> {
        let pos = self
            .anneals
            .iter()
            .position(|a| a.proposal == proposal && a.visit == visit)
            .ok_or_else(|| {
                RefError::Config(format!("no anneal recorded for {}_{:02}", proposal, visit))
            })?;
        if pos == 0 {
            return Err(RefError::Config(format!(
                "anneal {}_{:02} has no preceding anneal to open its cycle",
                proposal, visit
            )));
        }
        AnnealCycle::new(self.anneals[pos - 1].end, self.anneals[pos].start)
    }

    /// Every complete cycle in the table, oldest first
    pub fn cycles(&self) -> Result<Vec<NamedCycle>> {
        self.anneals
            .windows(2)
            .map(|pair| {
                Ok(NamedCycle {
                    folder: pair[1].folder_name(),
                    cycle: AnnealCycle::new(pair[0].end, pair[1].start)?,
                })
            })
            .collect()
    }
}
