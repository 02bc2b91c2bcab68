//! Pipeline configuration
//!
//! Thresholds and period lengths are injected into the selector and partitioner
//! rather than read from module-level tables, so callers (and tests) can swap
//! policies.

use crate::layout::PeriodClass;
use crate::observation::ModeKey;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Imset count above which a bias is built from two interleaved halves
pub const DEFAULT_SPLIT_ABOVE: u32 = 120;

/// How the upper boundary of a cycle's last period is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpperClosure {
    /// Every period is `[begin, end)`, the last one included
    Strict,
    /// Every period is `[begin, end)` except the last, which is `[begin, end]`
    #[default]
    InclusiveFinal,
}

/// One row of the threshold table as written in TOML
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdEntry {
    pub gain: u8,
    pub xbin: u8,
    pub ybin: u8,
    /// Fewest imsets for which a bias is combined on its own
    pub min_imsets: u32,
}

/// Minimum imset count per detector mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ThresholdEntry>", into = "Vec<ThresholdEntry>")]
pub struct ThresholdTable {
    by_mode: BTreeMap<ModeKey, u32>,
}

impl ThresholdTable {
    /// Table used for STIS CCD biases
    pub fn builtin() -> Self {
        let by_mode = [
            ((1, 1, 1), 98),
            ((1, 1, 2), 25),
            ((1, 2, 1), 25),
            ((1, 2, 2), 7),
            ((1, 4, 1), 7),
            ((1, 4, 2), 4),
            ((4, 1, 1), 1),
        ]
        .into_iter()
        .map(|((g, x, y), n)| (ModeKey::new(g, x, y), n))
        .collect();
        Self { by_mode }
    }

    pub fn get(&self, mode: ModeKey) -> Option<u32> {
        self.by_mode.get(&mode).copied()
    }

    pub fn len(&self) -> usize {
        self.by_mode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_mode.is_empty()
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TryFrom<Vec<ThresholdEntry>> for ThresholdTable {
    type Error = String;

    fn try_from(entries: Vec<ThresholdEntry>) -> std::result::Result<Self, String> {
        let mut by_mode = BTreeMap::new();
        for e in entries {
            let mode = ModeKey::new(e.gain, e.xbin, e.ybin);
            if by_mode.insert(mode, e.min_imsets).is_some() {
                return Err(format!("duplicate threshold for mode {}", mode));
            }
        }
        Ok(Self { by_mode })
    }
}

impl From<ThresholdTable> for Vec<ThresholdEntry> {
    fn from(table: ThresholdTable) -> Self {
        table
            .by_mode
            .into_iter()
            .map(|(m, min_imsets)| ThresholdEntry {
                gain: m.gain,
                xbin: m.xbin,
                ybin: m.ybin,
                min_imsets,
            })
            .collect()
    }
}

/// Period length policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodConfig {
    /// Nominal length of a weekly period, days
    pub weekly_days: f64,
    /// Nominal length of a biweekly period, days
    pub biweekly_days: f64,
    pub closure: UpperClosure,
}

impl PeriodConfig {
    pub fn nominal_days(&self, class: PeriodClass) -> f64 {
        match class {
            PeriodClass::Wk => self.weekly_days,
            PeriodClass::Biwk => self.biweekly_days,
        }
    }
}

impl Default for PeriodConfig {
    fn default() -> Self {
        Self {
            weekly_days: 7.0,
            biweekly_days: 14.0,
            closure: UpperClosure::InclusiveFinal,
        }
    }
}

/// Complete pipeline configuration
///
/// # Example TOML
/// ```toml
/// split_above = 120
///
/// [period]
/// weekly_days = 7.0
/// biweekly_days = 14.0
/// closure = "inclusive_final"
///
/// [[threshold]]
/// gain = 1
/// xbin = 1
/// ybin = 1
/// min_imsets = 98
/// ```
///
/// A `[[threshold]]` list replaces the built-in table entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub split_above: u32,
    pub period: PeriodConfig,
    #[serde(rename = "threshold")]
    pub thresholds: ThresholdTable,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            split_above: DEFAULT_SPLIT_ABOVE,
            period: PeriodConfig::default(),
            thresholds: ThresholdTable::builtin(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read configuration: {}", path.as_ref().display())
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(content).context("Failed to parse TOML pipeline configuration")?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.split_above == 0 {
            return Err("split_above must be positive".to_string());
        }

        for class in PeriodClass::ALL {
            let days = self.period.nominal_days(class);
            if !(days.is_finite() && days > 0.0) {
                return Err(format!(
                    "nominal {} period length must be positive, got {}",
                    class, days
                ));
            }
        }

        if self.thresholds.is_empty() {
            return Err("threshold table is empty".to_string());
        }

        Ok(())
    }
}
