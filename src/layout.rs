//! On-disk layout of a reference-file tree
//!
//! ```text
//! <root>/
//!   biases/<gain>-<xbin>x<ybin>/<wk|biwk><NN>/   raw bias frames of one period
//!     refbias_<proposal>_<wk>.fits
//!     weekbias_<proposal>_<visit>_<wk>.fits
//!   biases/<gain>-<xbin>x<ybin>/all/basebias.fits
//!   darks/<wk|biwk><NN>/                         raw dark frames of one period
//!     weekdark_<proposal>_<visit>_<wk>.fits
//!   darks/all/basedark.fits
//! ```
//!
//! The tree doubles as the build ledger: an artifact's presence marks its node done.

use crate::observation::{Category, ModeKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const BIAS_DIR: &str = "biases";
pub const DARK_DIR: &str = "darks";
/// Folder holding the full-cycle base artifact of a category/mode
pub const ALL_DIR: &str = "all";
pub const RAW_SUFFIX: &str = "_raw.fits";
pub const BASEBIAS_FILE: &str = "basebias.fits";
pub const BASEDARK_FILE: &str = "basedark.fits";

/// Period granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PeriodClass {
    /// Weekly periods, gain 1 frames
    Wk,
    /// Biweekly periods, gain 4 frames
    Biwk,
}

impl PeriodClass {
    pub const ALL: [PeriodClass; 2] = [PeriodClass::Wk, PeriodClass::Biwk];

    /// Detector gain whose frames are partitioned at this granularity
    pub fn gain(self) -> u8 {
        match self {
            PeriodClass::Wk => 1,
            PeriodClass::Biwk => 4,
        }
    }

    /// Lower-case folder prefix
    pub fn prefix(self) -> &'static str {
        match self {
            PeriodClass::Wk => "wk",
            PeriodClass::Biwk => "biwk",
        }
    }
}

impl fmt::Display for PeriodClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodClass::Wk => f.write_str("WK"),
            PeriodClass::Biwk => f.write_str("BIWK"),
        }
    }
}

/// Period identity within a cycle: class plus 1-based index (`wk01`, `biwk03`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodLabel {
    pub class: PeriodClass,
    pub index: u32,
}

impl PeriodLabel {
    pub fn new(class: PeriodClass, index: u32) -> Self {
        Self { class, index }
    }

    /// Parse a folder name such as `wk02` or `biwk01`
    pub fn parse(name: &str) -> Option<Self> {
        let (class, digits) = if let Some(rest) = name.strip_prefix("biwk") {
            (PeriodClass::Biwk, rest)
        } else if let Some(rest) = name.strip_prefix("wk") {
            (PeriodClass::Wk, rest)
        } else {
            return None;
        };

        if digits.len() < 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let index: u32 = digits.parse().ok()?;
        (index >= 1).then_some(Self { class, index })
    }
}

impl fmt::Display for PeriodLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:02}", self.class.prefix(), self.index)
    }
}

/// Folder receiving one period's raw frames
pub fn period_dir(root: &Path, category: Category, mode: ModeKey, label: PeriodLabel) -> PathBuf {
    category_dir(root, category, mode).join(label.to_string())
}

/// Folder holding the base artifact of a category (and, for biases, mode)
pub fn base_dir(root: &Path, category: Category, mode: ModeKey) -> PathBuf {
    category_dir(root, category, mode).join(ALL_DIR)
}

fn category_dir(root: &Path, category: Category, mode: ModeKey) -> PathBuf {
    match category {
        Category::Bias => root.join(BIAS_DIR).join(mode.to_string()),
        Category::Dark => root.join(DARK_DIR),
    }
}

pub fn basebias_path(root: &Path, mode: ModeKey) -> PathBuf {
    base_dir(root, Category::Bias, mode).join(BASEBIAS_FILE)
}

pub fn basedark_path(root: &Path) -> PathBuf {
    base_dir(root, Category::Dark, ModeKey::UNBINNED).join(BASEDARK_FILE)
}

pub fn refbias_name(proposal: &str, label: PeriodLabel) -> String {
    format!("refbias_{}_{}.fits", proposal, label)
}

pub fn weekbias_name(proposal: &str, visit: &str, label: PeriodLabel) -> String {
    format!("weekbias_{}_{}_{}.fits", proposal, visit, label)
}

pub fn weekdark_name(proposal: &str, visit: &str, label: PeriodLabel) -> String {
    format!("weekdark_{}_{}_{}.fits", proposal, visit, label)
}

/// Intermediate half of a split-and-average build: `<stem>_grp0<part>.fits`
pub fn split_part_path(target: &Path, part: usize) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!("{}_grp{:02}.fits", stem, part))
}

pub fn is_raw_frame(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(RAW_SUFFIX))
        .unwrap_or(false)
}

/// Raw frames directly inside `dir`, sorted by name
pub fn raw_frames_in(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_raw_frame(&path) {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}
