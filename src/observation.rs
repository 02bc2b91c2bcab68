//! Raw calibration frames and the header accessor they are read through
//!
//! An [`Observation`] is one raw frame on disk together with the header values
//! the pipeline needs: acquisition time (MJD), category, detector mode and the
//! number of imsets. Header access itself belongs to an external reader, modelled
//! here as the [`MetadataSource`] trait.

use crate::error::{RefError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Calibration category of a raw frame (the TARGNAME of the exposure)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Bias,
    Dark,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Bias => "BIAS",
            Category::Dark => "DARK",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detector readout configuration `(gain, x-binning, y-binning)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModeKey {
    pub gain: u8,
    pub xbin: u8,
    pub ybin: u8,
}

impl ModeKey {
    /// Gain 1, unbinned: the mode whose base bias also feeds the darks
    pub const UNBINNED: ModeKey = ModeKey::new(1, 1, 1);

    pub const fn new(gain: u8, xbin: u8, ybin: u8) -> Self {
        Self { gain, xbin, ybin }
    }
}

/// Renders the folder spelling, e.g. `1-1x1`
impl fmt::Display for ModeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}x{}", self.gain, self.xbin, self.ybin)
    }
}

/// Header values of one raw frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    /// Exposure start, modified Julian date
    pub timestamp: f64,
    pub category: Category,
    pub gain: u8,
    pub xbin: u8,
    pub ybin: u8,
    /// Number of exposure sets in the frame
    pub imsets: u32,
}

impl FrameMetadata {
    pub fn mode(&self) -> ModeKey {
        ModeKey::new(self.gain, self.xbin, self.ybin)
    }
}

/// Header accessor for raw frames
pub trait MetadataSource {
    fn metadata(&self, frame: &Path) -> Result<FrameMetadata>;
}

/// One raw frame at its current location
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Dataset name, e.g. `OCBW1XYZQ`
    pub id: String,
    pub path: PathBuf,
    pub meta: FrameMetadata,
}

impl Observation {
    pub fn new(path: impl Into<PathBuf>, meta: FrameMetadata) -> Self {
        let path = path.into();
        Self {
            id: dataset_id(&path),
            path,
            meta,
        }
    }

    /// Read the frame's header through `source`
    pub fn load(path: impl Into<PathBuf>, source: &dyn MetadataSource) -> Result<Self> {
        let path = path.into();
        let meta = source.metadata(&path)?;
        Ok(Self::new(path, meta))
    }

    pub fn timestamp(&self) -> f64 {
        self.meta.timestamp
    }

    pub fn category(&self) -> Category {
        self.meta.category
    }

    pub fn mode(&self) -> ModeKey {
        self.meta.mode()
    }

    pub fn imsets(&self) -> u32 {
        self.meta.imsets
    }

    /// File name of the frame (used as the relocation target name)
    pub fn file_name(&self) -> &std::ffi::OsStr {
        self.path.file_name().unwrap_or(self.path.as_os_str())
    }
}

/// Load every path in `paths` through `source`
pub fn load_all(paths: &[PathBuf], source: &dyn MetadataSource) -> Result<Vec<Observation>> {
    paths
        .iter()
        .map(|p| Observation::load(p.clone(), source))
        .collect()
}

/// Total imsets across a set of observations
pub fn count_imsets(observations: &[Observation]) -> u32 {
    observations.iter().map(Observation::imsets).sum()
}

/// Dataset name: the file name up to the first underscore, upper-cased
fn dataset_id(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.split('_').next().unwrap_or_default().to_uppercase()
}

/// Frame header catalog loaded from JSON
///
/// Maps frame file names to their header values, standing in for a FITS reader.
///
/// # Example JSON
/// ```json
/// {
///   "ocbw01abq_raw.fits": {"timestamp": 56001.25, "category": "BIAS",
///                          "gain": 1, "xbin": 1, "ybin": 1, "imsets": 9}
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogMetadata {
    frames: HashMap<String, FrameMetadata>,
}

impl CatalogMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog from a JSON file
    pub fn from_json<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read frame catalog: {}", path.as_ref().display())
        })?;
        serde_json::from_str(&content).context("Invalid frame catalog JSON")
    }

    pub fn insert(&mut self, file_name: impl Into<String>, meta: FrameMetadata) {
        self.frames.insert(file_name.into(), meta);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl MetadataSource for CatalogMetadata {
    fn metadata(&self, frame: &Path) -> Result<FrameMetadata> {
        let name = frame
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        self.frames
            .get(name.as_ref())
            .copied()
            .ok_or_else(|| RefError::Metadata {
                frame: frame.to_path_buf(),
                reason: "frame not present in catalog".to_string(),
            })
    }
}
