// Integration test utilities
//
// Reference trees on disk plus a combiner that records its calls and writes a
// marker file instead of combining anything.

#![allow(dead_code)]

use refforge::combine::{CombineError, CombineRequest, Combiner, Recipe};
use refforge::observation::{CatalogMetadata, Category, FrameMetadata, ModeKey};
use std::fs;
use std::path::{Path, PathBuf};

/// One combiner invocation; `recipe` is `None` for an average
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub recipe: Option<Recipe>,
    pub frames: Vec<PathBuf>,
    pub baselines: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct RecordingCombiner {
    pub calls: Vec<RecordedCall>,
}

impl RecordingCombiner {
    pub fn recipes(&self) -> Vec<Option<Recipe>> {
        self.calls.iter().map(|c| c.recipe).collect()
    }
}

impl Combiner for RecordingCombiner {
    fn combine(&mut self, request: &CombineRequest<'_>) -> Result<(), CombineError> {
        self.calls.push(RecordedCall {
            recipe: Some(request.recipe),
            frames: request.frames.to_vec(),
            baselines: request.baselines.to_vec(),
        });
        fs::write(request.output, request.recipe.as_str())?;
        Ok(())
    }

    fn average(&mut self, parts: [&Path; 2], output: &Path) -> Result<(), CombineError> {
        self.calls.push(RecordedCall {
            recipe: None,
            frames: parts.iter().map(|p| p.to_path_buf()).collect(),
            baselines: Vec::new(),
        });
        fs::write(output, b"average")?;
        Ok(())
    }
}

/// Builds a reference tree of empty raw frames with a matching catalog
pub struct TreeBuilder {
    pub root: PathBuf,
    pub catalog: CatalogMetadata,
}

impl TreeBuilder {
    pub fn new(base: &Path, name: &str) -> Self {
        let root = base.join(name);
        fs::create_dir_all(&root).unwrap();
        Self {
            root,
            catalog: CatalogMetadata::new(),
        }
    }

    /// `count` frames under `rel_dir`, one every `step` days from `t0`
    pub fn frames(
        mut self,
        rel_dir: &str,
        prefix: &str,
        count: usize,
        category: Category,
        mode: ModeKey,
        imsets: u32,
        t0: f64,
        step: f64,
    ) -> Self {
        let dir = self.root.join(rel_dir);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            let name = format!("{}{:03}_raw.fits", prefix, i);
            fs::write(dir.join(&name), b"raw").unwrap();
            self.catalog.insert(
                name,
                FrameMetadata {
                    timestamp: t0 + i as f64 * step,
                    category,
                    gain: mode.gain,
                    xbin: mode.xbin,
                    ybin: mode.ybin,
                    imsets,
                },
            );
        }
        self
    }

    /// Write the catalog next to the tree and return its path
    pub fn write_catalog(&self) -> PathBuf {
        let path = self
            .root
            .parent()
            .unwrap_or(&self.root)
            .join("catalog.json");
        fs::write(&path, serde_json::to_string(&self.catalog).unwrap()).unwrap();
        path
    }
}

/// Separated tree with two weeks of unbinned biases and darks
///
/// wk01 biases hold 100 imsets (refbias), wk02 biases 30 (weekbias).
pub fn separated_tree(base: &Path) -> TreeBuilder {
    let m = ModeKey::UNBINNED;
    TreeBuilder::new(base, "12345_03")
        .frames("biases/1-1x1/wk01", "oba", 10, Category::Bias, m, 10, 56000.1, 0.5)
        .frames("biases/1-1x1/wk02", "obb", 3, Category::Bias, m, 10, 56007.1, 0.5)
        .frames("darks/wk01", "oda", 2, Category::Dark, m, 1, 56000.2, 1.0)
        .frames("darks/wk02", "odb", 2, Category::Dark, m, 1, 56007.2, 1.0)
}

/// Raw frames still lying at the root: 14 days of biases and darks
pub fn loose_tree(base: &Path) -> TreeBuilder {
    let m = ModeKey::UNBINNED;
    TreeBuilder::new(base, "12345_03")
        .frames("", "ob", 14, Category::Bias, m, 15, 56000.5, 1.0)
        .frames("", "od", 14, Category::Dark, m, 1, 56000.6, 1.0)
}

/// Raw frames lying directly in `dir`
pub fn raw_frames_at(dir: &Path) -> Vec<PathBuf> {
    refforge::layout::raw_frames_in(dir).unwrap()
}
