use crate::combine::Recipe;
use crate::discovery::{Discovery, FolderKind, PeriodFolder};
use crate::error::{RefError, Result};
use crate::layout::{self, PeriodLabel};
use crate::observation::{self, Category, MetadataSource, ModeKey, Observation};
use crate::strategy::{Strategy, StrategySelector};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Identity of one artifact in the build graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKey {
    /// Full-cycle bias of one detector mode
    BaseBias(ModeKey),
    /// Full-cycle dark
    BaseDark,
    /// Bias of one period (`refbias_*` or `weekbias_*`)
    PeriodBias { mode: ModeKey, label: PeriodLabel },
    /// Dark of one period (`weekdark_*`)
    PeriodDark(PeriodLabel),
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::BaseBias(mode) => write!(f, "basebias[{}]", mode),
            NodeKey::BaseDark => f.write_str("basedark"),
            NodeKey::PeriodBias { mode, label } => write!(f, "bias[{}/{}]", mode, label),
            NodeKey::PeriodDark(label) => write!(f, "dark[{}]", label),
        }
    }
}

/// An artifact a node is combined against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Baseline {
    /// Output of another node in this graph
    Node(NodeKey),
    /// A file produced outside this run, such as a previous cycle's base bias
    External(PathBuf),
}

/// One artifact target
#[derive(Debug, Clone)]
pub struct BuildNode {
    pub key: NodeKey,
    pub recipe: Recipe,
    pub strategy: Strategy,
    /// Input frames sorted by acquisition time
    pub frames: Vec<Observation>,
    /// Baselines in the order the combiner receives them
    pub baselines: Vec<Baseline>,
    pub output: PathBuf,
    pub imsets: u32,
}

impl BuildNode {
    /// Keys of the graph nodes this node reads
    pub fn dependencies(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.baselines.iter().filter_map(|b| match b {
            Baseline::Node(key) => Some(*key),
            Baseline::External(_) => None,
        })
    }

    pub fn frame_paths(&self) -> Vec<PathBuf> {
        self.frames.iter().map(|o| o.path.clone()).collect()
    }
}

/// Base artifacts supplied from a previous cycle
#[derive(Debug, Clone, Default)]
pub struct ExternalBaselines {
    /// Replaces this cycle's unbinned base bias as the baseline of period nodes
    pub base_bias: Option<PathBuf>,
    /// Replaces this cycle's base dark as the baseline of period darks
    pub base_dark: Option<PathBuf>,
}

/// A period folder with its frames loaded
struct LoadedFolder {
    label: PeriodLabel,
    kind: FolderKind,
    path: PathBuf,
    proposal: String,
    visit: String,
    frames: Vec<Observation>,
}

/// Explicit dependency graph of the artifacts under one root
#[derive(Debug, Clone, Default)]
pub struct BuildGraph {
    root: PathBuf,
    nodes: BTreeMap<NodeKey, BuildNode>,
}

impl BuildGraph {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            nodes: BTreeMap::new(),
        }
    }

    /// Declare every node implied by the discovered period folders
    ///
    /// Each bias mode with period folders gets a base bias built from all of its
    /// frames. Each bias period folder becomes a `refbias` node, or a `weekbias`
    /// node against the base bias when it has too few imsets. Dark period folders
    /// yield a base dark plus one `weekdark` per period, joined to the unbinned
    /// bias of the same period label.
    ///
    /// # Errors
    /// Unclassifiable folders, empty folders, mixed detector modes, unknown
    /// modes and unreadable frame metadata.
    pub fn plan(
        root: &Path,
        discovery: &Discovery,
        source: &dyn MetadataSource,
        selector: &StrategySelector<'_>,
        external: &ExternalBaselines,
    ) -> Result<Self> {
        let mut graph = BuildGraph::new(root);
        let folders = discovery
            .period_folders
            .iter()
            .map(|f| load_folder(f, source))
            .collect::<Result<Vec<_>>>()?;

        let mut bias_by_mode: BTreeMap<ModeKey, Vec<&LoadedFolder>> = BTreeMap::new();
        let mut darks: Vec<&LoadedFolder> = Vec::new();
        for folder in &folders {
            match folder.kind {
                FolderKind::Bias { mode } => bias_by_mode.entry(mode).or_default().push(folder),
                FolderKind::Dark => darks.push(folder),
                FolderKind::Unrecognized => {
                    return Err(RefError::UnrecognizedFolder {
                        path: folder.path.clone(),
                    })
                }
            }
        }

        for (&mode, folders) in &bias_by_mode {
            let base = NodeKey::BaseBias(mode);
            let frames = sorted_frames(folders.iter().flat_map(|f| f.frames.iter()));
            graph.insert(BuildNode {
                key: base,
                recipe: Recipe::BaseBias,
                strategy: Strategy::Direct,
                imsets: observation::count_imsets(&frames),
                frames,
                baselines: Vec::new(),
                output: layout::basebias_path(root, mode),
            });

            for folder in folders {
                let imsets = observation::count_imsets(&folder.frames);
                let strategy = selector
                    .select(Category::Bias, imsets, mode)?
                    .for_frame_count(folder.frames.len());
                let (recipe, name, baselines) = match strategy {
                    Strategy::BaselineAssisted => {
                        let baseline = match (&external.base_bias, mode) {
                            (Some(path), ModeKey::UNBINNED) => Baseline::External(path.clone()),
                            _ => Baseline::Node(base),
                        };
                        (
                            Recipe::WeekBias,
                            layout::weekbias_name(&folder.proposal, &folder.visit, folder.label),
                            vec![baseline],
                        )
                    }
                    Strategy::Direct | Strategy::SplitAverage => (
                        Recipe::RefBias,
                        layout::refbias_name(&folder.proposal, folder.label),
                        Vec::new(),
                    ),
                };
                graph.insert(BuildNode {
                    key: NodeKey::PeriodBias {
                        mode,
                        label: folder.label,
                    },
                    recipe,
                    strategy,
                    frames: sorted_frames(folder.frames.iter()),
                    baselines,
                    output: folder.path.join(name),
                    imsets,
                });
            }
        }

        if !darks.is_empty() {
            let frames = sorted_frames(darks.iter().flat_map(|f| f.frames.iter()));
            let bias_for_base_dark = if graph.contains(&NodeKey::BaseBias(ModeKey::UNBINNED)) {
                Baseline::Node(NodeKey::BaseBias(ModeKey::UNBINNED))
            } else {
                graph.external_base_bias(external)
            };
            graph.insert(BuildNode {
                key: NodeKey::BaseDark,
                recipe: Recipe::BaseDark,
                strategy: selector.select(
                    Category::Dark,
                    observation::count_imsets(&frames),
                    ModeKey::UNBINNED,
                )?,
                imsets: observation::count_imsets(&frames),
                frames,
                baselines: vec![bias_for_base_dark],
                output: layout::basedark_path(root),
            });

            let dark_base = match &external.base_dark {
                Some(path) => Baseline::External(path.clone()),
                None => Baseline::Node(NodeKey::BaseDark),
            };
            for folder in darks {
                let imsets = observation::count_imsets(&folder.frames);
                let period_bias = NodeKey::PeriodBias {
                    mode: ModeKey::UNBINNED,
                    label: folder.label,
                };
                let bias = if graph.contains(&period_bias) {
                    Baseline::Node(period_bias)
                } else {
                    graph.period_dark_bias_fallback(external, folder.label)
                };
                graph.insert(BuildNode {
                    key: NodeKey::PeriodDark(folder.label),
                    recipe: Recipe::WeekDark,
                    strategy: selector.select(Category::Dark, imsets, ModeKey::UNBINNED)?,
                    frames: sorted_frames(folder.frames.iter()),
                    baselines: vec![dark_base.clone(), bias],
                    output: folder.path.join(layout::weekdark_name(
                        &folder.proposal,
                        &folder.visit,
                        folder.label,
                    )),
                    imsets,
                });
            }
        }

        tracing::info!(
            "Planned {} build nodes under {}",
            graph.len(),
            root.display()
        );
        Ok(graph)
    }

    /// Add or replace a node
    pub fn insert(&mut self, node: BuildNode) {
        self.nodes.insert(node.key, node);
    }

    pub fn get(&self, key: &NodeKey) -> Option<&BuildNode> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &BuildNode> {
        self.nodes.values()
    }

    /// Direct dependencies of `key` that are nodes of this graph
    pub fn dependencies(&self, key: &NodeKey) -> Vec<NodeKey> {
        self.nodes
            .get(key)
            .map(|n| n.dependencies().collect())
            .unwrap_or_default()
    }

    /// Path a baseline resolves to
    pub fn baseline_path<'a>(&'a self, baseline: &'a Baseline) -> Option<&'a Path> {
        match baseline {
            Baseline::Node(key) => self.nodes.get(key).map(|n| n.output.as_path()),
            Baseline::External(path) => Some(path),
        }
    }

    /// Nodes ordered so that every node follows its dependencies
    ///
    /// Depth-first over the keys in sorted order, which keeps the order stable
    /// between runs: base biases, then the base dark, then periods.
    pub fn topological_order(&self) -> Result<Vec<NodeKey>> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut done = BTreeSet::new();
        let mut visiting = BTreeSet::new();

        for key in self.nodes.keys() {
            self.visit(*key, &mut visiting, &mut done, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        key: NodeKey,
        visiting: &mut BTreeSet<NodeKey>,
        done: &mut BTreeSet<NodeKey>,
        order: &mut Vec<NodeKey>,
    ) -> Result<()> {
        if done.contains(&key) {
            return Ok(());
        }
        if !visiting.insert(key) {
            return Err(RefError::DependencyCycle(key.to_string()));
        }

        let node = self.nodes.get(&key).ok_or_else(|| {
            RefError::Config(format!("{} is referenced but was never planned", key))
        })?;
        for dep in node.dependencies() {
            self.visit(dep, visiting, done, order)?;
        }

        visiting.remove(&key);
        done.insert(key);
        order.push(key);
        Ok(())
    }

    /// The unbinned base bias when this graph does not build one
    fn external_base_bias(&self, external: &ExternalBaselines) -> Baseline {
        Baseline::External(
            external
                .base_bias
                .clone()
                .unwrap_or_else(|| layout::basebias_path(&self.root, ModeKey::UNBINNED)),
        )
    }

    /// Bias baseline of a period dark that has no unbinned bias for its label
    fn period_dark_bias_fallback(
        &self,
        external: &ExternalBaselines,
        label: PeriodLabel,
    ) -> Baseline {
        tracing::warn!(
            "No {} bias for dark period {}, falling back to the base bias",
            ModeKey::UNBINNED,
            label
        );
        match &external.base_bias {
            Some(path) => Baseline::External(path.clone()),
            None if self.contains(&NodeKey::BaseBias(ModeKey::UNBINNED)) => {
                Baseline::Node(NodeKey::BaseBias(ModeKey::UNBINNED))
            }
            None => self.external_base_bias(external),
        }
    }
}

fn load_folder(folder: &PeriodFolder, source: &dyn MetadataSource) -> Result<LoadedFolder> {
    let (label, kind) = folder.classified()?;
    let paths = layout::raw_frames_in(&folder.path).map_err(|e| RefError::io(&folder.path, e))?;
    if paths.is_empty() {
        return Err(RefError::NoFrames {
            folder: folder.path.clone(),
        });
    }
    let frames = observation::load_all(&paths, source)?;

    if let FolderKind::Bias { mode } = kind {
        if let Some(other) = frames.iter().map(Observation::mode).find(|m| *m != mode) {
            return Err(RefError::MixedModes {
                folder: folder.path.clone(),
                first: mode,
                other,
            });
        }
    }

    Ok(LoadedFolder {
        label,
        kind,
        path: folder.path.clone(),
        proposal: folder.identity.proposal().to_string(),
        visit: folder.identity.visit().to_string(),
        frames,
    })
}

fn sorted_frames<'o>(frames: impl Iterator<Item = &'o Observation>) -> Vec<Observation> {
    let mut frames: Vec<Observation> = frames.cloned().collect();
    frames.sort_by(|a, b| a.timestamp().total_cmp(&b.timestamp()));
    frames
}
