//! Recover period and mode folders from a previously built tree
//!
//! A resumed run does not repartition frames that were already separated.
//! Instead the tree is walked once and every folder is turned into a typed
//! identity: mode folders (`1-1x1`) and period folders (`wk01`, `biwk02`)
//! classified as bias (`biases/<mode>/<label>`) or dark (`darks/<label>`).
//!
//! Proposal and visit come from the `<proposal>_<visit>` product folder the tree
//! lives in; either may be absent.

use crate::error::{RefError, Result};
use crate::layout::{PeriodLabel, BIAS_DIR, DARK_DIR};
use crate::observation::ModeKey;
use regex::Regex;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

/// Folder named after a detector mode, e.g. `biases/1-1x2`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeFolder {
    pub path: PathBuf,
    pub mode: ModeKey,
}

/// What a period folder holds, judged from where it sits in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderKind {
    Bias { mode: ModeKey },
    Dark,
    /// Neither `biases/<mode>/<label>` nor `darks/<label>`
    Unrecognized,
}

/// Identity fields parsed from a folder path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderIdentity {
    /// Five-digit proposal ID
    pub proposal: Option<String>,
    /// Period label such as `wk02`
    pub period: Option<String>,
    /// Two-digit anneal visit
    pub visit: Option<String>,
}

impl FolderIdentity {
    pub fn proposal(&self) -> &str {
        self.proposal.as_deref().unwrap_or("")
    }

    pub fn visit(&self) -> &str {
        self.visit.as_deref().unwrap_or("")
    }
}

/// A folder whose name carries a week or biweek marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodFolder {
    pub path: PathBuf,
    /// Parsed label; `None` when the name only resembles one (`wk1`)
    pub label: Option<PeriodLabel>,
    pub kind: FolderKind,
    pub identity: FolderIdentity,
}

impl PeriodFolder {
    /// Typed label and kind, or the configuration error for this folder
    pub fn classified(&self) -> Result<(PeriodLabel, FolderKind)> {
        match (self.label, self.kind) {
            (Some(label), kind) if kind != FolderKind::Unrecognized => Ok((label, kind)),
            _ => Err(RefError::UnrecognizedFolder {
                path: self.path.clone(),
            }),
        }
    }
}

/// Folders found under a root
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub mode_folders: Vec<ModeFolder>,
    pub period_folders: Vec<PeriodFolder>,
}

impl Discovery {
    /// A tree that still needs its frames separated
    pub fn is_unseparated(&self) -> bool {
        self.mode_folders.is_empty() || self.period_folders.is_empty()
    }
}

fn mode_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9]+)-([0-9]+)x([0-9]+)$").expect("valid mode regex"))
}

fn proposal_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([0-9]{5})_([0-9]{2})").expect("valid proposal regex"))
}

fn period_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:bi)?wk[0-9]{2}$").expect("valid period regex"))
}

/// Parse a mode folder name such as `4-1x1`
pub fn parse_mode(name: &str) -> Option<ModeKey> {
    let caps = mode_pattern().captures(name)?;
    let field = |i: usize| caps.get(i)?.as_str().parse::<u8>().ok();
    Some(ModeKey::new(field(1)?, field(2)?, field(3)?))
}

/// Proposal, period label and visit carried by a folder path
///
/// The proposal/visit pair and the period label are matched independently
/// against the path's components; each is taken from the deepest component that
/// carries it and is `None` when no component does.
pub fn parse_identity(path: &Path) -> FolderIdentity {
    let mut identity = FolderIdentity::default();
    for component in path.components() {
        let Component::Normal(name) = component else {
            continue;
        };
        let name = name.to_string_lossy();

        if let Some(caps) = proposal_pattern().captures(&name) {
            identity.proposal = Some(caps[1].to_string());
            identity.visit = Some(caps[2].to_string());
        }
        if period_pattern().is_match(&name) {
            identity.period = Some(name.into_owned());
        }
    }
    identity
}

/// Walk `root` and classify its folders
pub fn discover(root: &Path) -> Result<Discovery> {
    let mut discovery = Discovery::default();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut children = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| RefError::io(&dir, e))? {
            let entry = entry.map_err(|e| RefError::io(&dir, e))?;
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            let is_dir = entry
                .file_type()
                .map_err(|e| RefError::io(entry.path(), e))?
                .is_dir();
            if is_dir && !hidden {
                children.push(entry.path());
            }
        }
        children.sort();

        for child in children.iter().rev() {
            pending.push(child.clone());
        }

        if dir == root {
            continue;
        }
        let tail = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if tail.contains("wk") {
            discovery.period_folders.push(PeriodFolder {
                label: PeriodLabel::parse(&tail),
                kind: classify(root, &dir),
                identity: parse_identity(&dir),
                path: dir.clone(),
            });
        }
        if let Some(mode) = parse_mode(&tail) {
            discovery.mode_folders.push(ModeFolder { path: dir, mode });
        }
    }

    tracing::debug!(
        "Discovered {} mode folders and {} period folders under {}",
        discovery.mode_folders.len(),
        discovery.period_folders.len(),
        root.display()
    );
    Ok(discovery)
}

/// Bias or dark, from the folder's position relative to `root`
fn classify(root: &Path, dir: &Path) -> FolderKind {
    let Ok(relative) = dir.strip_prefix(root) else {
        return FolderKind::Unrecognized;
    };
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    match parts.as_slice() {
        [category, mode, _] if category == BIAS_DIR => match parse_mode(mode) {
            Some(mode) => FolderKind::Bias { mode },
            None => FolderKind::Unrecognized,
        },
        [category, _] if category == DARK_DIR => FolderKind::Dark,
        _ => FolderKind::Unrecognized,
    }
}
