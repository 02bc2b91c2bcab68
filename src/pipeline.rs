//! End-to-end run over one reference tree
//!
//! clean (opt-in) → discover → separate raw frames still at the root →
//! rediscover → plan → build. Every step is safe to repeat: separation skips
//! frames already in place and picks up frames an interrupted run left behind,
//! and the build skips artifacts already on disk.

use crate::anneal::{AnnealCycle, AnnealTable};
use crate::build::{BuildGraph, BuildOptions, BuildOrchestrator, BuildReport, ExternalBaselines};
use crate::combine::Combiner;
use crate::config::PipelineConfig;
use crate::discovery::{self, Discovery};
use crate::error::{RefError, Result};
use crate::layout;
use crate::maintenance;
use crate::observation::{MetadataSource, Observation};
use crate::period::{
    frames_at_root, EmptyPeriodSeverity, NominalPolicy, PeriodPartitioner, SeparationSummary,
    Separator,
};
use crate::strategy::StrategySelector;
use std::fs;
use std::path::{Path, PathBuf};

/// Where the anneal cycle bounding a separation comes from
#[derive(Debug, Clone)]
pub enum CycleSource {
    Explicit(AnnealCycle),
    /// Looked up by the root folder's `<proposal>_<visit>` name
    Anneals(AnnealTable),
    /// Time extent of the frames being separated
    DataExtent,
}

impl CycleSource {
    pub fn resolve(&self, root: &Path, frames: &[Observation]) -> Result<AnnealCycle> {
        match self {
            CycleSource::Explicit(cycle) => Ok(*cycle),
            CycleSource::Anneals(table) => {
                // `.` or a link carries no <proposal>_<visit> component
                let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
                let identity = discovery::parse_identity(&root);
                let parsed = identity
                    .proposal
                    .as_deref()
                    .zip(identity.visit.as_deref())
                    .and_then(|(p, v)| Some((p.parse::<u32>().ok()?, v.parse::<u32>().ok()?)));
                let (proposal, visit) = parsed.ok_or_else(|| {
                    RefError::Config(format!(
                        "{} is not named <proposal>_<visit>, cannot look up its anneal cycle",
                        root.display()
                    ))
                })?;
                table.cycle_for(proposal, visit)
            }
            CycleSource::DataExtent => {
                AnnealCycle::from_extent(frames.iter().map(Observation::timestamp))
            }
        }
    }
}

/// Everything one run needs besides the combiner
pub struct PipelineRequest<'a> {
    pub root: PathBuf,
    pub config: &'a PipelineConfig,
    pub metadata: &'a dyn MetadataSource,
    pub cycle: CycleSource,
    /// Make an empty period fatal when separating raw frames at the root;
    /// otherwise it is only logged
    pub separate: bool,
    /// Remove every non-raw file before building
    pub clean: bool,
    pub external: ExternalBaselines,
    pub build: BuildOptions,
}

/// Run the pipeline on `request.root`
pub fn run(request: &PipelineRequest<'_>, combiner: &mut dyn Combiner) -> Result<BuildReport> {
    if !request.root.is_dir() {
        return Err(RefError::Config(format!(
            "{} is not a directory",
            request.root.display()
        )));
    }
    // Output names take proposal and visit from the root's own name
    let root = fs::canonicalize(&request.root).map_err(|e| RefError::io(&request.root, e))?;
    let root = root.as_path();
    let dry_run = request.build.dry_run;

    if request.clean {
        if dry_run {
            tracing::warn!("Dry run: not cleaning {}", root.display());
        } else {
            maintenance::clean(root)?;
        }
    }

    let mut discovered = discovery::discover(root)?;
    let separation = separate_loose_frames(request, root, &discovered)?;
    if separation.is_some() {
        discovered = discovery::discover(root)?;
    }

    let selector = StrategySelector::new(request.config);
    let graph = BuildGraph::plan(
        root,
        &discovered,
        request.metadata,
        &selector,
        &request.external,
    )?;
    let mut report = BuildOrchestrator::new(combiner, request.build).run(&graph)?;
    report.separation = separation;
    Ok(report)
}

/// Move raw frames lying at the root into their period folders
///
/// Runs whenever such frames exist, so a separation interrupted part way is
/// finished before anything is planned from the partial folders.
fn separate_loose_frames(
    request: &PipelineRequest<'_>,
    root: &Path,
    discovered: &Discovery,
) -> Result<Option<SeparationSummary>> {
    let severity = if request.separate {
        EmptyPeriodSeverity::Fatal
    } else {
        EmptyPeriodSeverity::Advisory
    };

    let frames = frames_at_root(root, request.metadata)?;
    if frames.is_empty() {
        tracing::info!("No raw frames at {} to separate", root.display());
        return Ok(None);
    }
    if request.build.dry_run {
        tracing::warn!(
            "Dry run: leaving {} raw frames at {} unseparated",
            frames.len(),
            root.display()
        );
        return Ok(None);
    }

    let cycle = match request.cycle {
        // The extent has to cover frames an earlier pass already moved
        CycleSource::DataExtent if !discovered.is_unseparated() => {
            let mut all = separated_frames(discovered, request.metadata)?;
            all.extend(frames.iter().cloned());
            request.cycle.resolve(root, &all)?
        }
        _ => request.cycle.resolve(root, &frames)?,
    };
    tracing::info!(
        "Separating {} frames over cycle {:.5} to {:.5} ({:.2} days)",
        frames.len(),
        cycle.begin,
        cycle.end,
        cycle.span_days()
    );

    let policy = NominalPolicy::from_config(&request.config.period);
    let partitioner = PeriodPartitioner::new(&policy, request.config.period.closure);
    let summary = Separator::new(root, &partitioner, severity).separate(&frames, &cycle)?;
    Ok(Some(summary))
}

/// Raw frames already sitting in recognized period folders
fn separated_frames(
    discovered: &Discovery,
    metadata: &dyn MetadataSource,
) -> Result<Vec<Observation>> {
    let mut frames = Vec::new();
    for folder in &discovered.period_folders {
        if folder.classified().is_err() {
            continue;
        }
        let paths =
            layout::raw_frames_in(&folder.path).map_err(|e| RefError::io(&folder.path, e))?;
        frames.extend(crate::observation::load_all(&paths, metadata)?);
    }
    Ok(frames)
}
