use super::partition::{Period, PeriodPartitioner};
use crate::anneal::AnnealCycle;
use crate::error::{RefError, Result};
use crate::layout::{self, PeriodClass};
use crate::observation::{Category, MetadataSource, ModeKey, Observation};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// How a period that receives no observations is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyPeriodSeverity {
    /// Abort before anything is moved
    Fatal,
    /// Log a warning and carry on
    Advisory,
}

/// Frames separated per granularity: gain 1 biases and darks weekly, gain 4 biases biweekly
const SEPARATION_GROUPS: [(Category, PeriodClass); 3] = [
    (Category::Bias, PeriodClass::Wk),
    (Category::Dark, PeriodClass::Wk),
    (Category::Bias, PeriodClass::Biwk),
];

/// What a separation pass did
#[derive(Debug, Clone, Default, Serialize)]
pub struct SeparationSummary {
    /// Period folder → number of frames it received
    pub folders: BTreeMap<PathBuf, usize>,
    /// Periods that received nothing (advisory runs only)
    pub empty_periods: Vec<String>,
    /// Frames outside the cycle, left where they were
    pub outside_cycle: Vec<String>,
    /// Frames matching no separation group, left where they were
    pub unclaimed: Vec<String>,
    #[serde(skip)]
    pub relocated: Vec<Observation>,
}

impl SeparationSummary {
    pub fn moved(&self) -> usize {
        self.relocated.len()
    }
}

/// Moves raw frames from a root folder into per-period folders
pub struct Separator<'a> {
    root: &'a Path,
    partitioner: &'a PeriodPartitioner<'a>,
    severity: EmptyPeriodSeverity,
}

impl<'a> Separator<'a> {
    pub fn new(
        root: &'a Path,
        partitioner: &'a PeriodPartitioner<'a>,
        severity: EmptyPeriodSeverity,
    ) -> Self {
        Self {
            root,
            partitioner,
            severity,
        }
    }

    /// Partition `observations` over `cycle` and relocate them
    ///
    /// Every group is partitioned and checked before the first frame moves, so a
    /// fatal empty period leaves the tree untouched.
    pub fn separate(
        &self,
        observations: &[Observation],
        cycle: &AnnealCycle,
    ) -> Result<SeparationSummary> {
        let mut summary = SeparationSummary::default();
        let mut moves: Vec<(Observation, PathBuf)> = Vec::new();
        let mut claimed = vec![false; observations.len()];

        for (category, class) in SEPARATION_GROUPS {
            let mut by_mode: BTreeMap<ModeKey, Vec<Observation>> = BTreeMap::new();
            for (i, obs) in observations.iter().enumerate() {
                if obs.category() == category && obs.meta.gain == class.gain() {
                    claimed[i] = true;
                    let key = match category {
                        Category::Bias => obs.mode(),
                        Category::Dark => ModeKey::new(class.gain(), 1, 1),
                    };
                    by_mode.entry(key).or_default().push(obs.clone());
                }
            }

            if by_mode.is_empty() {
                tracing::info!("{} {}: no frames to move, skipping", category, class);
                continue;
            }

            let periods = self.partitioner.partition(cycle, class)?;
            log_periods(category, class, &periods);

            for (mode, group) in &by_mode {
                let assignment = self.partitioner.assign(group, &periods);
                tracing::info!(
                    "{} {} {}: {} frames to move",
                    category,
                    class,
                    mode,
                    group.len()
                );

                for period in assignment.empty_periods() {
                    let err = RefError::EmptyPeriod {
                        category,
                        mode: *mode,
                        label: period.label,
                        begin: period.begin,
                        end: period.end,
                    };
                    match self.severity {
                        EmptyPeriodSeverity::Fatal => return Err(err),
                        EmptyPeriodSeverity::Advisory => {
                            tracing::warn!("{}", err);
                            summary
                                .empty_periods
                                .push(format!("{} {} {}", category, mode, period.label));
                        }
                    }
                }

                for obs in &assignment.unassigned {
                    tracing::warn!(
                        "{} at MJD {:.5} lies outside the cycle, leaving it in place",
                        obs.id,
                        obs.timestamp()
                    );
                    summary.outside_cycle.push(obs.id.clone());
                }

                for (period, members) in &assignment.buckets {
                    if members.is_empty() {
                        continue;
                    }
                    let dir = layout::period_dir(self.root, category, *mode, period.label);
                    summary.folders.insert(dir.clone(), members.len());
                    for obs in members {
                        moves.push(((*obs).clone(), dir.clone()));
                    }
                }
            }
        }

        for (obs, is_claimed) in observations.iter().zip(&claimed) {
            if !is_claimed {
                tracing::debug!(
                    "{} ({} gain {}) matches no separation group",
                    obs.id,
                    obs.category(),
                    obs.meta.gain
                );
                summary.unclaimed.push(obs.id.clone());
            }
        }

        for (obs, dir) in moves {
            tracing::info!("Moving {} to {}", obs.path.display(), dir.display());
            let path = relocate(&obs, &dir)?;
            summary.relocated.push(Observation { path, ..obs });
        }

        Ok(summary)
    }
}

fn log_periods(category: Category, class: PeriodClass, periods: &[Period]) {
    tracing::info!(
        "{} {} will be broken up into {} periods",
        category,
        class,
        periods.len()
    );
    for p in periods {
        tracing::info!(
            "  {}: {:.5} to {:.5}{}",
            p.label,
            p.begin,
            p.end,
            if p.closed_end { " (inclusive)" } else { "" }
        );
    }
}

/// Raw frames lying directly in `root`, with their headers
pub fn frames_at_root(root: &Path, source: &dyn MetadataSource) -> Result<Vec<Observation>> {
    let paths = layout::raw_frames_in(root).map_err(|e| RefError::io(root, e))?;
    crate::observation::load_all(&paths, source)
}

/// Move one frame into `dest_dir`, then verify it arrived intact
///
/// A same-filesystem move is a single rename. Across filesystems the frame is
/// copied to a hidden staging name, synced, renamed into place and only then
/// removed from its source. Re-running after an interruption at any step
/// completes the move without losing the frame.
pub fn relocate(obs: &Observation, dest_dir: &Path) -> Result<PathBuf> {
    let target = dest_dir.join(obs.file_name());
    if obs.path == target {
        return Ok(target);
    }
    fs::create_dir_all(dest_dir).map_err(|e| RefError::io(dest_dir, e))?;

    let source_len = match fs::metadata(&obs.path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound && target.is_file() => {
            tracing::debug!("{} already relocated", obs.id);
            return Ok(target);
        }
        Err(e) => return Err(RefError::io(&obs.path, e)),
    };

    if target.exists() {
        let target_len = fs::metadata(&target)
            .map_err(|e| RefError::io(&target, e))?
            .len();
        if target_len != source_len {
            return Err(RefError::io(
                &target,
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "a different file already occupies the destination",
                ),
            ));
        }
        fs::remove_file(&obs.path).map_err(|e| RefError::io(&obs.path, e))?;
        return Ok(target);
    }

    if let Err(e) = fs::rename(&obs.path, &target) {
        tracing::debug!("rename of {} failed ({}), copying", obs.id, e);
        copy_then_remove(&obs.path, &target)?;
    }

    match fs::metadata(&target) {
        Ok(meta) if meta.len() == source_len => Ok(target),
        _ => Err(RefError::MoveVerification {
            id: obs.id.clone(),
            path: target,
        }),
    }
}

fn copy_then_remove(source: &Path, target: &Path) -> Result<()> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = target.with_file_name(format!(".{}.partial", name));

    fs::copy(source, &staging).map_err(|e| RefError::io(&staging, e))?;
    File::open(&staging)
        .and_then(|f| f.sync_all())
        .map_err(|e| RefError::io(&staging, e))?;
    fs::rename(&staging, target).map_err(|e| RefError::io(target, e))?;
    fs::remove_file(source).map_err(|e| RefError::io(source, e))
}
