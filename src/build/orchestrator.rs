use super::graph::{BuildGraph, BuildNode, NodeKey};
use super::report::{BuildReport, NodeOutcome};
use crate::combine::{CombineError, CombineRequest, Combiner, Recipe};
use crate::error::{RefError, Result};
use crate::layout;
use crate::strategy::{self, Strategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Final state of a node after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Dry run: would be built
    Planned,
    /// Output already present
    Skipped,
    Built,
    Failed,
    /// A dependency failed earlier in this run
    Blocked,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Planned => "planned",
            NodeStatus::Skipped => "skipped",
            NodeStatus::Built => "built",
            NodeStatus::Failed => "failed",
            NodeStatus::Blocked => "blocked",
        };
        f.write_str(name)
    }
}

/// What happens after a node fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failure and return its error
    #[default]
    Abort,
    /// Mark dependents blocked and continue with independent nodes
    KeepGoing,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    pub failure_policy: FailurePolicy,
    /// Report decisions without combining
    pub dry_run: bool,
}

/// How a staged artifact reached its target path
enum Published {
    Created,
    /// Another writer published the target first
    Raced,
}

/// Walks a [`BuildGraph`] in dependency order and builds missing artifacts
///
/// A node whose output exists is skipped without looking at its content. A node
/// being built is combined into a hidden staging file next to its target and
/// published with a no-clobber link, so a concurrent run never overwrites a
/// finished artifact and an interrupted run never leaves a partial one behind.
pub struct BuildOrchestrator<'c> {
    combiner: &'c mut dyn Combiner,
    options: BuildOptions,
}

impl<'c> BuildOrchestrator<'c> {
    pub fn new(combiner: &'c mut dyn Combiner, options: BuildOptions) -> Self {
        Self { combiner, options }
    }

    /// Build every node of `graph`
    ///
    /// # Errors
    /// With [`FailurePolicy::Abort`] the first failing node's error. Ordering
    /// errors (a dependency cycle) are returned under either policy.
    pub fn run(&mut self, graph: &BuildGraph) -> Result<BuildReport> {
        let order = graph.topological_order()?;
        let mut report = BuildReport::new(graph.root(), self.options.dry_run);
        let mut unusable: BTreeSet<NodeKey> = BTreeSet::new();

        for key in order {
            let Some(node) = graph.get(&key) else {
                continue;
            };
            let mut outcome = NodeOutcome::new(node);

            if node.output.exists() {
                tracing::info!("Skipping {}: {} exists", key, node.output.display());
                outcome.status = NodeStatus::Skipped;
            } else if let Some(dep) = graph
                .dependencies(&key)
                .into_iter()
                .find(|d| unusable.contains(d))
            {
                tracing::warn!("Not building {}: dependency {} failed", key, dep);
                outcome.status = NodeStatus::Blocked;
                outcome.error = Some(format!("dependency {} failed", dep));
                unusable.insert(key);
            } else if self.options.dry_run {
                tracing::info!(
                    "Would build {} ({}, {} frames, {} imsets) -> {}",
                    key,
                    node.strategy,
                    node.frames.len(),
                    node.imsets,
                    node.output.display()
                );
                outcome.status = NodeStatus::Planned;
            } else {
                let mut calls = 0;
                match self.build(graph, node, &mut calls) {
                    Ok(Published::Created) => {
                        tracing::info!("Built {} -> {}", key, node.output.display());
                        outcome.status = NodeStatus::Built;
                    }
                    Ok(Published::Raced) => {
                        tracing::warn!(
                            "{} appeared while {} was building, keeping the existing file",
                            node.output.display(),
                            key
                        );
                        outcome.status = NodeStatus::Skipped;
                    }
                    Err(err) => {
                        tracing::error!("Failed to build {}: {}", key, err);
                        if self.options.failure_policy == FailurePolicy::Abort {
                            return Err(err);
                        }
                        outcome.status = NodeStatus::Failed;
                        outcome.error = Some(err.to_string());
                        unusable.insert(key);
                    }
                }
                outcome.combine_calls = calls;
            }
            report.push(outcome);
        }

        tracing::info!(
            "Build finished: {} built, {} skipped, {} failed, {} blocked",
            report.count(NodeStatus::Built),
            report.count(NodeStatus::Skipped),
            report.count(NodeStatus::Failed),
            report.count(NodeStatus::Blocked)
        );
        Ok(report)
    }

    fn build(
        &mut self,
        graph: &BuildGraph,
        node: &BuildNode,
        calls: &mut usize,
    ) -> Result<Published> {
        let mut baselines = Vec::with_capacity(node.baselines.len());
        for baseline in &node.baselines {
            match graph.baseline_path(baseline) {
                Some(path) if path.is_file() => baselines.push(path.to_path_buf()),
                Some(path) => {
                    return Err(RefError::MissingBaseline {
                        node: node.key.to_string(),
                        path: path.to_path_buf(),
                    })
                }
                None => {
                    return Err(RefError::Config(format!(
                        "{} depends on a node that was never planned",
                        node.key
                    )))
                }
            }
        }

        if let Some(parent) = node.output.parent() {
            fs::create_dir_all(parent).map_err(|e| RefError::io(parent, e))?;
        }
        tracing::info!(
            "Building {} ({}, {} frames, {} imsets)",
            node.key,
            node.strategy,
            node.frames.len(),
            node.imsets
        );

        match node.strategy {
            Strategy::SplitAverage => self.build_split(node, calls),
            Strategy::Direct | Strategy::BaselineAssisted => self.combine_into(
                node,
                node.recipe,
                &node.frame_paths(),
                &baselines,
                &node.output,
                calls,
            ),
        }
    }

    /// Combine two interleaved halves directly, then average them
    fn build_split(&mut self, node: &BuildNode, calls: &mut usize) -> Result<Published> {
        let (first, second) = strategy::split_interleaved(&node.frames);
        let parts = [
            layout::split_part_path(&node.output, 1),
            layout::split_part_path(&node.output, 2),
        ];

        for (half, part) in [first, second].iter().zip(&parts) {
            if part.exists() {
                tracing::debug!("Reusing split half {}", part.display());
                continue;
            }
            let frames: Vec<PathBuf> = half.iter().map(|o| o.path.clone()).collect();
            tracing::debug!("Combining {} frames into {}", frames.len(), part.display());
            self.combine_into(node, node.recipe, &frames, &[], part, calls)?;
        }

        let staging = stage(&node.output);
        *calls += 1;
        self.combiner
            .average([parts[0].as_path(), parts[1].as_path()], &staging)
            .map_err(|source| combine_error(node, source))?;
        publish(node, staging)
    }

    fn combine_into(
        &mut self,
        node: &BuildNode,
        recipe: Recipe,
        frames: &[PathBuf],
        baselines: &[PathBuf],
        target: &Path,
        calls: &mut usize,
    ) -> Result<Published> {
        let staging = stage(target);
        let request = CombineRequest {
            recipe,
            frames,
            baselines,
            output: &staging,
        };
        *calls += 1;
        self.combiner
            .combine(&request)
            .map_err(|source| combine_error(node, source))?;
        publish_to(node, staging, target)
    }
}

/// Hidden per-process staging path next to `target`, removed on drop
fn stage(target: &Path) -> TempPath {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = target.with_file_name(format!(".{}.{}.partial", name, std::process::id()));
    TempPath::from_path(staging)
}

fn publish(node: &BuildNode, staging: TempPath) -> Result<Published> {
    publish_to(node, staging, &node.output)
}

/// Link the staged file to `target` unless something is already there
fn publish_to(node: &BuildNode, staging: TempPath, target: &Path) -> Result<Published> {
    if !staging.exists() {
        return Err(combine_error(
            node,
            CombineError::MissingOutput(staging.to_path_buf()),
        ));
    }
    match staging.persist_noclobber(target) {
        Ok(()) => Ok(Published::Created),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(Published::Raced),
        Err(e) => Err(RefError::io(target, e.error)),
    }
}

fn combine_error(node: &BuildNode, source: CombineError) -> RefError {
    RefError::Combine {
        node: node.key.to_string(),
        output: node.output.clone(),
        source,
    }
}
