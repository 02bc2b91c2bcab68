use super::graph::BuildNode;
use super::orchestrator::NodeStatus;
use crate::combine::Recipe;
use crate::period::SeparationSummary;
use crate::strategy::Strategy;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Final state of one node
#[derive(Debug, Clone, Serialize)]
pub struct NodeOutcome {
    pub node: String,
    pub recipe: Recipe,
    pub strategy: Strategy,
    pub status: NodeStatus,
    pub output: PathBuf,
    pub frames: usize,
    pub imsets: u32,
    /// Combine and average calls issued for this node
    pub combine_calls: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeOutcome {
    pub fn new(node: &BuildNode) -> Self {
        Self {
            node: node.key.to_string(),
            recipe: node.recipe,
            strategy: node.strategy,
            status: NodeStatus::Planned,
            output: node.output.clone(),
            frames: node.frames.len(),
            imsets: node.imsets,
            combine_calls: 0,
            error: None,
        }
    }
}

/// Everything one pipeline run did, in build order
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub root: PathBuf,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separation: Option<SeparationSummary>,
    pub outcomes: Vec<NodeOutcome>,
}

impl BuildReport {
    pub fn new(root: &Path, dry_run: bool) -> Self {
        Self {
            root: root.to_path_buf(),
            dry_run,
            separation: None,
            outcomes: Vec::new(),
        }
    }

    pub fn push(&mut self, outcome: NodeOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| matches!(o.status, NodeStatus::Failed | NodeStatus::Blocked))
    }

    /// Total combiner invocations across all nodes
    pub fn combine_calls(&self) -> usize {
        self.outcomes.iter().map(|o| o.combine_calls).sum()
    }

    pub fn outcome(&self, node: &str) -> Option<&NodeOutcome> {
        self.outcomes.iter().find(|o| o.node == node)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary table
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}{}",
            self.root.display(),
            if self.dry_run { " (dry run)" } else { "" }
        );

        if let Some(sep) = &self.separation {
            let _ = writeln!(
                out,
                "separated {} frames into {} folders ({} empty periods, {} outside cycle)",
                sep.moved(),
                sep.folders.len(),
                sep.empty_periods.len(),
                sep.outside_cycle.len()
            );
        }

        let width = self
            .outcomes
            .iter()
            .map(|o| o.node.len())
            .max()
            .unwrap_or(0);
        for o in &self.outcomes {
            let _ = write!(
                out,
                "{:<width$}  {:<8} {:<17} {:>4} frames {:>5} imsets  {}",
                o.node,
                o.status.to_string(),
                o.strategy.to_string(),
                o.frames,
                o.imsets,
                o.output.display(),
                width = width
            );
            if let Some(err) = &o.error {
                let _ = write!(out, "\n{:<width$}  error: {}", "", err, width = width);
            }
            out.push('\n');
        }

        let _ = writeln!(
            out,
            "{} built, {} skipped, {} planned, {} failed, {} blocked",
            self.count(NodeStatus::Built),
            self.count(NodeStatus::Skipped),
            self.count(NodeStatus::Planned),
            self.count(NodeStatus::Failed),
            self.count(NodeStatus::Blocked)
        );
        out
    }
}
