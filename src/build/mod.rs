//! Build orchestration over the reference-file dependency graph
//!
//! ```text
//! raw biases ──► basebias[mode] ──► basedark
//!     │              │                 │
//!     ▼              ▼                 ▼
//! bias[mode/wkNN] (refbias | weekbias) ──► dark[wkNN] (weekdark)
//! ```
//!
//! [`BuildGraph::plan`] declares one node per artifact from the discovered
//! folders, with explicit edges to the artifacts it is combined against.
//! [`BuildOrchestrator`] visits the nodes in dependency order. The output tree
//! is the only build state: an existing output means the node is done.

mod graph;
mod orchestrator;
mod report;

pub use graph::{Baseline, BuildGraph, BuildNode, ExternalBaselines, NodeKey};
pub use orchestrator::{BuildOptions, BuildOrchestrator, FailurePolicy, NodeStatus};
pub use report::{BuildReport, NodeOutcome};

#[cfg(test)]
mod tests;
