//! Frame combination, an external collaborator
//!
//! The statistics that turn raw frames into a reference frame live outside this
//! crate. [`Combiner`] is the seam: the orchestrator asks for one artifact per
//! call and expects the file to exist at the requested path afterwards.
//! [`CommandCombiner`] drives an external program for the binary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Errors reported by a combiner
#[derive(Error, Debug)]
pub enum CombineError {
    #[error("combiner exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },

    #[error("combiner produced no file at {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("failed to launch combiner: {0}")]
    Launch(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

/// Which reference product a combine call produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recipe {
    BaseBias,
    BaseDark,
    RefBias,
    WeekBias,
    WeekDark,
}

impl Recipe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recipe::BaseBias => "basebias",
            Recipe::BaseDark => "basedark",
            Recipe::RefBias => "refbias",
            Recipe::WeekBias => "weekbias",
            Recipe::WeekDark => "weekdark",
        }
    }
}

impl fmt::Display for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One combine call
#[derive(Debug, Clone, Copy)]
pub struct CombineRequest<'a> {
    pub recipe: Recipe,
    /// Raw frames, in acquisition order
    pub frames: &'a [PathBuf],
    /// Baseline artifacts; base bias for biases and the base dark, base dark
    /// then period bias for weekly darks
    pub baselines: &'a [PathBuf],
    /// Where the artifact must be written
    pub output: &'a Path,
}

/// Statistical frame combiner
pub trait Combiner {
    /// Combine `request.frames` (against `request.baselines`) into `request.output`
    fn combine(&mut self, request: &CombineRequest<'_>) -> Result<(), CombineError>;

    /// Average two previously combined artifacts into `output`
    fn average(&mut self, parts: [&Path; 2], output: &Path) -> Result<(), CombineError>;
}

/// Combiner backed by an external program
///
/// Invocations:
/// ```text
/// <program> [args..] <recipe> <output> [--baseline <path>].. -- <frame>..
/// <program> [args..] average <output> -- <part1> <part2>
/// ```
#[derive(Debug, Clone)]
pub struct CommandCombiner {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandCombiner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Leading arguments passed before the recipe
    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    fn run(&self, mut cmd: Command, output: &Path) -> Result<(), CombineError> {
        tracing::debug!("Running {:?}", cmd);
        let result = cmd.output()?;
        if !result.status.success() {
            return Err(CombineError::Exited {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        if !output.is_file() {
            return Err(CombineError::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl Combiner for CommandCombiner {
    fn combine(&mut self, request: &CombineRequest<'_>) -> Result<(), CombineError> {
        let mut cmd = self.base_command();
        cmd.arg(request.recipe.as_str()).arg(request.output);
        for baseline in request.baselines {
            cmd.arg("--baseline").arg(baseline);
        }
        cmd.arg("--").args(request.frames);
        self.run(cmd, request.output)
    }

    fn average(&mut self, parts: [&Path; 2], output: &Path) -> Result<(), CombineError> {
        let mut cmd = self.base_command();
        cmd.arg("average")
            .arg(output)
            .arg("--")
            .arg(parts[0])
            .arg(parts[1]);
        self.run(cmd, output)
    }
}
