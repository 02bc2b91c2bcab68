use anyhow::{bail, Context, Result};
use clap::Parser;
use refforge::anneal::{AnnealCycle, AnnealTable};
use refforge::build::{BuildOptions, ExternalBaselines, FailurePolicy};
use refforge::cli::{Cli, OutputFormat};
use refforge::combine::{CombineError, CombineRequest, Combiner, CommandCombiner};
use refforge::config::PipelineConfig;
use refforge::observation::CatalogMetadata;
use refforge::pipeline::{self, CycleSource, PipelineRequest};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber on stderr
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Stand-in for dry runs, which never combine
struct NoCombiner;

impl Combiner for NoCombiner {
    fn combine(&mut self, request: &CombineRequest<'_>) -> Result<(), CombineError> {
        Err(CombineError::Failed(format!(
            "no combiner configured for {}",
            request.output.display()
        )))
    }

    fn average(&mut self, _parts: [&Path; 2], output: &Path) -> Result<(), CombineError> {
        Err(CombineError::Failed(format!(
            "no combiner configured for {}",
            output.display()
        )))
    }
}

fn print_cycles(table: &AnnealTable) -> Result<()> {
    for named in table.cycles()? {
        println!(
            "{}  {:.5}  {:.5}  {:.2} days",
            named.folder,
            named.cycle.begin,
            named.cycle.end,
            named.cycle.span_days()
        );
    }
    Ok(())
}

fn cycle_source(cli: &Cli, anneals: Option<AnnealTable>) -> Result<CycleSource> {
    if let Some(table) = anneals {
        return Ok(CycleSource::Anneals(table));
    }
    match (cli.cycle_begin, cli.cycle_end) {
        (Some(begin), Some(end)) => Ok(CycleSource::Explicit(AnnealCycle::new(begin, end)?)),
        _ => Ok(CycleSource::DataExtent),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let anneals = cli
        .anneals
        .as_deref()
        .map(AnnealTable::from_toml)
        .transpose()?;

    if cli.list_cycles {
        if let Some(table) = &anneals {
            print_cycles(table)?;
        }
        return Ok(());
    }

    let Some(root) = cli.root.clone() else {
        bail!("ROOT is required");
    };

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_toml(path)?,
        None => PipelineConfig::default(),
    };
    let catalog = match &cli.catalog {
        Some(path) => CatalogMetadata::from_json(path)?,
        None => CatalogMetadata::new(),
    };
    tracing::debug!("Loaded {} catalog entries", catalog.len());

    let request = PipelineRequest {
        root,
        config: &config,
        metadata: &catalog,
        cycle: cycle_source(&cli, anneals)?,
        separate: cli.separate,
        clean: cli.clean,
        external: ExternalBaselines {
            base_bias: cli.base_bias.clone(),
            base_dark: cli.base_dark.clone(),
        },
        build: BuildOptions {
            failure_policy: if cli.keep_going {
                FailurePolicy::KeepGoing
            } else {
                FailurePolicy::Abort
            },
            dry_run: cli.dry_run,
        },
    };

    let mut combiner: Box<dyn Combiner> = match &cli.combiner {
        Some(program) => {
            Box::new(CommandCombiner::new(program).with_args(cli.combiner_args.clone()))
        }
        None if cli.dry_run => Box::new(NoCombiner),
        None => bail!("--combiner is required unless --dry-run is given"),
    };

    let report = pipeline::run(&request, combiner.as_mut())
        .with_context(|| format!("Failed to build {}", request.root.display()))?;

    match cli.format {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }
    if let Some(path) = &cli.report {
        std::fs::write(path, report.to_json()?)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
    }

    if report.has_failures() {
        bail!(
            "{} nodes failed, {} blocked",
            report.count(refforge::build::NodeStatus::Failed),
            report.count(refforge::build::NodeStatus::Blocked)
        );
    }
    Ok(())
}
