//! AQUA command line tools
//!
//! # Usage
//!
//! ```bash
//! aqua-cli analysis --model IFS-NEMO --exp historical-1990 --source lra-r100-monthly \
//!   --config analysis.yaml --outputdir output/ --threads 4
//! aqua-cli catalog list
//! aqua-cli catalog resolve --model IFS-NEMO --exp historical-1990
//! aqua-cli weights --model IFS-NEMO --exp historical-1990 --target r100 --target r200
//! aqua-cli lra --model IFS-NEMO --exp historical-1990 --var 2t --var tprate \
//!   --resolution r100 --frequency monthly --outputdir lra/
//! ```

mod analysis;

use aqua_core::aggregate::Frequency;
use aqua_core::errors::{AquaError, AquaResult};
use aqua_core::lra::LraGenerator;
use aqua_core::reader::{ReaderBuilder, Session};
use aqua_core::regrid::{RegridMethod, Regridder};
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use simplelog::{ColorChoice, Config as LogConfig, LevelFilter, TermLogger, TerminalMode};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use crate::analysis::{AnalysisConfig, RunContext};

/// AQUA climate data tools
#[derive(Parser, Debug)]
#[command(name = "aqua-cli", version)]
#[command(about = "Run diagnostics, inspect catalogs, build regrid weights and the LRA")]
struct Cli {
    /// Log level: DEBUG, INFO, WARNING, ERROR or CRITICAL
    #[arg(short, long, global = true, default_value = "WARNING", value_parser = parse_level)]
    loglevel: LevelFilter,

    /// AQUA configuration file (defaults to $AQUA_CONFIG, ~/.aqua, ./)
    #[arg(long, global = true)]
    aqua_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the configured diagnostics in parallel
    Analysis(AnalysisArgs),
    /// Inspect the configured catalogs
    #[command(subcommand)]
    Catalog(CatalogCommand),
    /// Precompute regrid weights for a source
    Weights(WeightsArgs),
    /// Build the Low Resolution Archive for a source
    Lra(LraArgs),
}

#[derive(Args, Debug, Clone)]
struct DatasetArgs {
    #[arg(short, long)]
    model: String,

    #[arg(short, long)]
    exp: String,

    #[arg(short, long)]
    source: Option<String>,

    #[arg(short, long)]
    catalog: Option<String>,
}

impl DatasetArgs {
    fn reader<'a>(&self, session: &'a Session) -> ReaderBuilder<'a> {
        let mut builder = session.reader(&self.model, &self.exp);
        if let Some(source) = &self.source {
            builder = builder.source(source);
        }
        if let Some(catalog) = &self.catalog {
            builder = builder.catalog(catalog);
        }
        builder
    }
}

#[derive(Args, Debug)]
struct AnalysisArgs {
    #[command(flatten)]
    dataset: DatasetArgs,

    /// Diagnostics configuration (YAML or TOML)
    #[arg(short = 'f', long)]
    config: PathBuf,

    /// Root of the diagnostics' output
    #[arg(short, long, default_value = "./output")]
    outputdir: PathBuf,

    /// Diagnostics run at once (0: one per core)
    #[arg(short, long, default_value_t = 0)]
    threads: usize,
}

#[derive(Subcommand, Debug)]
enum CatalogCommand {
    /// List catalogs, models, experiments and sources
    List,
    /// Show which source a (model, exp, source) request resolves to
    Resolve(DatasetArgs),
}

#[derive(Args, Debug)]
struct WeightsArgs {
    #[command(flatten)]
    dataset: DatasetArgs,

    /// Target grids (descriptor names or specs such as r100)
    #[arg(short, long, required = true)]
    target: Vec<String>,

    /// Method overriding the source grid's default
    #[arg(long)]
    method: Option<RegridMethod>,
}

#[derive(Args, Debug)]
struct LraArgs {
    #[command(flatten)]
    dataset: DatasetArgs,

    /// Variables to archive
    #[arg(short, long = "var", required = true)]
    variables: Vec<String>,

    #[arg(short, long, default_value = "r100")]
    resolution: String,

    #[arg(short, long, default_value = "monthly")]
    frequency: Frequency,

    #[arg(short, long)]
    outputdir: PathBuf,

    /// Replace existing archive files
    #[arg(long)]
    overwrite: bool,

    /// Also write a catalog file declaring the archive
    #[arg(long)]
    catalog_file: Option<PathBuf>,
}

fn parse_level(level: &str) -> Result<LevelFilter, String> {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => Ok(LevelFilter::Debug),
        "INFO" => Ok(LevelFilter::Info),
        "WARNING" | "WARN" => Ok(LevelFilter::Warn),
        "ERROR" | "CRITICAL" => Ok(LevelFilter::Error),
        "OFF" => Ok(LevelFilter::Off),
        other => Err(format!("unknown log level {other}")),
    }
}

/// Name the diagnostics expect for a log level.
fn level_name(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Off | LevelFilter::Error => "ERROR",
        LevelFilter::Warn => "WARNING",
        LevelFilter::Info => "INFO",
        LevelFilter::Debug | LevelFilter::Trace => "DEBUG",
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = TermLogger::init(
        cli.loglevel,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("Failed to initialise logging: {e}");
    }

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> AquaResult<ExitCode> {
    match &cli.command {
        Command::Analysis(args) => analysis(args, cli.loglevel),
        Command::Catalog(command) => {
            let session = Session::load(cli.aqua_config.as_deref())?;
            catalog(&session, command)
        }
        Command::Weights(args) => {
            let session = Session::load(cli.aqua_config.as_deref())?;
            weights(&session, args)
        }
        Command::Lra(args) => {
            let session = Session::load(cli.aqua_config.as_deref())?;
            lra(&session, args)
        }
    }
}

fn analysis(args: &AnalysisArgs, loglevel: LevelFilter) -> AquaResult<ExitCode> {
    let config = AnalysisConfig::read(&args.config)?;
    let ctx = RunContext {
        model: args.dataset.model.clone(),
        exp: args.dataset.exp.clone(),
        source: args.dataset.source.clone(),
        catalog: args.dataset.catalog.clone(),
        outputdir: args.outputdir.clone(),
        loglevel: level_name(loglevel).to_string(),
    };
    let outcomes = analysis::run_all(&config, &ctx, args.threads)?;
    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.succeeded())
        .map(|o| o.name.as_str())
        .collect();
    println!(
        "{} of {} diagnostics succeeded",
        outcomes.len() - failed.len(),
        outcomes.len()
    );
    if failed.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        error!("failed diagnostics: {}", failed.join(", "));
        Ok(ExitCode::FAILURE)
    }
}

fn catalog(session: &Session, command: &CatalogCommand) -> AquaResult<ExitCode> {
    match command {
        CatalogCommand::List => {
            for catalog in session.catalogs.catalogs() {
                println!("{}", catalog.name);
                for model in catalog.models() {
                    for exp in catalog.experiments(model) {
                        let sources: Vec<&str> = catalog
                            .sources(model, exp)
                            .iter()
                            .map(|e| e.source.as_str())
                            .collect();
                        println!("  {model}/{exp}: {}", sources.join(", "));
                    }
                }
            }
        }
        CatalogCommand::Resolve(args) => {
            let reader = args.reader(session).fix(false).build()?;
            let entry = reader.entry();
            println!("{entry}");
            println!("  driver: {}", entry.spec.backend.kind());
            if let Some(description) = &entry.spec.description {
                println!("  description: {description}");
            }
            if let Some(fixer) = &entry.spec.fixer_name {
                println!("  fixer: {fixer}");
            }
            if let Some(grid) = &entry.spec.source_grid_name {
                println!("  grid: {grid}");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn weights(session: &Session, args: &WeightsArgs) -> AquaResult<ExitCode> {
    for target in &args.target {
        let mut builder = args.dataset.reader(session).fix(false).regrid(target);
        if let Some(method) = args.method {
            builder = builder.regrid_method(method);
        }
        let reader = builder.build()?;
        let source = match &reader.entry().spec.source_grid_name {
            Some(name) => session.grids.resolve(name)?,
            None => {
                info!("{} names no grid, reading data for it", reader.entry());
                reader.retrieve(None)?.grid
            }
        };
        let target_grid = reader
            .target()
            .cloned()
            .ok_or_else(|| AquaError::Config(format!("unknown target {target}")))?;
        let regridder = Regridder::new(source, target_grid, reader.method(), Arc::clone(&session.cache));
        let weights = regridder.weights(None)?;
        println!(
            "{} -> {} ({}): {} target cells",
            weights.source_grid, weights.target_grid, weights.method, weights.n_target
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn lra(session: &Session, args: &LraArgs) -> AquaResult<ExitCode> {
    let mut generator = LraGenerator::new(
        session,
        &args.dataset.model,
        &args.dataset.exp,
        &args.resolution,
        args.frequency,
        &args.outputdir,
    )
    .overwrite(args.overwrite);
    if let Some(source) = &args.dataset.source {
        generator = generator.source(source);
    }
    if let Some(catalog) = &args.dataset.catalog {
        generator = generator.catalog(catalog);
    }
    let variables: Vec<&str> = args.variables.iter().map(String::as_str).collect();
    let files = generator.generate(&variables)?;
    println!("{} archive files in {}", files.len(), generator.output_dir().display());
    if let Some(path) = &args.catalog_file {
        generator.write_catalog_entry(path)?;
    }
    Ok(ExitCode::SUCCESS)
}
