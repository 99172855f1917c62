use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use registry_pipeline::app::fetch::{FetchRequest, FetchUseCase};
use registry_pipeline::app::flows::{DateRange, FlowKind, FlowParams};
use registry_pipeline::app::report::ReportUseCase;
use registry_pipeline::config::Config;
use registry_pipeline::{logging, metrics};

#[derive(Parser)]
#[command(name = "registry_pipeline")]
#[command(about = "Filters, enriches and accumulates telecom licence registry exports")]
#[command(version)]
struct Cli {
    /// Path to config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Radio frequency resolutions expiring in a date range
    Resolutions {
        #[command(flatten)]
        args: FlowArgs,
        /// Licence registry (JSON lines) used to map owner names to tax ids
        #[arg(long)]
        dictionary: Option<PathBuf>,
    },
    /// Licences expiring in a date range
    Prolongation {
        #[command(flatten)]
        args: FlowArgs,
    },
    /// Licences whose service start falls in a date range
    Commissioning {
        #[command(flatten)]
        args: FlowArgs,
    },
    /// Existing clients holding special-service licences
    Special {
        #[command(flatten)]
        args: FlowArgs,
    },
}

#[derive(Args)]
struct FlowArgs {
    /// Registry export, one JSON object per line
    #[arg(long)]
    input: Option<PathBuf>,
    #[arg(long)]
    start: Option<NaiveDate>,
    #[arg(long)]
    end: Option<NaiveDate>,
    /// Keep existing clients (true) or everyone else (false)
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    ours: bool,
    #[arg(long, value_enum, default_value_t = Process::Fetch)]
    process: Process,
}

#[derive(Clone, Copy, ValueEnum)]
enum Process {
    Fetch,
    Report,
}

impl FlowArgs {
    fn params(&self) -> Result<FlowParams> {
        let range = match (self.start, self.end) {
            (Some(start), Some(end)) => Some(DateRange::new(start, end).map_err(anyhow::Error::msg)?),
            (None, None) => None,
            _ => bail!("--start and --end must be given together"),
        };
        Ok(FlowParams { range, ours: self.ours })
    }
}

fn spinner() -> ProgressBar {
    let sp = ProgressBar::new_spinner();
    sp.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
    );
    sp.enable_steady_tick(Duration::from_millis(80));
    sp
}

async fn fetch(config: Config, kind: FlowKind, args: &FlowArgs, dictionary: Option<PathBuf>) -> Result<()> {
    let input = args.input.clone().context("--input is required for --process fetch")?;
    let request = FetchRequest {
        kind,
        params: args.params()?,
        input,
        dictionary,
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current record");
            flag.store(true, Ordering::Relaxed);
        }
    });

    let sp = spinner();
    sp.set_message(format!("{} starting", kind));
    let result = FetchUseCase::new(config)
        .execute(&request, cancel, |progress| sp.set_message(progress.to_string()))
        .await;
    sp.finish_and_clear();
    let outcome = result?;

    let summary = &outcome.summary;
    println!("\n📊 {} -> {}", kind, outcome.namespace);
    println!("   Pulled: {}", summary.pulled);
    println!("   Passed: {}", summary.passed);
    println!("   Dropped: {}", summary.dropped);
    println!("   Malformed: {}", summary.malformed);
    println!("   Stored entities: {}", outcome.stored);
    for (stage, drops) in summary.drops_by_stage.iter().filter(|(_, n)| *n > 0) {
        println!("   - {}: {} dropped", stage, drops);
    }
    if summary.cancelled {
        println!("⚠️  Run was cancelled; the store keeps everything accepted so far");
    }
    Ok(())
}

fn report(config: Config, kind: FlowKind, args: &FlowArgs) -> Result<()> {
    let outcome = ReportUseCase::new(config).execute(kind, &args.params()?)?;
    println!("✅ Wrote {} rows to {}", outcome.rows, outcome.path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let _guard = logging::init_logging();
    metrics::init_metrics();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let (kind, args, dictionary) = match cli.command {
        Commands::Resolutions { args, dictionary } => (FlowKind::Resolutions, args, dictionary),
        Commands::Prolongation { args } => (FlowKind::Prolongation, args, None),
        Commands::Commissioning { args } => (FlowKind::Commissioning, args, None),
        Commands::Special { args } => (FlowKind::Special, args, None),
    };
    info!(flow = %kind, "Starting");

    let result = match args.process {
        Process::Fetch => fetch(config, kind, &args, dictionary).await,
        Process::Report => report(config, kind, &args),
    };
    if let Err(e) = &result {
        error!("{} failed: {:#}", kind, e);
    }
    result
}
