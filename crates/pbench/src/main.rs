//! Command line driver for PBench runs.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pbench::{PBenchExecutor, RunConfig, RunController, RunReport, RunSummary, StopSignal};

#[derive(Parser)]
#[command(name = "pbench-run")]
#[command(about = "Schedule and drive PBench load generator runs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level
    #[arg(long, global = true, env = "PBENCH_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a load test from a run file
    Run {
        /// Path to run YAML file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Override the load generator binary
        #[arg(long, env = "PBENCH_PATH")]
        tool: Option<PathBuf>,

        /// Override the artifacts directory
        #[arg(short, long)]
        artifacts: Option<PathBuf>,

        /// Override concurrency level
        #[arg(short, long)]
        concurrency: Option<u32>,

        /// Override target throughput in requests per second
        #[arg(short, long)]
        throughput: Option<f64>,

        /// Seconds between status checks
        #[arg(long, default_value = "1")]
        check_interval: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },

    /// List files that must ship with a run
    Resources {
        /// Path to run YAML file
        #[arg(short, long)]
        scenario: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn progress_bar(duration: Option<Duration>) -> ProgressBar {
    match duration {
        Some(duration) => {
            let pb = ProgressBar::new(duration.as_secs().max(1));
            let style = ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}s {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-");
            pb.set_style(style);
            pb
        }
        None => ProgressBar::new_spinner(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json)?;

    match cli.command {
        Commands::Run {
            scenario,
            tool,
            artifacts,
            concurrency,
            throughput,
            check_interval,
            output,
        } => {
            info!(scenario = %scenario.display(), "Loading run file");
            let mut config = RunConfig::from_file(&scenario)?;

            if let Some(tool) = tool {
                config.settings.path = tool;
            }
            if let Some(dir) = artifacts {
                config.settings.artifacts_dir = dir;
            }
            if let Some(c) = concurrency {
                config.execution.concurrency = c;
            }
            if let Some(t) = throughput {
                config.execution.throughput = t;
            }

            let executor = PBenchExecutor::new(config);
            let pb = progress_bar(executor.progress().duration);
            pb.set_message(executor.progress().target);

            let stop = StopSignal::new();
            let on_interrupt = stop.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, stopping run");
                    on_interrupt.raise();
                }
            });

            let cadence = Duration::from_secs(check_interval.max(1));
            let bar = pb.clone();
            let summary = tokio::task::spawn_blocking(move || {
                let mut controller = RunController::new(executor);
                // outcome is read back from the controller
                let _ = controller.run_with(&stop, cadence, |executor| {
                    let progress = executor.progress();
                    match progress.duration {
                        Some(_) => bar.set_position(progress.elapsed.as_secs()),
                        None => bar.tick(),
                    }
                });
                RunSummary::new(controller.module(), controller.state(), controller.failure())
            })
            .await?;
            pb.finish_and_clear();

            match output {
                OutputFormat::Json => println!("{}", RunReport::format_json(&summary)?),
                OutputFormat::Table => println!("{}", RunReport::format_table(&summary)),
            }

            if !summary.succeeded() {
                bail!(
                    "run ended in state {:?}: {}",
                    summary.state,
                    summary.error.as_deref().unwrap_or("no further detail")
                );
            }
            Ok(())
        }
        Commands::Resources { scenario } => {
            let config = RunConfig::from_file(&scenario)?;
            for file in pbench::resource_files(&config.execution.scenario) {
                println!("{}", file);
            }
            Ok(())
        }
    }
}
