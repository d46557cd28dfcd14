use crate::config::{Config, ConfigLoader};
use crate::core::{install_signal_handlers, CancelToken, RunContext, RunOptions, ScanPipeline, ScanStatus};
use crate::error::AppError;
use crate::utils::logging::Logger;
use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "avscan")]
#[command(author = "Security Team")]
#[command(version)]
#[command(about = "On-demand malware scan with quarantine, retention and reporting", long_about = None)]
pub struct Cli {
    #[arg(value_name = "PATH", help = "Files or directories to scan (default: configured targets, then $HOME)")]
    pub targets: Vec<String>,

    #[arg(short, long, help = "Show debug output on the terminal")]
    pub verbose: bool,

    #[arg(short, long, conflicts_with = "verbose", help = "No progress, summary or console logging")]
    pub quiet: bool,

    #[arg(long, help = "Scan the configured quick targets instead of the defaults")]
    pub quick: bool,

    #[arg(short, long, help = "Count files before scanning to show the queue size")]
    pub count: bool,

    #[arg(long, help = "Leave infected files in place")]
    pub no_quarantine: bool,

    #[arg(long, help = "Print the summary without the list of detections")]
    pub summary_only: bool,

    #[arg(long, value_name = "PATTERN", allow_hyphen_values = true, help = "Exclude paths matching PATTERN (repeatable)")]
    pub exclude: Vec<String>,

    #[arg(
        long = "max-size",
        value_name = "MB",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Skip files larger than this many megabytes"
    )]
    pub max_size: Option<u64>,

    #[arg(long, value_name = "FILE", help = "Additional configuration file")]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn build() -> Self {
        Cli::parse()
    }

    pub fn into_options(self) -> RunOptions {
        RunOptions {
            targets: self.targets,
            verbose: self.verbose,
            quiet: self.quiet,
            quick: self.quick,
            count: self.count,
            no_quarantine: self.no_quarantine,
            summary_only: self.summary_only,
            exclude: self.exclude,
            max_size_mb: self.max_size,
        }
    }

    fn load_config(&self) -> Result<Config, AppError> {
        let mut loader = ConfigLoader::new();
        if let Some(path) = &self.config {
            loader = loader.with_layer(path.clone(), true);
        }
        loader.load().map_err(AppError::config)
    }
}

/// Loads configuration, starts logging, and drives one scan.
pub async fn run(cli: Cli) -> Result<ScanStatus, AppError> {
    let config = cli.load_config()?;

    let mut file_level = Logger::get_level_filter(&config.logging.level);
    if cli.verbose {
        file_level = file_level.max(LevelFilter::Debug);
    }
    let log_file = Logger::init(
        &config.logging.log_dir,
        file_level,
        Logger::console_level(cli.verbose, cli.quiet),
    )
    .map_err(|e| AppError::Permission(format!("cannot initialise logging: {:#}", e)))?;
    log::info!("avscan {} starting, log file {:?}", env!("CARGO_PKG_VERSION"), log_file);

    let cancel = CancelToken::new();
    install_signal_handlers(cancel.clone());

    let ctx = RunContext::new(config, cli.into_options(), cancel);
    ScanPipeline::new(ctx).run().await
}
