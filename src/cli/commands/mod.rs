use crate::cli::Output;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

pub mod apply;
pub mod config;
pub mod status;

#[derive(Parser)]
#[command(
    name = "chunkshift",
    version = env!("CARGO_PKG_VERSION"),
    about = "Apply content transformations across many files within a memory budget",
    long_about = "chunkshift applies ordered literal substitutions to large file sets in \
                  adaptive chunks, backing up every file first and scaling concurrency \
                  down under memory pressure."
)]
pub struct Cli {
    /// Run as if started in <DIR> instead of current working directory
    #[arg(short = 'C', long = "directory", global = true)]
    pub directory: Option<String>,

    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use custom configuration file
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transform files with the configured rules
    Apply(apply::ApplyArgs),
    /// Configuration management
    Config(config::ConfigArgs),
    /// Show system resources and the memory thresholds in effect
    Status(status::StatusArgs),
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)
                .with_context(|| format!("cannot change directory to {dir}"))?;
        }

        setup_logging(self.verbose, self.quiet);
        let output = Output::new(self.verbose > 0, self.quiet);

        match self.command {
            Commands::Apply(args) => apply::execute(args, &output, self.config.as_deref()).await,
            Commands::Config(args) => config::execute(args, &output, self.config.as_deref()).await,
            Commands::Status(args) => status::execute(args, &output, self.config.as_deref()).await,
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
            0 => tracing_subscriber::EnvFilter::new("warn"),
            1 => tracing_subscriber::EnvFilter::new("info"),
            2 => tracing_subscriber::EnvFilter::new("debug"),
            _ => tracing_subscriber::EnvFilter::new("trace"),
        });

    // Logs go to stderr so JSON results on stdout stay parseable
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
