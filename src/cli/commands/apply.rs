//! `chunkshift apply`: run the engine over an explicit file list

use crate::cli::Output;
use crate::cli::output::format_bytes;
use crate::config::ChunkshiftConfig;
use crate::engine::{CancelToken, Engine, EngineResult, ListDiscovery, RunStatus};
use crate::transform::Rule;
use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Args)]
pub struct ApplyArgs {
    /// Files to transform, processed in the given order
    #[arg(value_name = "PATH", required_unless_present = "files_from")]
    pub paths: Vec<PathBuf>,

    /// Read the work list from a file, one path per line
    #[arg(long, value_name = "FILE", conflicts_with = "paths")]
    pub files_from: Option<PathBuf>,

    /// Literal substitution FROM=TO; repeatable, applied in order, replaces configured rules
    #[arg(short, long = "rule", value_name = "FROM=TO")]
    pub rules: Vec<String>,

    /// Files per chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Maximum concurrent files
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Memory budget in bytes
    #[arg(long)]
    pub memory_limit: Option<u64>,

    /// Stream every file through the bounded-memory pipeline
    #[arg(long)]
    pub stream: bool,

    /// Disable the content cache
    #[arg(long)]
    pub no_cache: bool,

    /// Offload transforms to a thread pool
    #[arg(long)]
    pub worker_pool: bool,

    /// Where backups are written
    #[arg(long, value_name = "DIR")]
    pub backup_dir: Option<PathBuf>,

    /// Do everything except writing transformed content
    #[arg(long)]
    pub dry_run: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Flags that override configuration; unset fields keep lower layers
#[derive(Serialize, Default)]
struct ApplyOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    chunk_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_parallel_jobs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    use_streaming: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enable_caching: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enable_worker_pool: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    backup_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rules: Option<Vec<Rule>>,
}

impl ApplyOverrides {
    fn from_args(args: &ApplyArgs) -> Result<Self> {
        let rules = args
            .rules
            .iter()
            .map(|raw| Rule::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            chunk_size: args.chunk_size,
            max_parallel_jobs: args.jobs,
            memory_limit: args.memory_limit,
            use_streaming: args.stream.then_some(true),
            enable_caching: args.no_cache.then_some(false),
            enable_worker_pool: args.worker_pool.then_some(true),
            backup_dir: args.backup_dir.clone(),
            dry_run: args.dry_run.then_some(true),
            rules: (!rules.is_empty()).then_some(rules),
        })
    }
}

pub async fn execute(args: ApplyArgs, output: &Output, custom_config: Option<&str>) -> Result<()> {
    let overrides = ApplyOverrides::from_args(&args)?;
    let config = ChunkshiftConfig::load(custom_config, Some(overrides))?.engine()?;
    if config.rules.is_empty() {
        anyhow::bail!(
            "no rules configured: pass --rule FROM=TO or add [[rules]] to chunkshift.toml"
        );
    }

    let discovery = match &args.files_from {
        Some(list) => ListDiscovery::from_list_file(&config.root, list)?,
        None => ListDiscovery::new(&config.root, args.paths.clone()),
    };
    if discovery.is_empty() {
        anyhow::bail!("no input files");
    }

    let json = matches!(args.format, OutputFormat::Json);
    let quiet_ui = json || output.is_quiet();
    let dry_run = config.dry_run;

    let mut engine = Engine::new(config).context("failed to initialise engine")?;

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current chunk");
            on_interrupt.cancel();
        }
    });

    let bar = Output::new(false, quiet_ui).progress_bar(100, "transforming");
    let mut progress = |percent: f64, message: &str| {
        bar.set_position(percent.round() as u64);
        bar.set_message(message.to_string());
    };
    let result = engine.run_discovered(&discovery, &mut progress, &cancel).await;
    interrupt.abort();
    bar.finish_and_clear();
    let result = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(output, &result, dry_run);
    }

    match result.status() {
        RunStatus::Success => Ok(()),
        RunStatus::PartialSuccess => anyhow::bail!(
            "{} of {} files failed",
            result.errors.len(),
            result.stats.total_files
        ),
        RunStatus::Failure => anyhow::bail!("no file was transformed successfully"),
    }
}

fn print_summary(output: &Output, result: &EngineResult, dry_run: bool) {
    let stats = &result.stats;

    output.header(if dry_run { "Dry run summary" } else { "Summary" });
    output.table_row("Run", &result.run_id);
    output.table_row(
        "Files processed",
        &format!("{} / {}", stats.processed_files, stats.total_files),
    );
    output.table_row(
        if dry_run { "Files that would change" } else { "Files changed" },
        &stats.changed_files.to_string(),
    );
    output.table_row("Files skipped", &stats.skipped_files.to_string());
    output.table_row("Files failed", &stats.error_files.to_string());
    output.table_row("Streamed", &stats.streamed_files.to_string());
    output.table_row("Cache hits", &result.cache_hits.to_string());
    output.table_row(
        "Chunks",
        &format!("{} (final size {})", stats.chunks_completed, stats.final_chunk_size),
    );
    output.table_row("Bytes", &format_bytes(stats.total_bytes));
    output.table_row("Peak memory", &format_bytes(result.memory_peak));
    output.table_row("Duration", &format!("{} ms", result.duration_ms));

    if let Some(first) = result.backup_paths.first()
        && let Some(run_dir) = first.ancestors().find(|dir| dir.ends_with(&result.run_id))
    {
        output.table_row("Backups", &run_dir.display().to_string());
    }

    let parallelism: Vec<String> = stats.chunk_parallelism.iter().map(usize::to_string).collect();
    output.verbose(&format!("Chunk parallelism: {}", parallelism.join(", ")));
    output.verbose(&format!("Cache evictions: {}", stats.cache_evictions));
    for backup in &result.backup_paths {
        output.verbose(&format!("Backed up {}", backup.display()));
    }
    if dry_run {
        output.info("Dry run: no file was modified");
    }

    if !result.warnings.is_empty() {
        output.blank_line();
        for warning in &result.warnings {
            output.warning(warning);
        }
    }

    for error in &result.errors {
        output.error(&error.to_string());
    }

    output.blank_line();
    match result.status() {
        RunStatus::Success => output.task_summary("✔", "All files transformed", true),
        RunStatus::PartialSuccess => output.task_summary("✖", "Completed with failures", false),
        RunStatus::Failure => output.task_summary("✖", "Run failed", false),
    }
    if result.cancelled {
        output.warning("Run was cancelled; rerun to process the skipped files");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use crate::cli::commands::Commands;
    use clap::Parser;

    fn parse(args: &[&str]) -> ApplyArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Apply(args) => args,
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_flags_become_overrides() {
        let args = parse(&[
            "chunkshift", "apply", "a.txt", "--rule", "x=y", "--no-cache", "-j", "3",
        ]);
        let overrides = ApplyOverrides::from_args(&args).unwrap();
        let value = serde_json::to_value(&overrides).unwrap();

        assert_eq!(value["max_parallel_jobs"], 3);
        assert_eq!(value["enable_caching"], false);
        assert_eq!(value["rules"][0]["from"], "x");
        assert!(value.get("chunk_size").is_none());
        assert!(value.get("dry_run").is_none());
    }

    #[test]
    fn test_bad_rule_rejected() {
        let args = parse(&["chunkshift", "apply", "a.txt", "--rule", "nope"]);
        assert!(ApplyOverrides::from_args(&args).is_err());
    }

    #[test]
    fn test_paths_or_list_required() {
        assert!(Cli::try_parse_from(["chunkshift", "apply"]).is_err());
        assert!(Cli::try_parse_from(["chunkshift", "apply", "--files-from", "list.txt"]).is_ok());
    }
}
