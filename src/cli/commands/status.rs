use crate::cli::Output;
use crate::cli::output::format_bytes;
use crate::config::ChunkshiftConfig;
use crate::memory::{MemorySampler, ProcessSampler};
use anyhow::Result;
use clap::Args;
use system_profile::SYSTEM;

#[derive(Args, Default)]
pub struct StatusArgs {
    /// Also print the raw memory sample as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: StatusArgs, output: &Output, custom_config: Option<&str>) -> Result<()> {
    output.header("System");
    output.table_row("Profile", &SYSTEM.summary());
    output.table_row("Available memory", &format_bytes(SYSTEM.available_memory));
    output.table_row("I/O workers", &SYSTEM.recommended_io_workers.to_string());
    output.table_row("CPU workers", &SYSTEM.recommended_cpu_workers.to_string());

    match ChunkshiftConfig::load(custom_config, None::<&()>).and_then(|config| config.engine()) {
        Ok(engine) => {
            let thresholds = engine.thresholds()?;
            let sample = ProcessSampler::new().sample();

            output.header("Memory budget");
            output.table_row("Limit", &format_bytes(engine.effective_memory_limit()));
            output.table_row("Warning", &format_bytes(thresholds.warning));
            output.table_row("Cleanup", &format_bytes(thresholds.cleanup));
            output.table_row("Critical", &format_bytes(thresholds.critical));
            output.table_row("Current usage", &format_bytes(sample.usage()));
            output.table_row("Pressure", &thresholds.classify(sample.usage()).to_string());

            output.header("Engine");
            output.table_row("Parallel jobs", &engine.max_parallel_jobs.to_string());
            output.table_row("Chunk size", &engine.chunk_size.to_string());
            output.table_row("Caching", &engine.enable_caching.to_string());
            output.table_row("Streaming threshold", &format_bytes(engine.streaming_threshold));
            output.table_row("Rules", &engine.rules.len().to_string());

            if args.json {
                println!("{}", serde_json::to_string_pretty(&sample)?);
            }
        }
        Err(e) => output.warning(&format!("Configuration issues: {e}")),
    }

    Ok(())
}
