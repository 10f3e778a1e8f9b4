use crate::cli::Output;
use crate::config::ChunkshiftConfig;
use anyhow::Result;
use clap::{Args, Subcommand};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Display the merged configuration
    Show {
        /// Output format: toml or json
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
    /// Print one configuration value, e.g. `monitor.interval_ms`
    Get { key: String },
    /// Check that the merged configuration is usable
    Validate,
}

pub async fn execute(args: ConfigArgs, output: &Output, custom_config: Option<&str>) -> Result<()> {
    let config = ChunkshiftConfig::load(custom_config, None::<&()>)?;

    match args.command {
        ConfigCommand::Show { format } => {
            let engine = config.engine()?;
            let rendered = match format.to_lowercase().as_str() {
                "toml" => toml::to_string_pretty(&engine)?,
                "json" => serde_json::to_string_pretty(&engine)?,
                _ => anyhow::bail!("Unsupported format: {format}. Use toml or json"),
            };
            println!("{rendered}");
        }
        ConfigCommand::Get { key } => {
            let value = config
                .get_section(&key)
                .map_err(|_| anyhow::anyhow!("Configuration key '{key}' not found"))?;
            match value {
                serde_json::Value::String(s) => println!("{s}"),
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    println!("{}", serde_json::to_string_pretty(&value)?)
                }
                other => println!("{other}"),
            }
        }
        ConfigCommand::Validate => {
            let engine = config.engine()?;
            let thresholds = engine.thresholds()?;
            output.success("Configuration is valid");
            output.table_row("Rules", &engine.rules.len().to_string());
            output.table_row(
                "Thresholds (bytes)",
                &format!(
                    "{} / {} / {}",
                    thresholds.warning, thresholds.cleanup, thresholds.critical
                ),
            );
        }
    }

    Ok(())
}
