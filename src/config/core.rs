use super::EngineConfig;
use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml};
use serde::Serialize;
use std::path::Path;

// Embed the default config at compile time
const DEFAULT_CONFIG: &str = include_str!("../../default-config.toml");

const ENV_PREFIX: &str = "CHUNKSHIFT_";

pub struct ChunkshiftConfig {
    figment: Figment,
}

impl ChunkshiftConfig {
    /// Merge every layer, lowest priority first:
    /// defaults, user config, repo config, `custom_config`, environment, CLI.
    pub fn load<T: Serialize>(
        custom_config: Option<&str>,
        cli_overrides: Option<T>,
    ) -> Result<Self> {
        tracing::trace!("config load: starting");

        let mut figment = Figment::new()
            .merge(Toml::string(DEFAULT_CONFIG))
            .merge(Toml::file(Self::user_config_path("toml")))
            .merge(Json::file(Self::user_config_path("json")))
            .merge(Toml::file("chunkshift.toml"))
            .merge(Json::file("chunkshift.json"));

        if let Some(path) = custom_config {
            if !Path::new(path).exists() {
                anyhow::bail!("config file not found: {path}");
            }
            figment = if path.ends_with(".json") {
                figment.merge(Json::file(path))
            } else {
                figment.merge(Toml::file(path))
            };
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(cli) = cli_overrides {
            tracing::trace!("config load: applying CLI overrides");
            figment = figment.merge(Serialized::defaults(cli));
        }

        Ok(ChunkshiftConfig { figment })
    }

    /// Typed, validated engine configuration
    pub fn engine(&self) -> Result<EngineConfig> {
        let config: EngineConfig = self
            .figment
            .extract()
            .context("failed to extract engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Get a nested object/section as JSON
    pub fn get_section(&self, path: &str) -> Result<serde_json::Value> {
        Ok(self.figment.extract_inner(path)?)
    }

    /// Get the full merged configuration as a structured value
    pub fn get_full_config(&self) -> Result<serde_json::Value> {
        Ok(self.figment.extract()?)
    }

    fn user_config_path(extension: &str) -> String {
        match std::env::var("HOME") {
            Ok(home) => format!("{home}/.config/chunkshift/config.{extension}"),
            Err(_) => format!("~/.config/chunkshift/config.{extension}"),
        }
    }
}
