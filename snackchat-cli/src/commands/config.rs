use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use shared::config::server::{Config, Profile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    fn file_name(self) -> &'static str {
        match self {
            Self::Yaml => "config.yaml",
            Self::Json => "config.json",
            Self::Toml => "config.toml",
        }
    }
}

/// Writes the default configuration for `profile` in `format`.
///
/// Without `output` the file lands in the working directory as
/// `config.<ext>`. Returns the path written.
///
/// # Errors
/// Returns an error if serialization or writing the file fails.
pub fn generate_config(
    format: ConfigFormat,
    profile: Profile,
    output: Option<PathBuf>,
) -> Result<PathBuf> {
    let config = Config::default_for_profile(profile);
    let serialized = match format {
        ConfigFormat::Yaml => serde_yml::to_string(&config)?,
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
        ConfigFormat::Toml => toml::to_string_pretty(&config)?,
    };

    let path = output.unwrap_or_else(|| PathBuf::from(format.file_name()));
    fs::write(&path, serialized)
        .with_context(|| format!("failed to write {}", path.display()))?;

    println!("Configuration file '{}' generated successfully.", path.display());
    Ok(path)
}
