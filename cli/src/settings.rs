//! Resolution of the archive configuration from file, environment and flags.

use std::path::Path;

use anyhow::Context;

use media_archive_archiver::ArchiveConfig;

use crate::cli::RunArgs;

/// Read an [`ArchiveConfig`] from a TOML file.
pub fn load_config_file(path: &Path) -> anyhow::Result<ArchiveConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Built-in defaults, overridden by the config file if any, overridden by
/// flags and environment variables.
pub fn resolve(config_file: Option<&Path>, args: &RunArgs) -> anyhow::Result<ArchiveConfig> {
    let mut config = match config_file {
        Some(path) => load_config_file(path)?,
        None => ArchiveConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;
    Ok(config)
}
