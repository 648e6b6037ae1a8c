use std::path::{Path, PathBuf};

use anyhow::Context;
use courier_delivery::MailerConfig;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "COURIER_CONFIG";

/// Files tried, in order, when [`CONFIG_ENV`] is unset.
pub const DEFAULT_PATHS: [&str; 2] = ["./courier.config.ron", "/etc/courier/courier.config.ron"];

/// Find the configuration file using the following precedence:
/// 1. `COURIER_CONFIG` environment variable
/// 2. ./courier.config.ron (current working directory)
/// 3. /etc/courier/courier.config.ron (system-wide config)
///
/// # Errors
/// If the variable points at a missing file, or no default file exists.
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    let defaults = DEFAULT_PATHS.map(PathBuf::from);
    locate(std::env::var_os(CONFIG_ENV).map(PathBuf::from), &defaults)
}

/// [`find_config_file`] with the environment value and candidates supplied.
///
/// # Errors
/// If `explicit` is set but missing, or none of `defaults` exists.
pub fn locate(explicit: Option<PathBuf>, defaults: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

/// Read and parse a RON configuration file.
///
/// # Errors
/// If the file cannot be read or is not a valid configuration.
pub fn load(path: &Path) -> anyhow::Result<MailerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    ron::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
}
