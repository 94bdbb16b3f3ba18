/*
[INPUT]:  Output path for a new configuration file
[OUTPUT]: YAML file holding the default TrackerConfig
[POS]:    CLI initialization layer
[UPDATE]: When TrackerConfig schema changes
*/

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use tracing::info;

use stockdash_tracker::TrackerConfig;

/// Write the default configuration to `output` (or the platform default path).
pub fn run_init(output: Option<PathBuf>, force: bool) -> Result<PathBuf> {
    let output = match output {
        Some(path) => path,
        None => TrackerConfig::default_path().context("no platform config directory")?,
    };
    if output.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", output.display());
    }

    let yaml = TrackerConfig::default()
        .to_yaml()
        .context("failed to serialize config to YAML")?;
    write_config(&output, &yaml)?;

    info!(path = %output.display(), "configuration written");
    Ok(output)
}

fn write_config(output: &Path, yaml: &str) -> Result<()> {
    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(output, yaml)
        .with_context(|| format!("failed to write config to {}", output.display()))
}
