//! Init-config command - write a pool configuration file

use anyhow::{Context, Result};
use credpool_lib::config::PoolConfig;
use std::path::Path;

use crate::ui;

pub async fn init(storage_dir: &Path, config: PoolConfig, force: bool, verbose: bool) -> Result<()> {
    ui::header("Initialize Configuration");

    let path = super::config_path(storage_dir);
    if path.exists()
        && !force
        && !ui::confirm(
            &format!("{} already exists. Overwrite?", path.display()),
            false,
        )?
    {
        ui::info("Configuration unchanged");
        return Ok(());
    }

    config.validate()?;
    std::fs::create_dir_all(storage_dir)
        .with_context(|| format!("Failed to create {}", storage_dir.display()))?;
    std::fs::write(&path, config.to_json_pretty()?)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    ui::success(&format!("Configuration written to {}", path.display()));
    if verbose {
        ui::key_value("Reservation timeout", &format!("{}s", config.reservation_timeout_secs));
        ui::key_value(
            "Probation successes",
            &config.health.probation_successes.to_string(),
        );
        ui::key_value(
            "Cooldown floor",
            &format!("{}s", config.backoff.floor_secs),
        );
    }
    Ok(())
}
