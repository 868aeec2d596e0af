//! Report command - print the rotation or usage report

use anyhow::{Context, Result};
use std::path::Path;

use crate::ui;

pub async fn run(storage_dir: &Path, output: Option<&str>, usage: bool, _verbose: bool) -> Result<()> {
    let pool = super::open_pool(storage_dir).await?;
    pool.perform_health_check();
    let report = if usage {
        pool.generate_usage_report()
    } else {
        pool.generate_rotation_report()
    };

    match output {
        Some(path) => {
            std::fs::write(path, &report)
                .with_context(|| format!("Failed to write report to {}", path))?;
            ui::success(&format!("Report written to {}", path));
        }
        None => println!("{}", report),
    }
    Ok(())
}
