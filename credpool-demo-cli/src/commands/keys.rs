//! Key management commands - register, list, enable and disable keys

use anyhow::{anyhow, Result};
use colored::Colorize;
use credpool_lib::store::{CredentialConfig, ResetPeriod};
use credpool_lib::{CredentialId, Service};
use std::path::Path;

use crate::ui;

/// Parse a window length: `hourly`, `daily`, `weekly`, `monthly` or seconds
pub fn parse_period(s: &str) -> Result<ResetPeriod> {
    match s.trim().to_ascii_lowercase().as_str() {
        "hourly" => Ok(ResetPeriod::Hourly),
        "daily" => Ok(ResetPeriod::Daily),
        "weekly" => Ok(ResetPeriod::Weekly),
        "monthly" => Ok(ResetPeriod::Monthly),
        other => {
            let secs: u64 = other
                .trim_end_matches('s')
                .parse()
                .map_err(|_| anyhow!("Invalid period '{}'", s))?;
            if secs == 0 {
                return Err(anyhow!("Period must be at least one second"));
            }
            Ok(ResetPeriod::seconds(secs))
        }
    }
}

pub async fn register(
    storage_dir: &Path,
    service: Service,
    name: &str,
    secret_ref: &str,
    limit: Option<u32>,
    period: Option<&str>,
    verbose: bool,
) -> Result<()> {
    ui::header("Register Key");

    let mut config = CredentialConfig::new(service, name, secret_ref);
    if let Some(limit) = limit {
        config = config.with_rate_limit(limit);
    }
    if let Some(period) = period {
        config = config.with_reset_period(parse_period(period)?);
    }

    let pool = super::open_pool(storage_dir).await?;
    let id = pool.register(config).await?;
    let credential = pool.credential(&id)?;

    ui::success(&format!("Registered '{}' for {}", name, service.display_name()));
    ui::key_value("ID", &id.to_string());
    ui::key_value(
        "Limit",
        &format!("{} per {}", credential.rate_limit, credential.reset_period),
    );
    if verbose {
        ui::key_value("Secret ref", credential.secret_ref.expose());
    }
    Ok(())
}

pub async fn list(storage_dir: &Path, service: Option<Service>, _verbose: bool) -> Result<()> {
    ui::header("Registered Keys");

    let pool = super::open_pool(storage_dir).await?;
    let credentials: Vec<_> = pool
        .credentials()
        .into_iter()
        .filter(|c| service.map_or(true, |s| c.service == s))
        .collect();

    if credentials.is_empty() {
        ui::info("No keys found");
        ui::info("Run 'credpool-demo register' to add one");
        return Ok(());
    }

    for credential in credentials {
        let metrics = pool.metrics(&credential.id)?;
        let usage = pool.get_usage_status(&credential.id)?;
        let name = if credential.is_enabled() {
            credential.name.bold().to_string()
        } else {
            format!("{} {}", credential.name.dimmed(), "(disabled)".dimmed())
        };

        println!("{} [{}]", name, credential.service);
        ui::key_value("  ID", &credential.id.to_string());
        ui::key_value("  Health", &ui::health(metrics.health_status).to_string());
        ui::key_value(
            "  Usage",
            &format!(
                "{}/{} ({})",
                usage.current_usage,
                usage.rate_limit,
                ui::limit(usage.limit_status)
            ),
        );
        ui::key_value("  Priority", &format!("{:.1}", metrics.priority_score));
        ui::key_value(
            "  Registered",
            &credential.created_at.format("%Y-%m-%d %H:%M UTC").to_string(),
        );
    }

    Ok(())
}

pub async fn set_enabled(
    storage_dir: &Path,
    id: &CredentialId,
    enabled: bool,
    _verbose: bool,
) -> Result<()> {
    let pool = super::open_pool(storage_dir).await?;
    let credential = if enabled {
        pool.enable(id).await?
    } else {
        pool.disable(id).await?
    };

    let verb = if enabled { "enabled" } else { "disabled" };
    ui::success(&format!("Key '{}' {}", credential.name, verb));
    Ok(())
}
