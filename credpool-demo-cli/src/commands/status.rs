//! Status command - quota and health per key

use anyhow::Result;
use colored::Colorize;
use credpool_lib::CredentialId;
use std::path::Path;

use crate::ui;

pub async fn run(
    storage_dir: &Path,
    id: Option<CredentialId>,
    json: bool,
    _verbose: bool,
) -> Result<()> {
    let pool = super::open_pool(storage_dir).await?;
    let ids: Vec<CredentialId> = match id {
        Some(id) => vec![pool.credential(&id)?.id],
        None => pool.credentials().into_iter().map(|c| c.id).collect(),
    };

    if json {
        let mut entries = Vec::with_capacity(ids.len());
        for id in &ids {
            entries.push(serde_json::json!({
                "usage": pool.get_usage_status(id)?,
                "metrics": pool.metrics(id)?,
            }));
        }
        ui::json(&serde_json::json!({
            "keys": entries,
            "attention": pool.get_keys_needing_attention().len(),
            "emergency_stop": pool.is_emergency_stopped(),
        }));
        return Ok(());
    }

    ui::header("Key Status");
    if ids.is_empty() {
        ui::info("No keys registered");
        return Ok(());
    }

    for id in &ids {
        let credential = pool.credential(id)?;
        let usage = pool.get_usage_status(id)?;
        let metrics = pool.metrics(id)?;

        println!("{} {}", credential.name.bold(), id.short().dimmed());
        ui::key_value("Health", &ui::health(metrics.health_status).to_string());
        ui::key_value(
            "Usage",
            &format!(
                "{}/{} ({:.1}%, {})",
                usage.current_usage,
                usage.rate_limit,
                usage.percentage_used,
                ui::limit(usage.limit_status)
            ),
        );
        ui::key_value("Remaining", &usage.requests_remaining.to_string());
        ui::key_value(
            "Resets",
            &format!(
                "{} (in {})",
                usage.reset_time.format("%Y-%m-%d %H:%M UTC"),
                ui::until(usage.reset_time)
            ),
        );
        ui::key_value(
            "Success rate",
            &format!("{:.1}%", metrics.success_rate * 100.0),
        );
        if let Some(until) = metrics.cooldown_until {
            ui::key_value(
                "Cooldown until",
                &format!("{} (in {})", until.format("%H:%M:%S UTC"), ui::until(until)),
            );
        }
        ui::separator();
    }

    let attention = pool.get_keys_needing_attention();
    if !attention.is_empty() {
        ui::warning(&format!("{} key(s) need attention", attention.len()));
    }
    Ok(())
}
