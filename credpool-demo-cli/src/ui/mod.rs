//! Terminal UI utilities

use colored::{ColoredString, Colorize};
use credpool_lib::health::HealthState;
use credpool_lib::usage::LimitStatus;
use indicatif::{ProgressBar, ProgressStyle};

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print a section header
pub fn header(text: &str) {
    println!("\n{}", text.bold().underline());
}

/// Print a key-value pair
pub fn key_value(key: &str, value: &str) {
    println!("  {}: {}", key.cyan(), value);
}

/// Print a separator line
pub fn separator() {
    println!("{}", "─".repeat(60).dimmed());
}

/// Print JSON prettily
pub fn json(value: &serde_json::Value) {
    if let Ok(pretty) = serde_json::to_string_pretty(value) {
        println!("{}", pretty);
    }
}

/// Prompt for user confirmation
pub fn confirm(prompt: &str, default: bool) -> anyhow::Result<bool> {
    use dialoguer::Confirm;
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .interact()?)
}

/// Progress bar for a known number of steps
pub fn progress(len: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.set_message(message.to_string());
    pb
}

/// Health state colored by severity
pub fn health(state: HealthState) -> ColoredString {
    let text = state.to_string();
    match state {
        HealthState::Healthy => text.green(),
        HealthState::Degraded => text.yellow(),
        HealthState::Unhealthy => text.truecolor(255, 140, 0),
        HealthState::Failed => text.red().bold(),
        HealthState::Cooldown => text.blue(),
    }
}

/// Quota band colored by severity
pub fn limit(status: LimitStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        LimitStatus::Safe => text.green(),
        LimitStatus::Warning => text.yellow(),
        LimitStatus::Emergency => text.red(),
        LimitStatus::Exhausted => text.red().bold(),
    }
}

/// Time left until `at`, as "2h 14m", "4m 10s" or "now"
pub fn until(at: chrono::DateTime<chrono::Utc>) -> String {
    duration(at.signed_duration_since(chrono::Utc::now()))
}

fn duration(d: chrono::Duration) -> String {
    if d <= chrono::Duration::zero() {
        return "now".to_string();
    }
    let days = d.num_days();
    let hours = d.num_hours() % 24;
    let minutes = d.num_minutes() % 60;
    let seconds = d.num_seconds() % 60;
    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
