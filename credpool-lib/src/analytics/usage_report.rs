//! Markdown usage report.

use crate::usage::{LimitStatus, QuotaAlert, UsageAnalytics};
use chrono::{DateTime, Utc};
use std::fmt::Write;

/// Rows listed per section.
const MAX_ROWS: usize = 10;

/// Keys above this share of their limit are listed as high usage.
const HIGH_USAGE_PERCENT: f64 = 50.0;

/// Render the usage report: band summary, recent alerts, high-usage keys
/// and predicted exhaustions.
pub fn render_usage_report(
    keys: &[UsageAnalytics],
    alerts: &[QuotaAlert],
    generated_at: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let _ = write_usage_report(&mut out, keys, alerts, generated_at);
    out
}

fn write_usage_report(
    out: &mut String,
    keys: &[UsageAnalytics],
    alerts: &[QuotaAlert],
    generated_at: DateTime<Utc>,
) -> std::fmt::Result {
    writeln!(out, "# API Usage Report")?;
    writeln!(out)?;
    writeln!(out, "Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
    writeln!(out)?;

    writeln!(out, "## Summary")?;
    writeln!(out)?;
    writeln!(out, "- Total API keys: {}", keys.len())?;
    for band in LimitStatus::ALL {
        let count = keys.iter().filter(|k| k.status.limit_status == band).count();
        let share = if keys.is_empty() {
            0.0
        } else {
            count as f64 / keys.len() as f64 * 100.0
        };
        writeln!(out, "- {}: {} ({:.1}%)", band, count, share)?;
    }
    writeln!(out)?;

    writeln!(out, "## Recent Alerts")?;
    writeln!(out)?;
    if alerts.is_empty() {
        writeln!(out, "No recent alerts.")?;
    } else {
        for alert in alerts.iter().take(MAX_ROWS) {
            writeln!(
                out,
                "- **{}**: key {} at {}/{} ({:.1}% usage), {}",
                alert.status,
                alert.credential_id.short(),
                alert.current_usage,
                alert.limit,
                alert.percentage_used,
                alert.raised_at.format("%Y-%m-%d %H:%M UTC"),
            )?;
        }
    }
    writeln!(out)?;

    writeln!(out, "## High Usage Keys")?;
    writeln!(out)?;
    let mut high: Vec<&UsageAnalytics> = keys
        .iter()
        .filter(|k| k.status.percentage_used > HIGH_USAGE_PERCENT)
        .collect();
    high.sort_by(|a, b| {
        b.status
            .percentage_used
            .total_cmp(&a.status.percentage_used)
            .then(a.status.credential_id.cmp(&b.status.credential_id))
    });
    if high.is_empty() {
        writeln!(out, "No high usage keys detected.")?;
    } else {
        for key in high.into_iter().take(MAX_ROWS) {
            writeln!(
                out,
                "- {} ({}, {}): {:.1}% usage ({}/{})",
                key.name,
                key.service.display_name(),
                key.status.credential_id.short(),
                key.status.percentage_used,
                key.status.current_usage,
                key.status.rate_limit,
            )?;
        }
    }
    writeln!(out)?;

    writeln!(out, "## Forecast")?;
    writeln!(out)?;
    let mut at_risk: Vec<&UsageAnalytics> = keys
        .iter()
        .filter(|k| k.forecast.predicted_exhaustion_time.is_some())
        .collect();
    at_risk.sort_by_key(|k| (k.forecast.predicted_exhaustion_time, k.status.credential_id));
    if at_risk.is_empty() {
        writeln!(out, "No key is predicted to run out before its window resets.")?;
        return Ok(());
    }
    for key in at_risk.into_iter().take(MAX_ROWS) {
        if let Some(at) = key.forecast.predicted_exhaustion_time {
            writeln!(
                out,
                "- {} ({}): runs out at {} at {:.1} requests/hour",
                key.name,
                key.service.display_name(),
                at.format("%Y-%m-%d %H:%M UTC"),
                key.forecast.usage_rate_per_hour,
            )?;
        }
        for hint in &key.forecast.recommendations {
            writeln!(out, "  - {}", hint)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::{UsageForecast, UsageStatus};
    use crate::{CredentialId, Service};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 17, 0, 0).unwrap()
    }

    fn key(name: &str, used: u32, limit: u32) -> UsageAnalytics {
        let window_start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let window_end = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let percentage_used = f64::from(used) / f64::from(limit) * 100.0;
        let status = UsageStatus {
            credential_id: CredentialId::new(),
            current_usage: used,
            provisional_reservations: 0,
            rate_limit: limit,
            window_start,
            window_end,
            percentage_used,
            requests_remaining: limit - used,
            reset_time: window_end,
            time_until_reset_secs: 7 * 3600,
            limit_status: if percentage_used >= 80.0 {
                LimitStatus::Warning
            } else {
                LimitStatus::Safe
            },
        };
        UsageAnalytics {
            service: Service::Tavily,
            name: name.to_string(),
            forecast: UsageForecast::from_status(&status, now()),
            status,
        }
    }

    #[test]
    fn test_usage_report_sections() {
        let keys = vec![key("busy", 85, 100), key("half", 60, 100), key("idle", 1, 100)];
        let report = render_usage_report(&keys, &[], now());
        assert!(report.starts_with("# API Usage Report"));
        assert!(report.contains("- Total API keys: 3"));
        assert!(report.contains("- safe: 2 (66.7%)"));
        assert!(report.contains("- warning: 1 (33.3%)"));
        assert!(report.contains("No recent alerts."));

        let busy = report.find("- busy (Tavily").unwrap();
        let half = report.find("- half (Tavily").unwrap();
        assert!(busy < half, "highest usage first");
        assert!(!report.contains("- idle ("));

        assert!(report.contains("## Forecast"));
        assert!(report.contains("runs out at 2026-03-01 20:00 UTC"));
        assert!(report.contains("additional API keys"));
    }

    #[test]
    fn test_empty_usage_report() {
        let report = render_usage_report(&[], &[], now());
        assert!(report.contains("- Total API keys: 0"));
        assert!(report.contains("- safe: 0 (0.0%)"));
        assert!(report.contains("No high usage keys detected."));
        assert!(report.contains("No key is predicted to run out before its window resets."));
    }
}
