//! Markdown rotation report.

use super::FleetSnapshot;
use crate::health::{HealthState, PerformanceMetrics};
use crate::store::Credential;
use std::fmt::Write;

/// Keys listed in the details table.
const MAX_DETAIL_ROWS: usize = 20;

/// Render the rotation report.
///
/// `keys` pairs each credential with its metrics; the table lists the 20
/// highest-priority keys.
pub fn render_report(snapshot: &FleetSnapshot, keys: &[(Credential, PerformanceMetrics)]) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_report(&mut out, snapshot, keys);
    out
}

fn write_report(
    out: &mut String,
    snapshot: &FleetSnapshot,
    keys: &[(Credential, PerformanceMetrics)],
) -> std::fmt::Result {
    writeln!(out, "# Key Rotation Report")?;
    writeln!(out)?;
    writeln!(out, "Generated: {}", snapshot.taken_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
    writeln!(out)?;

    writeln!(out, "## Rotation Statistics")?;
    writeln!(out)?;
    writeln!(out, "- Total rotations: {}", snapshot.total_rotations)?;
    writeln!(out, "- Successful requests: {}", snapshot.successful_requests)?;
    writeln!(out, "- Failed requests: {}", snapshot.failed_requests)?;
    writeln!(out, "- Admission denials: {}", snapshot.admission_denials)?;
    writeln!(
        out,
        "- Average rotation time: {:.3} ms",
        snapshot.average_rotation_time_ms
    )?;
    writeln!(
        out,
        "- Rotation frequency: {:.2} per hour",
        snapshot.rotation_frequency_per_hour
    )?;
    writeln!(out, "- Requests in the last hour: {}", snapshot.requests_last_hour)?;
    match snapshot.success_rate_last_hour {
        Some(rate) => writeln!(out, "- Success rate in the last hour: {:.1}%", rate * 100.0)?,
        None => writeln!(out, "- Success rate in the last hour: n/a")?,
    }
    writeln!(out)?;

    writeln!(out, "## Health Summary")?;
    writeln!(out)?;
    for state in HealthState::ALL {
        writeln!(out, "- {}: {}", state, snapshot.health.get(state))?;
    }
    writeln!(out, "- Total keys: {}", snapshot.health.total())?;
    writeln!(out)?;

    writeln!(out, "## Key Performance Details")?;
    writeln!(out)?;
    if keys.is_empty() {
        writeln!(out, "No keys registered.")?;
        return Ok(());
    }
    writeln!(
        out,
        "| Key | Service | Name | Status | Priority | Success Rate | Requests | Avg Response |"
    )?;
    writeln!(out, "|---|---|---|---|---|---|---|---|")?;

    let mut rows: Vec<&(Credential, PerformanceMetrics)> = keys.iter().collect();
    rows.sort_by(|(ca, a), (cb, b)| {
        b.priority_score
            .total_cmp(&a.priority_score)
            .then(ca.id.cmp(&cb.id))
    });
    for (credential, m) in rows.into_iter().take(MAX_DETAIL_ROWS) {
        let status = if credential.disabled {
            format!("{} (disabled)", m.health_status)
        } else {
            m.health_status.to_string()
        };
        writeln!(
            out,
            "| {} | {} | {} | {} | {:.1} | {:.1}% | {} | {:.0} ms |",
            credential.id.short(),
            credential.service.display_name(),
            credential.name,
            status,
            m.priority_score,
            m.success_rate * 100.0,
            m.total_requests,
            m.average_response_time_ms,
        )?;
    }
    if keys.len() > MAX_DETAIL_ROWS {
        writeln!(out)?;
        writeln!(out, "_{} more keys not shown._", keys.len() - MAX_DETAIL_ROWS)?;
    }
    Ok(())
}
