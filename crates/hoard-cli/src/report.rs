//! Rendering of the final run report: plain-text summary and CSV export.

use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use hoard_core::RunReport;
use serde::Serialize;

/// Human-readable summary printed to stdout at the end of `hoard fetch`.
pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();
    let secs = report.duration().as_secs_f64();

    let _ = writeln!(out, "Run {} finished in {secs:.1}s", report.run_id);
    let _ = writeln!(out, "  {report}");
    if report.bytes_fetched > 0 {
        let _ = writeln!(out, "  fetched {}", format_bytes(report.bytes_fetched));
    }
    if report.retries > 0 {
        let _ = writeln!(
            out,
            "  {} retries, peak {} in flight",
            report.retries, report.peak_in_flight
        );
    }
    if let Some(fatal) = &report.fatal {
        let _ = writeln!(out, "  FATAL ({}): {}", fatal.error_class, fatal.message);
    }
    if report.timed_out {
        let _ = writeln!(out, "  global timeout reached");
    } else if report.cancelled {
        let _ = writeln!(out, "  cancelled");
    }

    if !report.failures.is_empty() {
        let _ = writeln!(out, "\nFailed:");
        for failure in &report.failures {
            let _ = write!(
                out,
                "  {} [{}] after {} attempt{}",
                failure.item_id,
                failure.error_class,
                failure.attempts,
                if failure.attempts == 1 { "" } else { "s" }
            );
            if let Some(message) = &failure.last_error {
                let _ = write!(out, ": {message}");
            }
            out.push('\n');
        }
    }

    if !report.skips.is_empty() {
        let _ = writeln!(out, "\nSkipped:");
        for skip in &report.skips {
            let _ = writeln!(out, "  {} ({})", skip.item_id, skip.reason);
        }
    }

    let open: Vec<_> = report
        .breakers
        .iter()
        .filter(|b| b.state != "closed")
        .collect();
    if !open.is_empty() {
        let _ = writeln!(out, "\nCircuit breakers:");
        for breaker in open {
            let _ = writeln!(
                out,
                "  {}/{}: {} after {} consecutive failures",
                breaker.category, breaker.error_class, breaker.state, breaker.consecutive_failures
            );
        }
    }

    out
}

#[derive(Serialize)]
struct CsvRow<'a> {
    item_id: &'a str,
    state: &'a str,
    attempts: u32,
    error_class: &'a str,
    skip_reason: &'a str,
    bytes: Option<u64>,
    duration_ms: u64,
    last_error: &'a str,
}

/// One row per item, in work-list order.
pub fn write_csv<W: Write>(report: &RunReport, writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for outcome in &report.outcomes {
        csv.serialize(CsvRow {
            item_id: &outcome.item_id,
            state: outcome.state.as_str(),
            attempts: outcome.attempt_count(),
            error_class: outcome
                .last_error_class()
                .filter(|_| outcome.state == hoard_core::ItemState::Failed)
                .map(|c| c.as_str())
                .unwrap_or(""),
            skip_reason: outcome.skip_reason.map(|r| r.as_str()).unwrap_or(""),
            bytes: outcome.bytes,
            duration_ms: outcome.attempts.iter().map(|a| a.duration_ms).sum(),
            last_error: outcome.last_error.as_deref().unwrap_or(""),
        })?;
    }
    csv.flush()?;
    Ok(())
}

pub fn export_csv(report: &RunReport, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report file: {}", path.display()))?;
    write_csv(report, file).with_context(|| format!("Failed to write report: {}", path.display()))
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
