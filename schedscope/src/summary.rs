//! End-of-session summary

// Time conversions intentionally lose precision for display purposes
#![allow(clippy::cast_precision_loss)]

use log::warn;
use std::fmt::Write as _;
use std::io;

use crate::aggregate::Dimension;
use crate::export::{ArtifactOutcome, Chart};
use crate::session::{RunSummary, SessionReport};

/// Render the summary block printed after a session
#[must_use]
pub fn format_summary(run: &RunSummary, report: &SessionReport) -> String {
    let mut out = String::new();
    let aggregates = &report.bundle.aggregates;

    let status = match run.exit_status {
        Some(status) => match status.code() {
            Some(code) => format!("exit code {code}"),
            None => "killed by signal".to_string(),
        },
        None => "not reaped".to_string(),
    };
    let _ = writeln!(out, "\n{}: {:.1}s ({status})", run.exit_reason, run.elapsed.as_secs_f64());
    let _ = writeln!(
        out,
        "migrations: {} ingested, {} pid-0 discarded, {} lost",
        aggregates.ingested,
        aggregates.discarded_idle,
        run.events_lost.map_or_else(|| "unknown".to_string(), |lost| lost.to_string()),
    );
    let _ = writeln!(
        out,
        "drain: {} ticks, {} records, {} errors, {} counter errors",
        run.stats.ticks, run.stats.records, run.stats.drain_errors, run.stats.counter_errors
    );

    for (name, count) in &aggregates.counters {
        let symbol = name.split(':').next().unwrap_or(name);
        let _ = writeln!(out, "'{symbol}' returned 1 a total of {count} times");
    }

    for outcome in &report.outcomes {
        let _ = writeln!(out, "{}", format_outcome(outcome));
    }

    for warning in &report.warnings {
        let _ = writeln!(out, "warning: {warning}");
    }

    out
}

fn format_outcome(outcome: &ArtifactOutcome) -> String {
    match outcome.error {
        None => format!("saved: {}", outcome.path.display()),
        Some(_) => format!("failed: {}", outcome.path.display()),
    }
}

/// Print the colored on-CPU chart, if the session produced one
///
/// Returns whether a chart was written. A failing writer is logged and
/// otherwise ignored; the artifacts are already on disk by then.
pub fn print_chart<W: io::Write>(report: &SessionReport, out: &mut W) -> bool {
    let Some(table) = report.bundle.aggregates.dimension(Dimension::OnCpu) else {
        return false;
    };
    let Ok(chart) = Chart::build(Dimension::OnCpu, table, report.bundle.topology.as_ref()) else {
        return false;
    };
    match chart.print_colored(out) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to print chart: {e}");
            false
        }
    }
}

/// Print the summary to stderr
pub fn display_summary(run: &RunSummary, report: &SessionReport) {
    eprint!("{}", format_summary(run, report));
}
