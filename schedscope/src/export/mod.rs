//! # Session Export
//!
//! Writes an [`ExportBundle`] (raw migration log, aggregate table, CPU
//! topology) to disk:
//!
//! - `<prefix>.json`: everything in one document
//! - `<prefix>.csv`: the raw log, columns in record schema order
//! - `<prefix>_aggregate.csv`: `dimension,cpu,pid,count` rows
//! - `<prefix>_<dimension>.txt`: one categorized bar chart per CPU dimension
//!
//! Every artifact is attempted independently; a failure is reported in its
//! [`ArtifactOutcome`] and the remaining artifacts are still written.

pub mod chart;
pub mod theme;

use clap::ValueEnum;
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::aggregate::{AggregateRow, AggregateTable, Dimension};
use crate::domain::ExportError;
use crate::record::{MigrationEvent, MIGRATION_SCHEMA};
use crate::topology::{Category, CpuTopology};
pub use chart::Chart;

/// Structured output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
}

/// Where and what to export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    /// Path prefix shared by every artifact
    pub prefix: PathBuf,
    pub formats: Vec<ExportFormat>,
    /// Write the per-dimension chart files
    pub charts: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            prefix: PathBuf::from("task_balancing"),
            formats: vec![ExportFormat::Json, ExportFormat::Csv],
            charts: true,
        }
    }
}

impl ExportConfig {
    fn path(&self, suffix: &str) -> PathBuf {
        let mut name = self.prefix.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }
}

/// Everything a finished session produced; read-only once built
#[derive(Debug, Clone)]
pub struct ExportBundle {
    pub events: Vec<MigrationEvent>,
    pub aggregates: AggregateTable,
    /// `None` when the topology query failed
    pub topology: Option<CpuTopology>,
    /// Records the probe dropped kernel-side, if it keeps count
    pub events_lost: Option<u64>,
    pub warnings: Vec<String>,
}

#[derive(Serialize)]
struct JsonDocument<'a> {
    schema: Vec<&'static str>,
    events: &'a [MigrationEvent],
    aggregates: Vec<AggregateRow>,
    counters: &'a BTreeMap<String, u64>,
    topology: Option<BTreeMap<u32, Category>>,
    ingested: u64,
    discarded_idle: u64,
    events_lost: Option<u64>,
    warnings: &'a [String],
}

/// Serialize the whole bundle as pretty-printed JSON
///
/// # Errors
/// Returns an error if serialization or the writer fails
pub fn write_json<W: Write>(bundle: &ExportBundle, mut writer: W) -> Result<(), ExportError> {
    let document = JsonDocument {
        schema: MIGRATION_SCHEMA.iter().map(|desc| desc.name).collect(),
        events: &bundle.events,
        aggregates: bundle.aggregates.rows(),
        counters: &bundle.aggregates.counters,
        topology: bundle
            .topology
            .as_ref()
            .map(|topology| topology.iter().map(|(cpu, category)| (cpu.0, category)).collect()),
        ingested: bundle.aggregates.ingested,
        discarded_idle: bundle.aggregates.discarded_idle,
        events_lost: bundle.events_lost,
        warnings: &bundle.warnings,
    };
    serde_json::to_writer_pretty(&mut writer, &document)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Write the raw migration log as CSV, one column per schema field
///
/// # Errors
/// Returns an error if the writer fails
pub fn write_events_csv<W: Write>(events: &[MigrationEvent], mut writer: W) -> Result<(), ExportError> {
    let header: Vec<&str> = MIGRATION_SCHEMA.iter().map(|desc| desc.name).collect();
    writeln!(writer, "{}", header.join(","))?;

    for event in events {
        let row: Vec<String> =
            MIGRATION_SCHEMA.iter().map(|desc| event.value(desc.field).to_string()).collect();
        writeln!(writer, "{}", row.join(","))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the flattened aggregate table as CSV
///
/// # Errors
/// Returns an error if the writer fails
pub fn write_aggregate_csv<W: Write>(table: &AggregateTable, mut writer: W) -> Result<(), ExportError> {
    writeln!(writer, "dimension,cpu,pid,count")?;
    for row in table.rows() {
        writeln!(
            writer,
            "{},{},{},{}",
            row.dimension,
            row.cpu.map(|cpu| cpu.to_string()).unwrap_or_default(),
            row.pid.map(|pid| pid.to_string()).unwrap_or_default(),
            row.count
        )?;
    }
    for (name, count) in &table.counters {
        writeln!(writer, "{name},,,{count}")?;
    }
    writer.flush()?;
    Ok(())
}

/// Kind of file an artifact is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Json,
    EventsCsv,
    AggregateCsv,
    Chart(Dimension),
}

/// Result of writing one artifact
#[derive(Debug)]
pub struct ArtifactOutcome {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub error: Option<ExportError>,
}

impl ArtifactOutcome {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Writes every configured artifact for a bundle
pub struct Exporter<'a> {
    config: &'a ExportConfig,
}

impl<'a> Exporter<'a> {
    #[must_use]
    pub fn new(config: &'a ExportConfig) -> Self {
        Self { config }
    }

    /// Write every artifact, continuing past individual failures
    #[must_use]
    pub fn write_all(&self, bundle: &ExportBundle) -> Vec<ArtifactOutcome> {
        let mut outcomes = Vec::new();

        if self.config.formats.contains(&ExportFormat::Json) {
            outcomes.push(self.write_file(ArtifactKind::Json, ".json", |w| write_json(bundle, w)));
        }
        if self.config.formats.contains(&ExportFormat::Csv) {
            outcomes.push(
                self.write_file(ArtifactKind::EventsCsv, ".csv", |w| write_events_csv(&bundle.events, w)),
            );
            outcomes.push(self.write_file(ArtifactKind::AggregateCsv, "_aggregate.csv", |w| {
                write_aggregate_csv(&bundle.aggregates, w)
            }));
        }
        if self.config.charts {
            for (dimension, table) in &bundle.aggregates.dimensions {
                if !dimension.is_per_cpu() {
                    continue;
                }
                let suffix = format!("_{}.txt", dimension.label());
                let text = Chart::build(*dimension, table, bundle.topology.as_ref())
                    .map(|chart| chart.to_text())
                    .map_err(ExportError::from);
                outcomes.push(self.write_text(ArtifactKind::Chart(*dimension), &suffix, text));
            }
        }

        outcomes
    }

    fn write_file<F>(&self, kind: ArtifactKind, suffix: &str, write: F) -> ArtifactOutcome
    where
        F: FnOnce(BufWriter<File>) -> Result<(), ExportError>,
    {
        let path = self.config.path(suffix);
        let error = create(&path).and_then(write).err();
        Self::outcome(kind, path, error)
    }

    /// Write content rendered up front; the file is left alone when rendering failed
    fn write_text(
        &self,
        kind: ArtifactKind,
        suffix: &str,
        text: Result<String, ExportError>,
    ) -> ArtifactOutcome {
        let path = self.config.path(suffix);
        let error = text
            .and_then(|text| {
                let mut writer = create(&path)?;
                writer.write_all(text.as_bytes())?;
                writer.flush()?;
                Ok(())
            })
            .err();
        Self::outcome(kind, path, error)
    }

    fn outcome(kind: ArtifactKind, path: PathBuf, error: Option<ExportError>) -> ArtifactOutcome {
        match error {
            None => info!("✓ Wrote {}", path.display()),
            Some(ref e) => warn!("Failed to export {}: {e}", path.display()),
        }
        ArtifactOutcome { kind, path, error }
    }
}

fn create(path: &Path) -> Result<BufWriter<File>, ExportError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| ExportError::WriteFailed { path: path.to_path_buf(), source })
}
