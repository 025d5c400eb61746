//! Host topology queries
//!
//! `lscpu -e=CPU,CORE,ONLINE` is asked first; if it is missing or fails,
//! the same triples are read from `/sys/devices/system/cpu`.

use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::domain::{CpuId, TopologyError};

/// One logical CPU as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuEntry {
    pub cpu: CpuId,
    pub core: u32,
    pub online: bool,
}

/// Source of `(cpu, core, online)` triples
pub trait TopologyQuery {
    /// # Errors
    /// Returns [`TopologyError`] if the host cannot be queried
    fn list_cpus(&self) -> Result<Vec<CpuEntry>, TopologyError>;
}

/// Queries `lscpu -e=CPU,CORE,ONLINE`
#[derive(Debug, Default, Clone, Copy)]
pub struct LscpuQuery;

impl TopologyQuery for LscpuQuery {
    fn list_cpus(&self) -> Result<Vec<CpuEntry>, TopologyError> {
        let output = Command::new("lscpu")
            .arg("-e=CPU,CORE,ONLINE")
            .output()
            .map_err(|e| TopologyError::Unavailable(format!("failed to run lscpu: {e}")))?;

        if !output.status.success() {
            return Err(TopologyError::Unavailable(format!("lscpu exited with {}", output.status)));
        }

        parse_lscpu(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `lscpu -e=CPU,CORE,ONLINE` output (header line included)
///
/// Offline CPUs may report `-` as their core and are kept as offline entries.
///
/// # Errors
/// Returns [`TopologyError::Parse`] on a malformed line
pub fn parse_lscpu(output: &str) -> Result<Vec<CpuEntry>, TopologyError> {
    let mut entries = Vec::new();

    for line in output.lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let [cpu, core, online] = fields.as_slice() else {
            return Err(TopologyError::Parse(line.to_string()));
        };

        let online = online.eq_ignore_ascii_case("yes");
        let cpu: u32 = cpu.parse().map_err(|_| TopologyError::Parse(line.to_string()))?;
        let core: u32 = if online {
            core.parse().map_err(|_| TopologyError::Parse(line.to_string()))?
        } else {
            core.parse().unwrap_or(u32::MAX)
        };

        entries.push(CpuEntry { cpu: CpuId(cpu), core, online });
    }

    Ok(entries)
}

/// Reads `/sys/devices/system/cpu/online` and each CPU's `topology/core_id`
#[derive(Debug, Clone)]
pub struct SysfsQuery {
    root: PathBuf,
}

impl Default for SysfsQuery {
    fn default() -> Self {
        Self { root: PathBuf::from("/sys/devices/system/cpu") }
    }
}

impl SysfsQuery {
    /// Query a sysfs-shaped tree rooted somewhere else
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TopologyQuery for SysfsQuery {
    fn list_cpus(&self) -> Result<Vec<CpuEntry>, TopologyError> {
        let online = read_trimmed(&self.root.join("online"))?;
        let cpus = parse_cpu_list(&online)?;

        cpus.into_iter()
            .map(|cpu| {
                let core_path = self.root.join(format!("cpu{}/topology/core_id", cpu.0));
                let core = read_trimmed(&core_path)?;
                let core = core.parse().map_err(|_| TopologyError::Parse(core.clone()))?;
                Ok(CpuEntry { cpu, core, online: true })
            })
            .collect()
    }
}

fn read_trimmed(path: &Path) -> Result<String, TopologyError> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| TopologyError::Unavailable(format!("failed to read {}: {e}", path.display())))
}

/// Parse a kernel CPU list like `"0-3"` or `"0-3,8-11,14"`
///
/// # Errors
/// Returns [`TopologyError::Parse`] on a malformed range
pub fn parse_cpu_list(content: &str) -> Result<Vec<CpuId>, TopologyError> {
    let parse = |s: &str| s.parse::<u32>().map_err(|_| TopologyError::Parse(content.to_string()));
    let mut cpus = Vec::new();

    for range in content.trim().split(',').filter(|r| !r.is_empty()) {
        if let Some((start, end)) = range.split_once('-') {
            // Range like "0-3"
            for cpu in parse(start)?..=parse(end)? {
                cpus.push(CpuId(cpu));
            }
        } else {
            // Single CPU like "5"
            cpus.push(CpuId(parse(range)?));
        }
    }

    Ok(cpus)
}

/// Tries `primary`, falling back to `fallback` when it fails
#[derive(Debug, Clone, Default)]
pub struct FallbackQuery<P, F> {
    pub primary: P,
    pub fallback: F,
}

impl<P: TopologyQuery, F: TopologyQuery> TopologyQuery for FallbackQuery<P, F> {
    fn list_cpus(&self) -> Result<Vec<CpuEntry>, TopologyError> {
        match self.primary.list_cpus() {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!("Primary topology query failed ({e}), trying fallback");
                let entries = self.fallback.list_cpus()?;
                debug!("Fallback topology query returned {} CPUs", entries.len());
                Ok(entries)
            }
        }
    }
}

/// The default host query: lscpu, then sysfs
pub type HostQuery = FallbackQuery<LscpuQuery, SysfsQuery>;
