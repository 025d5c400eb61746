//! CLI argument definitions

use clap::Parser;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::aggregate::Dimension;
use crate::domain::{CpuId, SessionError};
use crate::export::{ExportConfig, ExportFormat};
use crate::probe::{kernel::default_object_path, ProbeTarget};
use crate::session::{SessionConfig, WorkloadCommand};
use crate::topology::TopologyConfig;

#[derive(Parser, Debug)]
#[command(
    name = "schedscope",
    version,
    about = "Measure scheduler load-balancing activity while a workload runs",
    after_help = "\
EXAMPLES:
    sudo schedscope 'make -j16'                           Per-CPU task migrations
    sudo schedscope --probe should-we-balance -- stress-ng --cpu 8 -t 10
    sudo schedscope --user bench --group-by on-cpu,cpu-pid ./bench.sh"
)]
pub struct Args {
    /// Workload command line (run through `sh -c` unless --no-shell)
    #[arg(
        value_name = "COMMAND",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,

    /// What to instrument
    #[arg(long, value_enum, default_value = "migrate")]
    pub probe: ProbeTarget,

    /// Run the workload as this user (and its primary group)
    #[arg(long, value_name = "NAME")]
    pub user: Option<String>,

    /// Exec the command directly instead of through `sh -c`
    #[arg(long)]
    pub no_shell: bool,

    /// Path prefix for every exported artifact
    #[arg(short, long, value_name = "PREFIX", default_value = "task_balancing")]
    pub output: PathBuf,

    /// Structured record formats
    #[arg(long, value_enum, value_delimiter = ',', default_value = "json,csv")]
    pub format: Vec<ExportFormat>,

    /// Core ids below this are performance cores
    #[arg(long, value_name = "N", default_value = "8")]
    pub p_core_threshold: u32,

    /// CPU ids that are SMT siblings of performance cores
    #[arg(long, value_name = "LIST", value_delimiter = ',', default_value = "1,3,5,7,9,11,13,15")]
    pub smt_cpus: Vec<u32>,

    /// Grouping dimensions for aggregation and charts
    #[arg(long, value_enum, value_delimiter = ',', default_value = "on-cpu,new-cpu,old-cpu")]
    pub group_by: Vec<Dimension>,

    /// Drain interval in milliseconds
    #[arg(long, value_name = "MS", default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
    pub tick_ms: u64,

    /// Stop after N seconds (0 = run until the workload exits)
    #[arg(long, value_name = "SECS", default_value = "0")]
    pub duration: u64,

    /// Compiled kernel programs (defaults to the `cargo xtask build-ebpf` output)
    #[arg(long, value_name = "PATH")]
    pub bpf_object: Option<PathBuf>,

    /// Skip chart rendering
    #[arg(long)]
    pub no_chart: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// The workload as a single command line
    ///
    /// # Errors
    /// Returns [`SessionError::EmptyCommand`] if the command is blank
    pub fn workload(&self) -> Result<WorkloadCommand, SessionError> {
        let line = self.command.join(" ");
        let command =
            if self.no_shell { WorkloadCommand::direct(line)? } else { WorkloadCommand::shell(line)? };
        Ok(match self.user {
            Some(ref user) => command.as_user(user.clone()),
            None => command,
        })
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            tick: Duration::from_millis(self.tick_ms),
            max_duration: (self.duration > 0).then(|| Duration::from_secs(self.duration)),
            dimensions: self.group_by.clone(),
        }
    }

    #[must_use]
    pub fn topology_config(&self) -> TopologyConfig {
        TopologyConfig {
            performance_core_threshold: self.p_core_threshold,
            smt_siblings: self.smt_cpus.iter().copied().map(CpuId).collect::<BTreeSet<_>>(),
        }
    }

    #[must_use]
    pub fn export_config(&self) -> ExportConfig {
        ExportConfig { prefix: self.output.clone(), formats: self.format.clone(), charts: !self.no_chart }
    }

    #[must_use]
    pub fn bpf_object(&self) -> PathBuf {
        self.bpf_object.clone().unwrap_or_else(default_object_path)
    }
}
