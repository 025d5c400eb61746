//! # Measurement Session
//!
//! One [`Session`] per invocation. It attaches the probe, runs the workload,
//! drains the probe once per tick until the workload is gone, detaches, and
//! finally exports.
//!
//! ```text
//! Idle → Attaching → Running → Draining → Detaching → Exported
//!            └──────────┴─────────┴──────────┴────→ Failed
//! ```
//!
//! The probe is held through a [`ProbeGuard`], so it is detached exactly once
//! on every path out of [`Session::run`] where the attach succeeded: normal
//! exit, workload crash, interrupt, duration limit, spawn or wait failure.

pub mod drain;
pub mod workload;

use log::{debug, info, warn};
use std::fmt;
use std::future::Future;
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::process::Child;

use crate::aggregate::Dimension;
use crate::domain::{CpuId, SessionError, TopologyError};
use crate::export::{ArtifactOutcome, ExportBundle, ExportConfig, Exporter};
use crate::probe::{ProbeGuard, ProbeSource};
use crate::topology::CpuTopology;
pub use drain::{DrainLoop, DrainStats};
pub use workload::WorkloadCommand;

/// Lifecycle state of a [`Session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Attaching,
    Running,
    Draining,
    Detaching,
    Exported,
    Failed,
}

impl SessionState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Exported | Self::Failed)
    }

    /// Whether `self → next` is a legal step
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Idle, Self::Attaching)
            | (Self::Attaching, Self::Running)
            | (Self::Running, Self::Draining)
            | (Self::Draining, Self::Detaching)
            | (Self::Detaching, Self::Exported) => true,
            (from, Self::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Why the running phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    WorkloadExited,
    Interrupted,
    DurationLimit,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WorkloadExited => "workload exited",
            Self::Interrupted => "interrupted",
            Self::DurationLimit => "duration limit reached",
        })
    }
}

/// Session tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Bounded wait on the workload between drains
    pub tick: Duration,
    /// Stop the workload after this long (`None` = run to completion)
    pub max_duration: Option<Duration>,
    pub dimensions: Vec<Dimension>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { tick: Duration::from_millis(1), max_duration: None, dimensions: vec![Dimension::OnCpu] }
    }
}

/// What the run phase observed
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub exit_reason: ExitReason,
    /// `None` if the workload could not be reaped
    pub exit_status: Option<ExitStatus>,
    pub elapsed: Duration,
    pub events_lost: Option<u64>,
    pub stats: DrainStats,
}

/// Output of the export phase
#[derive(Debug)]
pub struct SessionReport {
    pub bundle: ExportBundle,
    pub outcomes: Vec<ArtifactOutcome>,
    /// Bundle warnings plus export failures
    pub warnings: Vec<String>,
}

/// A single measurement session
pub struct Session {
    command: WorkloadCommand,
    config: SessionConfig,
    state: SessionState,
    history: Vec<SessionState>,
    started_at: Option<Instant>,
    drained: Option<(DrainLoop, Option<u64>)>,
}

impl Session {
    #[must_use]
    pub fn new(command: WorkloadCommand, config: SessionConfig) -> Self {
        Self {
            command,
            config,
            state: SessionState::Idle,
            history: vec![SessionState::Idle],
            started_at: None,
            drained: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state the session has been in, oldest first
    #[must_use]
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    #[must_use]
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    #[must_use]
    pub fn command(&self) -> &WorkloadCommand {
        &self.command
    }

    fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition { from: self.state, to: next });
        }
        debug!("Session {:?} -> {next:?}", self.state);
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Failed;
            self.history.push(SessionState::Failed);
        }
    }

    /// Attach `probe`, run the workload to completion (or until `interrupt`
    /// resolves, or the duration limit), then drain and detach
    ///
    /// # Errors
    /// - [`SessionError::Attach`] if the probe cannot be attached (no workload is spawned)
    /// - [`SessionError::WorkloadSpawn`] if the workload cannot be started (probe already detached)
    /// - [`SessionError::Wait`] if the workload cannot be waited on (probe already detached)
    /// - [`SessionError::InvalidTransition`] if the session already ran
    pub async fn run<P, F>(&mut self, probe: &mut P, interrupt: F) -> Result<RunSummary, SessionError>
    where
        P: ProbeSource,
        F: Future<Output = ()>,
    {
        self.transition(SessionState::Attaching)?;
        let mut guard = match ProbeGuard::attach(probe) {
            Ok(guard) => guard,
            Err(e) => {
                self.fail();
                return Err(SessionError::Attach(e));
            }
        };

        let mut child = match self.command.spawn() {
            Ok(child) => child,
            Err(e) => {
                guard.release();
                self.fail();
                return Err(e);
            }
        };
        let started_at = Instant::now();
        self.started_at = Some(started_at);
        info!("Started workload (pid {}): {}", child.id().unwrap_or(0), self.command.line());
        self.transition(SessionState::Running)?;

        let deadline = self.config.max_duration.map(|limit| started_at + limit);
        let mut drain = DrainLoop::new(&self.config.dimensions);
        tokio::pin!(interrupt);

        let (exit_reason, exit_status) = loop {
            drain.tick(&mut guard);

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break (ExitReason::DurationLimit, stop_workload(&mut child).await);
            }

            tokio::select! {
                waited = tokio::time::timeout(self.config.tick, child.wait()) => match waited {
                    Ok(Ok(status)) => break (ExitReason::WorkloadExited, Some(status)),
                    Ok(Err(e)) => {
                        guard.release();
                        self.fail();
                        return Err(SessionError::Wait(e));
                    }
                    Err(_) => {}
                },
                () = &mut interrupt => {
                    break (ExitReason::Interrupted, stop_workload(&mut child).await);
                }
            }
        };
        let elapsed = started_at.elapsed();
        info!("Workload finished after {:.3}s: {exit_reason}", elapsed.as_secs_f64());

        self.transition(SessionState::Draining)?;
        drain.tick(&mut guard);
        let events_lost = guard.lost_events();

        self.transition(SessionState::Detaching)?;
        guard.release();

        let stats = drain.stats().clone();
        self.drained = Some((drain, events_lost));

        Ok(RunSummary { exit_reason, exit_status, elapsed, events_lost, stats })
    }

    /// Aggregate, attach the topology, and write every artifact
    ///
    /// A missing topology or a CPU it cannot classify only costs the charts;
    /// the structured records are written regardless.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidTransition`] unless the run phase
    /// completed
    pub fn export(
        &mut self,
        topology: Result<CpuTopology, TopologyError>,
        config: &ExportConfig,
    ) -> Result<SessionReport, SessionError> {
        if !self.state.can_transition_to(SessionState::Exported) {
            return Err(SessionError::InvalidTransition { from: self.state, to: SessionState::Exported });
        }
        let Some((drain, events_lost)) = self.drained.take() else {
            return Err(SessionError::InvalidTransition { from: self.state, to: SessionState::Exported });
        };

        let (engine, stats) = drain.into_parts();
        let (events, aggregates) = engine.finish();
        let mut warnings = Vec::new();

        if stats.drain_errors > 0 {
            warnings.push(format!(
                "{} drain error(s), last: {}",
                stats.drain_errors,
                stats.last_error.as_deref().unwrap_or("unknown")
            ));
        }
        if stats.counter_errors > 0 {
            warnings.push(format!(
                "{} counter read error(s), last: {}",
                stats.counter_errors,
                stats.last_error.as_deref().unwrap_or("unknown")
            ));
        }
        if stats.decode_failures > 0 {
            warnings.push(format!("{} record(s) could not be decoded", stats.decode_failures));
        }
        if let Some(lost) = events_lost.filter(|lost| *lost > 0) {
            warnings.push(format!("{lost} event(s) lost in the kernel ring buffer"));
        }

        let topology = match topology {
            Ok(topology) => {
                let seen = events.iter().flat_map(|event| {
                    [Some(event.on_cpu), Some(event.new_cpu), event.old_cpu].into_iter().flatten()
                });
                let unknown: Vec<CpuId> = topology.unknown_cpus(seen);
                if !unknown.is_empty() {
                    let cpus: Vec<String> = unknown.iter().map(ToString::to_string).collect();
                    warnings.push(format!(
                        "classification mismatch: {} absent from the CPU topology",
                        cpus.join(", ")
                    ));
                }
                Some(topology)
            }
            Err(e) => {
                warnings.push(e.to_string());
                None
            }
        };

        for warning in &warnings {
            warn!("{warning}");
        }

        let bundle = ExportBundle { events, aggregates, topology, events_lost, warnings };
        let outcomes = Exporter::new(config).write_all(&bundle);

        let mut warnings = bundle.warnings.clone();
        warnings.extend(outcomes.iter().filter_map(|outcome| {
            outcome.error.as_ref().map(|e| format!("{}: {e}", outcome.path.display()))
        }));

        self.transition(SessionState::Exported)?;
        Ok(SessionReport { bundle, outcomes, warnings })
    }
}

/// Kill the workload and reap it
async fn stop_workload(child: &mut Child) -> Option<ExitStatus> {
    if let Err(e) = child.start_kill() {
        debug!("Workload already gone: {e}");
    }
    match child.wait().await {
        Ok(status) => Some(status),
        Err(e) => {
            warn!("Failed to reap workload: {e}");
            None
        }
    }
}
