//! # Probe Sources
//!
//! A [`ProbeSource`] is the kernel instrumentation seen from userspace:
//! attach it, drain the records it buffered, read its counters, detach it.
//! The session never touches kernel programs directly.
//!
//! ## Implementations
//!
//! - [`kernel::KernelProbe`]: aya-loaded eBPF programs (return probes and the
//!   `sched_migrate_task` tracepoint)
//! - [`scripted::ScriptedProbe`]: in-memory source with injectable failures,
//!   used by tests and dry runs
//!
//! ## Scoped acquisition
//!
//! [`ProbeGuard`] is the only way the session holds an attached probe. It
//! detaches exactly once: on [`ProbeGuard::release`] or, failing that, on drop.

pub mod kernel;
pub mod scripted;

use clap::ValueEnum;
use log::{debug, info};

use schedscope_common::{PROG_NEED_ACTIVE_BALANCE, PROG_SCHED_MIGRATE_TASK, PROG_SHOULD_WE_BALANCE};

use crate::domain::ProbeError;
use crate::record::CounterKind;

/// What the session instruments
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProbeTarget {
    /// Record every task migration
    Migrate,
    /// Count `need_active_balance()` returning 1
    NeedActiveBalance,
    /// Count `should_we_balance()` returning 1
    ShouldWeBalance,
}

impl ProbeTarget {
    /// Kernel symbol or tracepoint the probe attaches to
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Migrate => "sched_migrate_task",
            Self::NeedActiveBalance => "need_active_balance",
            Self::ShouldWeBalance => "should_we_balance",
        }
    }

    /// eBPF program implementing the probe
    #[must_use]
    pub const fn program(self) -> &'static str {
        match self {
            Self::Migrate => PROG_SCHED_MIGRATE_TASK,
            Self::NeedActiveBalance => PROG_NEED_ACTIVE_BALANCE,
            Self::ShouldWeBalance => PROG_SHOULD_WE_BALANCE,
        }
    }

    /// Counter the probe maintains, if it is a counting probe
    #[must_use]
    pub const fn counter(self) -> Option<CounterKind> {
        match self {
            Self::Migrate => None,
            Self::NeedActiveBalance | Self::ShouldWeBalance => Some(CounterKind::ReturnedTrue),
        }
    }

    /// True if the probe is a kernel-function return probe (needs the symbol in kallsyms)
    #[must_use]
    pub const fn is_return_probe(self) -> bool {
        self.counter().is_some()
    }
}

/// Kernel instrumentation as consumed by the session
pub trait ProbeSource {
    fn target(&self) -> ProbeTarget;

    /// Attach to the kernel hook point
    ///
    /// # Errors
    /// Returns [`ProbeError::AttachFailed`] if the symbol is missing or
    /// privileges are insufficient
    fn attach(&mut self) -> Result<(), ProbeError>;

    /// Detach from the kernel hook point; failures are logged, not returned
    fn detach(&mut self);

    /// Hand every record buffered since the last drain to `sink`
    ///
    /// # Errors
    /// Returns [`ProbeError`] if the buffer cannot be read
    fn drain(&mut self, sink: &mut dyn FnMut(&[u8])) -> Result<usize, ProbeError>;

    /// Current (monotonic) value of a probe-held counter
    ///
    /// # Errors
    /// Returns [`ProbeError::CounterUnavailable`] if the counter map is missing
    fn read_counter(&mut self, kind: CounterKind) -> Result<u64, ProbeError>;

    /// Records lost kernel-side, if the source keeps a drop counter
    fn lost_events(&mut self) -> Option<u64>;
}

/// An attached probe that detaches exactly once
pub struct ProbeGuard<'p, P: ProbeSource> {
    probe: &'p mut P,
    attached: bool,
}

impl<'p, P: ProbeSource> ProbeGuard<'p, P> {
    /// Attach `probe`; nothing needs releasing if this fails
    ///
    /// # Errors
    /// Propagates the probe's attach error
    pub fn attach(probe: &'p mut P) -> Result<Self, ProbeError> {
        probe.attach()?;
        info!("✓ Attached probe: {}", probe.target().symbol());
        Ok(Self { probe, attached: true })
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    #[must_use]
    pub fn target(&self) -> ProbeTarget {
        self.probe.target()
    }

    /// Detach now; later calls (and the drop) are no-ops
    pub fn release(&mut self) {
        if self.attached {
            self.attached = false;
            self.probe.detach();
            info!("✓ Detached probe: {}", self.probe.target().symbol());
        }
    }

    /// # Errors
    /// Returns [`ProbeError::NotAttached`] after release
    pub fn drain(&mut self, sink: &mut dyn FnMut(&[u8])) -> Result<usize, ProbeError> {
        if !self.attached {
            return Err(ProbeError::NotAttached);
        }
        self.probe.drain(sink)
    }

    /// # Errors
    /// Returns [`ProbeError::NotAttached`] after release
    pub fn read_counter(&mut self, kind: CounterKind) -> Result<u64, ProbeError> {
        if !self.attached {
            return Err(ProbeError::NotAttached);
        }
        self.probe.read_counter(kind)
    }

    pub fn lost_events(&mut self) -> Option<u64> {
        self.probe.lost_events()
    }
}

impl<P: ProbeSource> Drop for ProbeGuard<'_, P> {
    fn drop(&mut self) {
        if self.attached {
            debug!("Probe guard dropped while attached, detaching");
        }
        self.release();
    }
}
