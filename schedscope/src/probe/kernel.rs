//! # eBPF Probe Loading and Attachment
//!
//! Loads the compiled `schedscope-ebpf` object and attaches the one program
//! the session's [`ProbeTarget`] needs.
//!
//! ## Attachment Points
//!
//! - **Kretprobe**: `need_active_balance`, `should_we_balance` (return value == 1 counters)
//! - **Tracepoint**: `sched/sched_migrate_task` (migration records via `EVENTS` ring buffer)

use aya::{
    maps::{HashMap, MapData, MapError, RingBuf},
    programs::{
        kprobe::KProbeLinkId, trace_point::TracePointLinkId, KProbe, ProgramError, TracePoint,
    },
    Ebpf,
};
use aya_log::EbpfLogger;
use log::{debug, warn};
use std::path::{Path, PathBuf};

use schedscope_common::{DROPPED_KEY, DROPPED_MAP, EVENTS_MAP, RETURN_COUNTS_MAP};

use super::{ProbeSource, ProbeTarget};
use crate::domain::ProbeError;
use crate::record::CounterKind;

/// Default location of the object built by `cargo xtask build-ebpf`
#[must_use]
pub fn default_object_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../target/bpfel-unknown-none/release/schedscope")
}

enum ProbeLink {
    KProbe(KProbeLinkId),
    TracePoint(TracePointLinkId),
}

/// Kernel-backed [`ProbeSource`]
pub struct KernelProbe {
    bpf: Ebpf,
    target: ProbeTarget,
    link: Option<ProbeLink>,
    ring_buf: Option<RingBuf<MapData>>,
}

impl KernelProbe {
    /// Load the eBPF object at `path` without attaching anything
    ///
    /// # Errors
    /// Returns [`ProbeError::LoadFailed`] if the object is missing or rejected
    pub fn load(path: &Path, target: ProbeTarget) -> Result<Self, ProbeError> {
        let mut bpf = Ebpf::load_file(path)
            .map_err(|e| ProbeError::LoadFailed(format!("{}: {e}", path.display())))?;

        if let Err(e) = EbpfLogger::init(&mut bpf) {
            // Programs without log statements have no logger map
            debug!("eBPF logger not initialized: {e}");
        }

        Ok(Self { bpf, target, link: None, ring_buf: None })
    }

    fn attach_failed(&self, error: &ProgramError) -> ProbeError {
        ProbeError::AttachFailed {
            probe: self.target.program().to_string(),
            target: self.target.symbol().to_string(),
            error: error.to_string(),
        }
    }

    fn attach_kretprobe(&mut self) -> Result<ProbeLink, ProgramError> {
        let program: &mut KProbe = self
            .bpf
            .program_mut(self.target.program())
            .ok_or(ProgramError::UnexpectedProgramType)?
            .try_into()?;
        program.load()?;
        let link = program.attach(self.target.symbol(), 0)?;
        Ok(ProbeLink::KProbe(link))
    }

    fn attach_tracepoint(&mut self) -> Result<ProbeLink, ProgramError> {
        let program: &mut TracePoint = self
            .bpf
            .program_mut(self.target.program())
            .ok_or(ProgramError::UnexpectedProgramType)?
            .try_into()?;
        program.load()?;
        let link = program.attach("sched", self.target.symbol())?;
        Ok(ProbeLink::TracePoint(link))
    }

    fn detach_link(&mut self, link: ProbeLink) -> Result<(), ProgramError> {
        let program = self
            .bpf
            .program_mut(self.target.program())
            .ok_or(ProgramError::UnexpectedProgramType)?;
        match link {
            ProbeLink::KProbe(id) => {
                let program: &mut KProbe = program.try_into()?;
                program.detach(id)
            }
            ProbeLink::TracePoint(id) => {
                let program: &mut TracePoint = program.try_into()?;
                program.detach(id)
            }
        }
    }
}

impl ProbeSource for KernelProbe {
    fn target(&self) -> ProbeTarget {
        self.target
    }

    fn attach(&mut self) -> Result<(), ProbeError> {
        let link = match self.target {
            ProbeTarget::Migrate => self.attach_tracepoint(),
            ProbeTarget::NeedActiveBalance | ProbeTarget::ShouldWeBalance => {
                self.attach_kretprobe()
            }
        }
        .map_err(|e| self.attach_failed(&e))?;
        self.link = Some(link);

        if self.target == ProbeTarget::Migrate {
            let map = self.bpf.take_map(EVENTS_MAP).ok_or_else(|| {
                ProbeError::LoadFailed(format!("{EVENTS_MAP} map not found"))
            });
            match map.and_then(|map| {
                RingBuf::try_from(map).map_err(|e| ProbeError::LoadFailed(e.to_string()))
            }) {
                Ok(ring_buf) => self.ring_buf = Some(ring_buf),
                Err(e) => {
                    // Attached but unreadable: undo before surfacing
                    self.detach();
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    fn detach(&mut self) {
        if let Some(link) = self.link.take() {
            if let Err(e) = self.detach_link(link) {
                warn!("Failed to detach {}: {e}", self.target.program());
            }
        }
    }

    fn drain(&mut self, sink: &mut dyn FnMut(&[u8])) -> Result<usize, ProbeError> {
        if self.link.is_none() {
            return Err(ProbeError::NotAttached);
        }
        let Some(ring_buf) = self.ring_buf.as_mut() else {
            // Counting probes have no record stream
            return Ok(0);
        };

        let mut drained = 0;
        while let Some(item) = ring_buf.next() {
            let bytes: &[u8] = &item;
            sink(bytes);
            drained += 1;
        }
        Ok(drained)
    }

    fn read_counter(&mut self, kind: CounterKind) -> Result<u64, ProbeError> {
        let map = self
            .bpf
            .map(RETURN_COUNTS_MAP)
            .ok_or_else(|| {
                ProbeError::CounterUnavailable(format!("{RETURN_COUNTS_MAP} map not found"))
            })?;
        let counts: HashMap<_, u64, u64> = HashMap::try_from(map)
            .map_err(|e| ProbeError::CounterUnavailable(e.to_string()))?;

        match counts.get(&kind.key(), 0) {
            Ok(count) => Ok(count),
            // No hit yet: the kernel side creates the entry lazily
            Err(MapError::KeyNotFound) => Ok(0),
            Err(e) => Err(ProbeError::CounterUnavailable(e.to_string())),
        }
    }

    fn lost_events(&mut self) -> Option<u64> {
        let dropped: HashMap<_, u32, u64> = HashMap::try_from(self.bpf.map(DROPPED_MAP)?).ok()?;
        match dropped.get(&DROPPED_KEY, 0) {
            Ok(count) => Some(count),
            Err(MapError::KeyNotFound) => Some(0),
            Err(e) => {
                warn!("Failed to read {DROPPED_MAP}: {e}");
                None
            }
        }
    }
}
