//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent passing a PID where a CPU id is expected
//! and keep the "unknown CPU" sentinel from leaking past the decode step.

use serde::Serialize;
use std::fmt;

use schedscope_common::CPU_UNKNOWN;

/// CPU ID
///
/// Represents a logical CPU (0, 1, 2, ...), as numbered by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CpuId(pub u32);

impl CpuId {
    /// Decode a raw kernel CPU field, mapping the unknown sentinel to `None`
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        (raw != CPU_UNKNOWN).then_some(Self(raw))
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU:{}", self.0)
    }
}

/// Process ID
///
/// `Pid(0)` is the idle task; records carrying it are never aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl Pid {
    /// Returns true if this is the "no real task" sentinel
    #[must_use]
    pub fn is_idle(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

/// Timestamp in nanoseconds
///
/// Represents an absolute point in time as nanoseconds since boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Convert to seconds (f64)
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_seconds())
    }
}
