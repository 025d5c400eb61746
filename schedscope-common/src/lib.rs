//! # Shared Data Structures (eBPF ↔ Userspace)
//!
//! Defines the records, map names and program names shared between the
//! kernel-side probes and the userspace session. All record types use
//! `#[repr(C)]` for a consistent layout across the kernel/userspace boundary.
//!
//! ## Probes
//!
//! 1. **Return counters** - `need_active_balance` / `should_we_balance`
//!    return probes count how often the function returned `1`
//! 2. **Migrations** - `sched/sched_migrate_task` emits one
//!    [`MigrationRecord`] per task migration through the `EVENTS` ring buffer

#![no_std]

// ============================================================================
// Sentinels and keys
// ============================================================================

/// Reserved CPU id written when the kernel-side read of a CPU field failed.
///
/// Userspace treats it as missing data, never as a CPU id.
pub const CPU_UNKNOWN: u32 = u32::MAX;

/// Key in `RETURN_COUNTS` under which "returned 1" hits are counted
pub const COUNTER_KEY_RETURNED_TRUE: u64 = 1;

/// Key in `DROPPED_EVENTS` counting failed ring buffer writes
pub const DROPPED_KEY: u32 = 0;

// ============================================================================
// Map and program names
// ============================================================================

/// Ring buffer carrying [`MigrationRecord`]s
pub const EVENTS_MAP: &str = "EVENTS";

/// `HashMap<u64, u64>` of return-value hit counters
pub const RETURN_COUNTS_MAP: &str = "RETURN_COUNTS";

/// `HashMap<u32, u64>` counting records the kernel could not enqueue
pub const DROPPED_MAP: &str = "DROPPED_EVENTS";

/// Return probe on `need_active_balance`
pub const PROG_NEED_ACTIVE_BALANCE: &str = "need_active_balance_ret";

/// Return probe on `should_we_balance`
pub const PROG_SHOULD_WE_BALANCE: &str = "should_we_balance_ret";

/// Tracepoint program on `sched/sched_migrate_task`
pub const PROG_SCHED_MIGRATE_TASK: &str = "sched_migrate_task_hook";

// ============================================================================
// Shared Data Structures
// ============================================================================

/// One task migration, sent from eBPF to userspace via ring buffer
///
/// **Memory Layout**: `#[repr(C)]`, 24 bytes, no interior padding. Userspace
/// decodes it field by field from its declared schema, so the offsets here
/// are part of the wire contract.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MigrationRecord {
    /// CPU the probe fired on (`bpf_get_smp_processor_id()`)
    pub on_cpu: u32,

    /// Destination CPU of the migration
    pub new_cpu: u32,

    /// Source CPU, or [`CPU_UNKNOWN`] if it could not be read
    pub old_cpu: u32,

    /// PID of the migrated task (0 = idle/no real task, discarded)
    pub pid: u32,

    /// Timestamp in nanoseconds (from `bpf_ktime_get_ns()`)
    ///
    /// Monotonic clock, relative to boot.
    pub timestamp_ns: u64,
}

/// Tracepoint arguments for `sched/sched_migrate_task`
///
/// Only used for its field offsets. Layout defined by the Linux kernel
/// tracepoint ABI:
/// `/sys/kernel/debug/tracing/events/sched/sched_migrate_task/format`
#[repr(C)]
pub struct SchedMigrateTaskArgs {
    /// Unused padding (kernel tracepoint common fields)
    #[allow(clippy::pub_underscore_fields)]
    pub __unused__: u64,

    /// Command name of the migrated task
    pub comm: [u8; 16],

    /// PID of the migrated task
    pub pid: i32,

    /// Priority of the migrated task
    pub prio: i32,

    /// CPU the task is leaving
    pub orig_cpu: i32,

    /// CPU the task is moving to
    pub dest_cpu: i32,
}
