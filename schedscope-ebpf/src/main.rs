//! # eBPF Kernel-Side Instrumentation
//!
//! eBPF programs that run inside the Linux kernel to observe scheduler
//! decisions while a workload runs.
//!
//! ## Programs
//!
//! - **Return probe**: `need_active_balance_ret` - counts `need_active_balance() == 1`
//! - **Return probe**: `should_we_balance_ret` - counts `should_we_balance() == 1`
//! - **Tracepoint**: `sched_migrate_task_hook` - one record per task migration
//!
//! ## Maps (Shared with Userspace)
//!
//! - `EVENTS` - Ring buffer (4MB) of `MigrationRecord`s
//! - `RETURN_COUNTS` - Return-value hit counters
//! - `DROPPED_EVENTS` - Records that did not fit in `EVENTS`
//!
//! ## Build
//!
//! Always compiled in release mode:
//! ```bash
//! cargo xtask build-ebpf
//! ```

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use aya_ebpf::{
    bindings::BPF_NOEXIST,
    helpers::{bpf_get_smp_processor_id, bpf_ktime_get_ns},
    macros::{kretprobe, map, tracepoint},
    maps::{HashMap, RingBuf},
    programs::{RetProbeContext, TracePointContext},
};
use aya_log_ebpf::warn;
use core::{
    mem::offset_of,
    sync::atomic::{AtomicU64, Ordering},
};
use schedscope_common::{
    MigrationRecord, SchedMigrateTaskArgs, COUNTER_KEY_RETURNED_TRUE, CPU_UNKNOWN, DROPPED_KEY,
};

const PID_OFFSET: usize = offset_of!(SchedMigrateTaskArgs, pid);
const ORIG_CPU_OFFSET: usize = offset_of!(SchedMigrateTaskArgs, orig_cpu);
const DEST_CPU_OFFSET: usize = offset_of!(SchedMigrateTaskArgs, dest_cpu);

// ============================================================================
// eBPF Maps - Shared data structures between kernel and userspace
// ============================================================================

/// Ring buffer for sending migration records to userspace
///
/// - **Size**: 4MB
/// - **Usage**: Kernel writes with `EVENTS.output()`, userspace drains every tick
#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(4 * 1024 * 1024, 0);

/// Map: counter key → hits
///
/// Key `COUNTER_KEY_RETURNED_TRUE` counts how often the probed function returned 1.
#[map]
static RETURN_COUNTS: HashMap<u64, u64> = HashMap::with_max_entries(16, 0);

/// Number of migration records lost because `EVENTS` was full
#[map]
static DROPPED_EVENTS: HashMap<u32, u64> = HashMap::with_max_entries(1, 0);

// ============================================================================
// eBPF Program Hooks
// ============================================================================

/// Hook: return of `need_active_balance(struct lb_env *env)`
#[kretprobe]
pub fn need_active_balance_ret(ctx: RetProbeContext) -> u32 {
    count_returned_true(&ctx);
    0
}

/// Hook: return of `should_we_balance(struct lb_env *env)`
#[kretprobe]
pub fn should_we_balance_ret(ctx: RetProbeContext) -> u32 {
    count_returned_true(&ctx);
    0
}

fn count_returned_true(ctx: &RetProbeContext) {
    let retval: u64 = ctx.ret().unwrap_or(0);
    if retval == 1 {
        increment(&RETURN_COUNTS, COUNTER_KEY_RETURNED_TRUE);
    }
}

/// Hook: `sched/sched_migrate_task` tracepoint
/// Fires whenever the scheduler moves a task to another CPU
#[tracepoint]
pub fn sched_migrate_task_hook(ctx: TracePointContext) -> u32 {
    match try_sched_migrate_task(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_sched_migrate_task(ctx: &TracePointContext) -> Result<(), i64> {
    let pid: i32 = unsafe { ctx.read_at(PID_OFFSET)? };
    let dest_cpu: i32 = unsafe { ctx.read_at(DEST_CPU_OFFSET)? };
    let old_cpu = match unsafe { ctx.read_at::<i32>(ORIG_CPU_OFFSET) } {
        Ok(cpu) if cpu >= 0 => cpu as u32,
        _ => CPU_UNKNOWN,
    };

    let record = MigrationRecord {
        on_cpu: unsafe { bpf_get_smp_processor_id() },
        new_cpu: dest_cpu as u32,
        old_cpu,
        pid: pid as u32,
        timestamp_ns: unsafe { bpf_ktime_get_ns() },
    };

    if EVENTS.output(&record, 0).is_err() {
        increment(&DROPPED_EVENTS, DROPPED_KEY);
        warn!(ctx, "EVENTS full, dropped migration of pid {}", pid);
        return Err(1);
    }

    Ok(())
}

// Helper: atomically bump a counter map entry, seeding it on first hit
fn increment<K>(map: &HashMap<K, u64>, key: K) {
    if add_one(map, &key) {
        return;
    }
    // Another CPU may have seeded the entry first
    if map.insert(&key, &1, BPF_NOEXIST as u64).is_err() {
        add_one(map, &key);
    }
}

fn add_one<K>(map: &HashMap<K, u64>, key: &K) -> bool {
    match map.get_ptr_mut(key) {
        Some(ptr) => {
            unsafe { AtomicU64::from_ptr(ptr) }.fetch_add(1, Ordering::Relaxed);
            true
        }
        None => false,
    }
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
