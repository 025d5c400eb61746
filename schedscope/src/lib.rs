//! # schedscope - eBPF-based Scheduler Load-Balancing Measurement
//!
//! schedscope runs a workload under kernel instrumentation and reports how the
//! scheduler moved work between CPUs while it ran: per-CPU task migration
//! counts, or how often a load-balancing decision function returned "yes".
//! Results are broken down by CPU category (performance core, SMT sibling,
//! efficiency core) on hybrid machines.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 eBPF Programs (Kernel)                       │
//! │  • Tracepoint: sched/sched_migrate_task → EVENTS ring buffer │
//! │  • Kretprobes: need_active_balance, should_we_balance        │
//! │    → RETURN_COUNTS[1]                                        │
//! └──────────────────────────┬───────────────────────────────────┘
//!                            │ ring buffer / counter map
//!                            ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Session: attach → spawn workload → drain every tick →       │
//! │           final drain → detach → classify → export           │
//! │                                                              │
//! │  ┌────────────┐   ┌─────────────┐   ┌────────────────────┐  │
//! │  │   probe    │──▶│  aggregate  │──▶│ export (json, csv, │  │
//! │  │ (aya, RB)  │   │  (buckets)  │   │   charts)          │  │
//! │  └────────────┘   └─────────────┘   └────────────────────┘  │
//! │                                            ▲                 │
//! │                        topology (lscpu / sysfs)              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`probe`]: the [`probe::ProbeSource`] seam, the aya-backed kernel probe
//!   and a scripted in-memory probe; [`probe::ProbeGuard`] detaches exactly once
//! - [`record`]: the migration record schema, decoding, counter events
//! - [`session`]: lifecycle state machine, drain loop, workload spawning
//! - [`aggregate`]: per-dimension bucket counts and the raw migration log
//! - [`topology`]: CPU → category classification from `lscpu` or sysfs
//! - [`export`]: JSON/CSV writers and categorized bar charts
//! - [`cli`], [`preflight`], [`summary`]: the command-line front end
//! - [`domain`]: newtypes (`CpuId`, `Pid`, `Timestamp`) and error enums
//!
//! ## Typical Usage
//!
//! ```bash
//! # Per-CPU migrations while a build runs
//! sudo ./schedscope 'make -j16'
//!
//! # How often should_we_balance() said yes, workload as an unprivileged user
//! sudo ./schedscope --probe should-we-balance --user bench ./bench.sh
//! ```

pub mod aggregate;
pub mod cli;
pub mod domain;
pub mod export;
pub mod preflight;
pub mod probe;
pub mod record;
pub mod session;
pub mod summary;
pub mod topology;
