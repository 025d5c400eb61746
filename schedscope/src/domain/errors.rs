//! Structured error types for schedscope
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::path::PathBuf;
use thiserror::Error;

use super::types::CpuId;
use crate::session::SessionState;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to load eBPF program: {0}")]
    LoadFailed(String),

    #[error("Failed to attach {probe} to {target}: {error}")]
    AttachFailed { probe: String, target: String, error: String },

    #[error("Probe is not attached")]
    NotAttached,

    #[error("Failed to drain probe buffer: {0}")]
    DrainFailed(String),

    #[error("Counter {0} unavailable")]
    CounterUnavailable(String),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Missing required argument: workload command is empty")]
    EmptyCommand,

    #[error("Probe attach failed: {0}")]
    Attach(#[source] ProbeError),

    #[error("Failed to spawn workload `{command}`: {reason}")]
    WorkloadSpawn { command: String, reason: String },

    #[error("Invalid session transition {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("Failed to wait for workload: {0}")]
    Wait(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("CPU topology unavailable: {0}")]
    Unavailable(String),

    #[error("CPU topology unavailable: no online CPUs reported")]
    NoOnlineCpus,

    #[error("Unparseable topology line: {0:?}")]
    Parse(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassificationError {
    #[error("{0} is absent from the CPU topology")]
    UnknownCpu(CpuId),

    #[error("CPU topology unavailable, categorized chart skipped")]
    NoTopology,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Classification(#[from] ClassificationError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated record: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}
