//! Domain model for schedscope
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{CpuId, Pid, Timestamp};

pub use errors::{
    ClassificationError, DecodeError, ExportError, ProbeError, SessionError, TopologyError,
};
