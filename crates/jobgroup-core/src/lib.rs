//! jobgroup-core: shared types and errors for jobgroup
//!
//! This crate provides the foundational types used by the other jobgroup crates:
//! - Error taxonomy and Result alias
//! - Limit descriptors (working set, job memory ceiling, CPU rate)
//! - Serializable limit configuration
//! - Utility functions (memory size parsing)

pub mod config;
pub mod error;
pub mod limits;
pub mod util;

pub use config::LimitsConfig;
pub use error::{JobError, LimitKind, OsError, Result, TerminationFailed};
pub use limits::{CpuRateControl, CpuRateFlags, ExtendedLimits, LimitFlags, MemoryLimits};
