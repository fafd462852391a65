//! jobgroup: govern a group of processes as one unit
//!
//! Wraps a Windows job object in a [`ResourceGroup`] that enforces aggregate
//! limits on its members and kills all of them when it is released, and a
//! [`ConfinedProcessLauncher`] that starts processes directly inside a group.
//!
//! # Limits
//!
//! - **Working set**: per-process resident memory range (both bounds required)
//! - **Job memory**: committed memory ceiling for the whole group
//! - **CPU rate**: hard cap as a fraction of total CPU time
//!
//! # Example
//!
//! ```ignore
//! use jobgroup::{ConfinedProcessLauncher, ResourceGroupBuilder};
//!
//! let group = ResourceGroupBuilder::new()
//!     .max_job_memory_str("256M")?
//!     .cpu_rate(0.5)
//!     .build()?;
//!
//! let launcher = ConfinedProcessLauncher::new();
//! let child = launcher.launch(r"C:\tools\worker.exe", &["--once"], None, Some(&group))?;
//! println!("Started pid {}", child.id());
//!
//! // Dropping the group terminates the worker and anything it spawned
//! drop(group);
//! ```

pub mod group;
pub mod launcher;
pub mod process;

// Re-export sub-crate types for convenience
pub use jobgroup_core::{
    self as core, util, CpuRateControl, ExtendedLimits, JobError, LimitFlags, LimitKind,
    LimitsConfig, MemoryLimits, OsError, Result, TerminationFailed,
};
pub use jobgroup_sys::{self as sys, Handle, JobApi, NativeJobApi};

pub use group::{ResourceGroup, ResourceGroupBuilder};
pub use launcher::{command_line, creation_flags, ConfinedProcessLauncher, LaunchConfig};
pub use process::ConfinedProcess;
