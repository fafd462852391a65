//! The platform boundary
//!
//! `JobApi` is the narrow set of kernel calls the resource group and launcher
//! are built on. Each method maps to one OS call (or a fixed pair of them) and
//! reports failure as the raw [`OsError`].

use std::ops::BitOr;
use std::path::PathBuf;
use std::time::Duration;

use jobgroup_core::{CpuRateControl, ExtendedLimits, OsError};

use crate::handle::Handle;

/// Result of a single platform call
pub type OsResult<T> = std::result::Result<T, OsError>;

/// Process creation flags (`CREATE_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CreationFlags(u32);

impl CreationFlags {
    pub const SUSPENDED: CreationFlags = CreationFlags(0x0000_0004);
    pub const BREAKAWAY_FROM_JOB: CreationFlags = CreationFlags(0x0100_0000);
    pub const NO_WINDOW: CreationFlags = CreationFlags(0x0800_0000);

    pub const fn empty() -> Self {
        CreationFlags(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: CreationFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CreationFlags {
    type Output = CreationFlags;

    fn bitor(self, rhs: CreationFlags) -> CreationFlags {
        CreationFlags(self.0 | rhs.0)
    }
}

/// Everything `create_process` needs to start a child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateProcessRequest {
    /// Full command line, program first
    pub command_line: String,
    pub working_dir: Option<PathBuf>,
    pub flags: CreationFlags,
}

/// Handles and ids of a freshly created process.
///
/// The caller owns both handles and must close them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInformation {
    pub process: Handle,
    pub thread: Handle,
    pub pid: u32,
}

/// Kernel primitives for job objects and processes
pub trait JobApi: Clone {
    /// Create an anonymous job, or a named one that must not already exist
    fn create_job(&self, name: Option<&str>) -> OsResult<Handle>;

    /// Replace the job's extended limit descriptor
    fn set_extended_limits(&self, job: Handle, limits: &ExtendedLimits) -> OsResult<()>;

    fn query_extended_limits(&self, job: Handle) -> OsResult<ExtendedLimits>;

    /// Replace the job's CPU rate descriptor
    fn set_cpu_rate(&self, job: Handle, rate: &CpuRateControl) -> OsResult<()>;

    fn query_cpu_rate(&self, job: Handle) -> OsResult<CpuRateControl>;

    fn assign_process(&self, job: Handle, process: Handle) -> OsResult<()>;

    /// Whether the calling process already runs inside some job
    fn is_current_process_in_job(&self) -> OsResult<bool>;

    /// Open a process by id with rights to assign, terminate, query and wait
    fn open_process(&self, pid: u32) -> OsResult<Handle>;

    fn create_process(&self, request: &CreateProcessRequest) -> OsResult<ProcessInformation>;

    fn resume_thread(&self, thread: Handle) -> OsResult<()>;

    fn terminate_process(&self, process: Handle, exit_code: u32) -> OsResult<()>;

    /// Duplicate a handle within the current process, keeping its access rights
    fn duplicate_handle(&self, handle: Handle) -> OsResult<Handle>;

    /// Wait for a process to exit. Returns `false` if the timeout elapsed first;
    /// `None` waits forever.
    fn wait_process(&self, process: Handle, timeout: Option<Duration>) -> OsResult<bool>;

    /// Exit code of a finished process, `None` while it still runs
    fn exit_code(&self, process: Handle) -> OsResult<Option<u32>>;

    fn close_handle(&self, handle: Handle) -> OsResult<()>;
}
