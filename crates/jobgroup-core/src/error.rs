//! Error types for resource group operations

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for resource group operations
pub type Result<T> = std::result::Result<T, JobError>;

/// Raw failure reported by the operating system
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (os error {code})")]
pub struct OsError {
    /// Raw OS error code (`GetLastError` on Windows)
    pub code: u32,
    /// Human-readable description of `code`
    pub message: String,
}

impl OsError {
    /// Build an error from a raw code, resolving its system message
    pub fn from_code(code: u32) -> Self {
        Self::from(io::Error::from_raw_os_error(code as i32))
    }

    /// Capture the calling thread's last OS error
    pub fn last() -> Self {
        Self::from(io::Error::last_os_error())
    }

    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<io::Error> for OsError {
    fn from(err: io::Error) -> Self {
        let code = err.raw_os_error().unwrap_or_default() as u32;
        let text = err.to_string();
        // io::Error appends the code itself; keep only the description
        let message = text
            .strip_suffix(&format!(" (os error {})", code))
            .unwrap_or(&text)
            .to_string();
        Self { code, message }
    }
}

/// Which limit descriptor an update or query targeted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    /// Extended limits: working set range and job memory ceiling
    Memory,
    /// CPU rate control
    CpuRate,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitKind::Memory => f.write_str("memory"),
            LimitKind::CpuRate => f.write_str("cpu rate"),
        }
    }
}

/// A half-started process could not be killed while cleaning up a failed launch.
///
/// Never returned on its own: it is nested beneath the launch error that
/// triggered the cleanup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to terminate process {pid}: {source}")]
pub struct TerminationFailed {
    pub pid: u32,
    #[source]
    pub source: OsError,
}

fn cleanup_note(cleanup: &Option<TerminationFailed>) -> String {
    match cleanup {
        Some(failure) => format!(" (cleanup also failed: {})", failure),
        None => String::new(),
    }
}

/// Errors that can occur while managing a resource group or launching into one
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Resource group creation failed: {0}")]
    ResourceGroupCreationFailed(#[source] OsError),

    #[error("Resource group is already disposed")]
    AlreadyDisposed,

    #[error("Failed to update {kind} limits: {source}")]
    LimitUpdateFailed {
        kind: LimitKind,
        #[source]
        source: OsError,
    },

    #[error("Failed to query {kind} limits: {source}")]
    QueryFailed {
        kind: LimitKind,
        #[source]
        source: OsError,
    },

    #[error("Failed to attach process to resource group: {source}{}", cleanup_note(.cleanup))]
    AttachFailed {
        #[source]
        source: OsError,
        cleanup: Option<TerminationFailed>,
    },

    #[error("Process creation failed: {source}{}", cleanup_note(.cleanup))]
    ProcessCreationFailed {
        #[source]
        source: OsError,
        cleanup: Option<TerminationFailed>,
    },

    #[error("Failed to resume process: {source}{}", cleanup_note(.cleanup))]
    ResumeFailed {
        #[source]
        source: OsError,
        cleanup: Option<TerminationFailed>,
    },

    #[error("Failed to control process {pid}: {source}")]
    ProcessControlFailed {
        pid: u32,
        #[source]
        source: OsError,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl JobError {
    pub fn attach(source: OsError) -> Self {
        JobError::AttachFailed {
            source,
            cleanup: None,
        }
    }

    pub fn process_creation(source: OsError) -> Self {
        JobError::ProcessCreationFailed {
            source,
            cleanup: None,
        }
    }

    pub fn resume(source: OsError) -> Self {
        JobError::ResumeFailed {
            source,
            cleanup: None,
        }
    }

    /// Raw OS error code behind this failure, if the OS reported one
    pub fn os_code(&self) -> Option<u32> {
        match self {
            JobError::ResourceGroupCreationFailed(source)
            | JobError::LimitUpdateFailed { source, .. }
            | JobError::QueryFailed { source, .. }
            | JobError::AttachFailed { source, .. }
            | JobError::ProcessCreationFailed { source, .. }
            | JobError::ResumeFailed { source, .. }
            | JobError::ProcessControlFailed { source, .. } => Some(source.code),
            JobError::AlreadyDisposed | JobError::InvalidConfig(_) => None,
        }
    }

    /// Cleanup failure recorded beneath a launch error
    pub fn termination_failure(&self) -> Option<&TerminationFailed> {
        match self {
            JobError::AttachFailed { cleanup, .. }
            | JobError::ProcessCreationFailed { cleanup, .. }
            | JobError::ResumeFailed { cleanup, .. } => cleanup.as_ref(),
            _ => None,
        }
    }

    /// Record that killing the half-started process failed too.
    ///
    /// Kinds that never trigger a cleanup are returned unchanged.
    pub fn with_termination_failure(self, failure: TerminationFailed) -> Self {
        match self {
            JobError::AttachFailed { source, .. } => JobError::AttachFailed {
                source,
                cleanup: Some(failure),
            },
            JobError::ProcessCreationFailed { source, .. } => JobError::ProcessCreationFailed {
                source,
                cleanup: Some(failure),
            },
            JobError::ResumeFailed { source, .. } => JobError::ResumeFailed {
                source,
                cleanup: Some(failure),
            },
            other => other,
        }
    }

    /// `AlreadyDisposed` is a use-after-release bug in the caller; everything
    /// else may succeed on a retry with different inputs.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, JobError::AlreadyDisposed)
    }
}
