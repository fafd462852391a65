//! Launching processes straight into a resource group
//!
//! A confined launch runs in three strictly ordered steps:
//! 1. Create the process suspended, breaking away from the caller's own job
//! 2. Attach it to the group
//! 3. Resume its primary thread
//!
//! The process executes no instruction before step 3, so nothing it does
//! (allocating, spawning children) escapes the group's limits. If step 2 or 3
//! fails the process is terminated before the error is returned.

use std::path::{Path, PathBuf};

use jobgroup_core::{JobError, Result, TerminationFailed};
use jobgroup_sys::{
    CreateProcessRequest, CreationFlags, JobApi, NativeJobApi, OwnedHandle, ProcessInformation,
};
use log::{debug, log_enabled, warn, Level};

use crate::group::ResourceGroup;
use crate::process::ConfinedProcess;

/// Exit code given to a process killed because its launch failed (-1)
pub const ABORTED_EXIT_CODE: u32 = u32::MAX;

/// Process launch configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Executable path
    pub program: String,
    /// Arguments, joined with single spaces
    pub args: Vec<String>,
    /// Working directory, inherited when unset
    pub working_dir: Option<PathBuf>,
}

impl LaunchConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn command_line(&self) -> String {
        command_line(&self.program, &self.args)
    }
}

/// Build the command line: the quoted program, then the arguments.
///
/// The program is wrapped in double quotes unless it already starts and ends
/// with one. Quotes inside the path are not escaped, and arguments are passed
/// through verbatim.
pub fn command_line<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    let mut command = if program.len() >= 2 && program.starts_with('"') && program.ends_with('"')
    {
        program.to_string()
    } else {
        format!("\"{}\"", program)
    };

    let joined = args
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ");
    if !joined.is_empty() {
        command.push(' ');
        command.push_str(&joined);
    }
    command
}

/// Creation flags for a launch. Suspended only when there is a group to
/// attach to before the first instruction.
pub fn creation_flags(confined: bool) -> CreationFlags {
    let flags = CreationFlags::BREAKAWAY_FROM_JOB | CreationFlags::NO_WINDOW;
    if confined {
        flags | CreationFlags::SUSPENDED
    } else {
        flags
    }
}

/// Starts processes, optionally confined to a [`ResourceGroup`]
#[derive(Debug, Clone, Default)]
pub struct ConfinedProcessLauncher<A: JobApi = NativeJobApi> {
    api: A,
}

impl ConfinedProcessLauncher<NativeJobApi> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<A: JobApi> ConfinedProcessLauncher<A> {
    pub fn with_api(api: A) -> Self {
        Self { api }
    }

    /// Start `program` with `args` in `working_dir`, inside `group` if given.
    ///
    /// Without a group the process starts running immediately, outside any
    /// job (including the caller's).
    pub fn launch<S: AsRef<str>>(
        &self,
        program: &str,
        args: &[S],
        working_dir: Option<&Path>,
        group: Option<&ResourceGroup<A>>,
    ) -> Result<ConfinedProcess<A>> {
        let config = LaunchConfig {
            program: program.to_string(),
            args: args.iter().map(|a| a.as_ref().to_string()).collect(),
            working_dir: working_dir.map(Path::to_path_buf),
        };
        self.launch_config(&config, group)
    }

    pub fn launch_config(
        &self,
        config: &LaunchConfig,
        group: Option<&ResourceGroup<A>>,
    ) -> Result<ConfinedProcess<A>> {
        if let Some(group) = group {
            group.ensure_active()?;
        }
        if log_enabled!(Level::Debug) && self.api.is_current_process_in_job().unwrap_or(false) {
            debug!("Caller runs inside a job, child will break away");
        }

        let request = CreateProcessRequest {
            command_line: config.command_line(),
            working_dir: config.working_dir.clone(),
            flags: creation_flags(group.is_some()),
        };
        let info = self
            .api
            .create_process(&request)
            .map_err(JobError::process_creation)?;
        debug!(
            "Created pid {} ({}), flags {:#x}",
            info.pid,
            request.command_line,
            request.flags.bits()
        );

        // Setup handles are closed on every path out of here
        let process = OwnedHandle::new(self.api.clone(), info.process);
        let _thread = OwnedHandle::new(self.api.clone(), info.thread);

        if let Some(group) = group {
            if let Err(e) = group.attach_handle(process.as_handle()) {
                return Err(self.abort(&info, e));
            }
            if let Err(source) = self.api.resume_thread(info.thread) {
                return Err(self.abort(&info, JobError::resume(source)));
            }
            debug!("Resumed pid {} inside its resource group", info.pid);
        }

        let reference = match self.api.duplicate_handle(process.as_handle()) {
            Ok(handle) => handle,
            Err(source) => return Err(self.abort(&info, JobError::process_creation(source))),
        };

        Ok(ConfinedProcess::new(
            info.pid,
            OwnedHandle::new(self.api.clone(), reference),
            group.is_some(),
        ))
    }

    /// Kill a half-started process, keeping `err` as the reported failure
    fn abort(&self, info: &ProcessInformation, err: JobError) -> JobError {
        warn!("Launch of pid {} failed, terminating it: {}", info.pid, err);
        match self.api.terminate_process(info.process, ABORTED_EXIT_CODE) {
            Ok(()) => err,
            Err(source) => err.with_termination_failure(TerminationFailed {
                pid: info.pid,
                source,
            }),
        }
    }
}
