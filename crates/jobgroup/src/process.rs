//! Handle to a launched process

use std::time::Duration;

use jobgroup_core::{JobError, OsError, Result};
use jobgroup_sys::{Handle, JobApi, NativeJobApi, OwnedHandle};

/// A process started by [`ConfinedProcessLauncher`](crate::ConfinedProcessLauncher).
///
/// Holds its own reference to the process, separate from the handles used
/// while setting it up. Dropping it closes that reference and leaves the
/// process running; the process only dies with its group.
#[derive(Debug)]
pub struct ConfinedProcess<A: JobApi = NativeJobApi> {
    pid: u32,
    handle: OwnedHandle<A>,
    confined: bool,
}

impl<A: JobApi> ConfinedProcess<A> {
    pub(crate) fn new(pid: u32, handle: OwnedHandle<A>, confined: bool) -> Self {
        Self {
            pid,
            handle,
            confined,
        }
    }

    /// OS process id
    pub fn id(&self) -> u32 {
        self.pid
    }

    /// Whether the process was launched into a resource group
    pub fn is_confined(&self) -> bool {
        self.confined
    }

    pub fn raw_handle(&self) -> Handle {
        self.handle.as_handle()
    }

    fn control_error(&self, source: OsError) -> JobError {
        JobError::ProcessControlFailed {
            pid: self.pid,
            source,
        }
    }

    /// Exit code if the process has finished, without blocking
    pub fn try_wait(&self) -> Result<Option<u32>> {
        self.handle
            .api()
            .exit_code(self.raw_handle())
            .map_err(|e| self.control_error(e))
    }

    /// Block until the process exits and return its exit code
    pub fn wait(&self) -> Result<u32> {
        let api = self.handle.api();
        api.wait_process(self.raw_handle(), None)
            .map_err(|e| self.control_error(e))?;
        self.try_wait()?.ok_or_else(|| {
            self.control_error(OsError::new(
                0,
                "process signaled but reported no exit code",
            ))
        })
    }

    /// Wait up to `timeout`; `None` if the process is still running
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<u32>> {
        let exited = self
            .handle
            .api()
            .wait_process(self.raw_handle(), Some(timeout))
            .map_err(|e| self.control_error(e))?;
        if !exited {
            return Ok(None);
        }
        self.try_wait()
    }

    pub fn is_running(&self) -> Result<bool> {
        Ok(self.try_wait()?.is_none())
    }

    /// Forcibly end the process with `exit_code`
    pub fn terminate(&self, exit_code: u32) -> Result<()> {
        self.handle
            .api()
            .terminate_process(self.raw_handle(), exit_code)
            .map_err(|e| self.control_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobgroup_sys::RecordingJobApi;

    fn external(api: &RecordingJobApi) -> ConfinedProcess<RecordingJobApi> {
        let pid = api.spawn_external();
        let handle = api.open_process(pid).unwrap();
        ConfinedProcess::new(pid, OwnedHandle::new(api.clone(), handle), false)
    }

    #[test]
    fn test_try_wait_running_then_exited() {
        let api = RecordingJobApi::new();
        let process = external(&api);
        assert_eq!(process.try_wait().unwrap(), None);
        assert!(process.is_running().unwrap());

        api.exit_process(process.id(), 7);
        assert_eq!(process.try_wait().unwrap(), Some(7));
        assert_eq!(process.wait().unwrap(), 7);
    }

    #[test]
    fn test_wait_timeout_on_running_process() {
        let api = RecordingJobApi::new();
        let process = external(&api);
        assert_eq!(process.wait_timeout(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn test_terminate() {
        let api = RecordingJobApi::new();
        let process = external(&api);
        process.terminate(9).unwrap();
        assert_eq!(process.wait_timeout(Duration::ZERO).unwrap(), Some(9));
        assert!(!process.is_confined());
    }

    #[test]
    fn test_drop_closes_reference_only() {
        let api = RecordingJobApi::new();
        let process = external(&api);
        let (pid, handle) = (process.id(), process.raw_handle());

        drop(process);
        assert_eq!(api.close_count(handle), 1);
        assert!(api.is_running(pid));
    }
}
