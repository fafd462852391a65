//! Stand-in for platforms without job objects. Every call fails.

use std::time::Duration;

use jobgroup_core::{CpuRateControl, ExtendedLimits, OsError};

use crate::api::{CreateProcessRequest, JobApi, OsResult, ProcessInformation};
use crate::handle::Handle;

/// `ERROR_NOT_SUPPORTED`
const NOT_SUPPORTED: u32 = 50;

#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedJobApi;

fn unsupported<T>() -> OsResult<T> {
    Err(OsError::new(
        NOT_SUPPORTED,
        "job objects are only available on Windows",
    ))
}

impl JobApi for UnsupportedJobApi {
    fn create_job(&self, _name: Option<&str>) -> OsResult<Handle> {
        unsupported()
    }

    fn set_extended_limits(&self, _job: Handle, _limits: &ExtendedLimits) -> OsResult<()> {
        unsupported()
    }

    fn query_extended_limits(&self, _job: Handle) -> OsResult<ExtendedLimits> {
        unsupported()
    }

    fn set_cpu_rate(&self, _job: Handle, _rate: &CpuRateControl) -> OsResult<()> {
        unsupported()
    }

    fn query_cpu_rate(&self, _job: Handle) -> OsResult<CpuRateControl> {
        unsupported()
    }

    fn assign_process(&self, _job: Handle, _process: Handle) -> OsResult<()> {
        unsupported()
    }

    fn is_current_process_in_job(&self) -> OsResult<bool> {
        Ok(false)
    }

    fn open_process(&self, _pid: u32) -> OsResult<Handle> {
        unsupported()
    }

    fn create_process(&self, _request: &CreateProcessRequest) -> OsResult<ProcessInformation> {
        unsupported()
    }

    fn resume_thread(&self, _thread: Handle) -> OsResult<()> {
        unsupported()
    }

    fn terminate_process(&self, _process: Handle, _exit_code: u32) -> OsResult<()> {
        unsupported()
    }

    fn duplicate_handle(&self, _handle: Handle) -> OsResult<Handle> {
        unsupported()
    }

    fn wait_process(&self, _process: Handle, _timeout: Option<Duration>) -> OsResult<bool> {
        unsupported()
    }

    fn exit_code(&self, _process: Handle) -> OsResult<Option<u32>> {
        unsupported()
    }

    fn close_handle(&self, _handle: Handle) -> OsResult<()> {
        unsupported()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_job_reports_not_supported() {
        let err = UnsupportedJobApi.create_job(None).unwrap_err();
        assert_eq!(err.code, NOT_SUPPORTED);
    }

    #[test]
    fn test_not_in_job() {
        assert!(!UnsupportedJobApi.is_current_process_in_job().unwrap());
    }
}
