//! Job objects and process primitives via the Win32 API

use std::ffi::{c_void, OsStr};
use std::iter;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use std::time::Duration;

use jobgroup_core::{CpuRateControl, CpuRateFlags, ExtendedLimits, LimitFlags, OsError};
use log::debug;
use windows_sys::Win32::Foundation::{
    CloseHandle, DuplicateHandle, GetLastError, DUPLICATE_SAME_ACCESS, ERROR_ALREADY_EXISTS,
    HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, IsProcessInJob,
    JobObjectCpuRateControlInformation, JobObjectExtendedLimitInformation,
    QueryInformationJobObject, SetInformationJobObject, JOBOBJECT_CPU_RATE_CONTROL_INFORMATION,
    JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
};
use windows_sys::Win32::System::Threading::{
    CreateProcessW, GetCurrentProcess, GetExitCodeProcess, OpenProcess, ResumeThread,
    TerminateProcess, WaitForSingleObject, INFINITE, PROCESS_INFORMATION,
    PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SET_QUOTA, PROCESS_SYNCHRONIZE,
    PROCESS_TERMINATE, STARTUPINFOW,
};

use crate::api::{CreateProcessRequest, JobApi, OsResult, ProcessInformation};
use crate::handle::Handle;

/// The real kernel
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsJobApi;

fn raw(handle: Handle) -> HANDLE {
    handle.as_raw() as HANDLE
}

fn wrap(handle: HANDLE) -> Handle {
    Handle::from_raw(handle as isize)
}

fn to_wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(iter::once(0)).collect()
}

fn check(ok: i32) -> OsResult<()> {
    if ok == 0 {
        Err(OsError::last())
    } else {
        Ok(())
    }
}

impl JobApi for WindowsJobApi {
    fn create_job(&self, name: Option<&str>) -> OsResult<Handle> {
        let wide_name = name.map(|n| to_wide(OsStr::new(n)));
        let name_ptr = wide_name.as_ref().map_or(ptr::null(), |w| w.as_ptr());

        // SAFETY: name_ptr is null or a NUL-terminated UTF-16 buffer that outlives the call
        let job = unsafe { CreateJobObjectW(ptr::null(), name_ptr) };
        if job.is_null() {
            return Err(OsError::last());
        }

        // A named create that succeeds may have opened someone else's job.
        // SAFETY: reads the calling thread's last-error value, no pointers involved
        if name.is_some() && unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            // SAFETY: job is the valid handle returned above and is not used afterwards
            if let Err(e) = check(unsafe { CloseHandle(job) }) {
                debug!("Closing existing job {:?} failed: {}", wrap(job), e);
            }
            return Err(OsError::from_code(ERROR_ALREADY_EXISTS));
        }

        Ok(wrap(job))
    }

    fn set_extended_limits(&self, job: Handle, limits: &ExtendedLimits) -> OsResult<()> {
        // SAFETY: plain-old-data struct, all-zero is a valid "no limits" value
        let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { mem::zeroed() };
        info.BasicLimitInformation.LimitFlags = limits.flags.bits();
        info.BasicLimitInformation.MinimumWorkingSetSize = limits.min_working_set;
        info.BasicLimitInformation.MaximumWorkingSetSize = limits.max_working_set;
        info.JobMemoryLimit = limits.job_memory_limit;

        check(unsafe {
            SetInformationJobObject(
                raw(job),
                JobObjectExtendedLimitInformation,
                &info as *const _ as *const c_void,
                mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
            )
        })
    }

    fn query_extended_limits(&self, job: Handle) -> OsResult<ExtendedLimits> {
        let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { mem::zeroed() };
        check(unsafe {
            QueryInformationJobObject(
                raw(job),
                JobObjectExtendedLimitInformation,
                &mut info as *mut _ as *mut c_void,
                mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
                ptr::null_mut(),
            )
        })?;

        Ok(ExtendedLimits {
            flags: LimitFlags::from_bits(info.BasicLimitInformation.LimitFlags),
            min_working_set: info.BasicLimitInformation.MinimumWorkingSetSize,
            max_working_set: info.BasicLimitInformation.MaximumWorkingSetSize,
            job_memory_limit: info.JobMemoryLimit,
        })
    }

    fn set_cpu_rate(&self, job: Handle, rate: &CpuRateControl) -> OsResult<()> {
        let mut info: JOBOBJECT_CPU_RATE_CONTROL_INFORMATION = unsafe { mem::zeroed() };
        info.ControlFlags = rate.flags.bits();
        info.Anonymous.CpuRate = rate.rate;

        check(unsafe {
            SetInformationJobObject(
                raw(job),
                JobObjectCpuRateControlInformation,
                &info as *const _ as *const c_void,
                mem::size_of::<JOBOBJECT_CPU_RATE_CONTROL_INFORMATION>() as u32,
            )
        })
    }

    fn query_cpu_rate(&self, job: Handle) -> OsResult<CpuRateControl> {
        let mut info: JOBOBJECT_CPU_RATE_CONTROL_INFORMATION = unsafe { mem::zeroed() };
        check(unsafe {
            QueryInformationJobObject(
                raw(job),
                JobObjectCpuRateControlInformation,
                &mut info as *mut _ as *mut c_void,
                mem::size_of::<JOBOBJECT_CPU_RATE_CONTROL_INFORMATION>() as u32,
                ptr::null_mut(),
            )
        })?;

        Ok(CpuRateControl {
            flags: CpuRateFlags::from_bits(info.ControlFlags),
            // SAFETY: every union member is a u32 view of the same field
            rate: unsafe { info.Anonymous.CpuRate },
        })
    }

    fn assign_process(&self, job: Handle, process: Handle) -> OsResult<()> {
        check(unsafe { AssignProcessToJobObject(raw(job), raw(process)) })
    }

    fn is_current_process_in_job(&self) -> OsResult<bool> {
        let mut result = 0;
        check(unsafe { IsProcessInJob(GetCurrentProcess(), ptr::null_mut(), &mut result) })?;
        Ok(result != 0)
    }

    fn open_process(&self, pid: u32) -> OsResult<Handle> {
        let access = PROCESS_SET_QUOTA
            | PROCESS_TERMINATE
            | PROCESS_QUERY_LIMITED_INFORMATION
            | PROCESS_SYNCHRONIZE;
        let process = unsafe { OpenProcess(access, 0, pid) };
        if process.is_null() {
            return Err(OsError::last());
        }
        Ok(wrap(process))
    }

    fn create_process(&self, request: &CreateProcessRequest) -> OsResult<ProcessInformation> {
        // CreateProcessW may write into the command line buffer
        let mut command_line = to_wide(OsStr::new(&request.command_line));
        let working_dir = request
            .working_dir
            .as_ref()
            .map(|dir| to_wide(dir.as_os_str()));
        let working_dir_ptr = working_dir.as_ref().map_or(ptr::null(), |w| w.as_ptr());

        let mut startup: STARTUPINFOW = unsafe { mem::zeroed() };
        startup.cb = mem::size_of::<STARTUPINFOW>() as u32;
        let mut info: PROCESS_INFORMATION = unsafe { mem::zeroed() };

        // SAFETY: all buffers are NUL-terminated and live until the call returns
        check(unsafe {
            CreateProcessW(
                ptr::null(),
                command_line.as_mut_ptr(),
                ptr::null(),
                ptr::null(),
                0,
                request.flags.bits(),
                ptr::null(),
                working_dir_ptr,
                &startup,
                &mut info,
            )
        })?;

        Ok(ProcessInformation {
            process: wrap(info.hProcess),
            thread: wrap(info.hThread),
            pid: info.dwProcessId,
        })
    }

    fn resume_thread(&self, thread: Handle) -> OsResult<()> {
        if unsafe { ResumeThread(raw(thread)) } == u32::MAX {
            return Err(OsError::last());
        }
        Ok(())
    }

    fn terminate_process(&self, process: Handle, exit_code: u32) -> OsResult<()> {
        check(unsafe { TerminateProcess(raw(process), exit_code) })
    }

    fn duplicate_handle(&self, handle: Handle) -> OsResult<Handle> {
        let mut duplicate: HANDLE = ptr::null_mut();
        check(unsafe {
            let current = GetCurrentProcess();
            DuplicateHandle(
                current,
                raw(handle),
                current,
                &mut duplicate,
                0,
                0,
                DUPLICATE_SAME_ACCESS,
            )
        })?;
        Ok(wrap(duplicate))
    }

    fn wait_process(&self, process: Handle, timeout: Option<Duration>) -> OsResult<bool> {
        let millis = timeout.map_or(INFINITE, |t| t.as_millis().min(INFINITE as u128 - 1) as u32);
        match unsafe { WaitForSingleObject(raw(process), millis) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(OsError::last()),
        }
    }

    fn exit_code(&self, process: Handle) -> OsResult<Option<u32>> {
        // STILL_ACTIVE is also a legal exit code, so ask the wait first
        if !self.wait_process(process, Some(Duration::ZERO))? {
            return Ok(None);
        }
        let mut code = 0u32;
        check(unsafe { GetExitCodeProcess(raw(process), &mut code) })?;
        Ok(Some(code))
    }

    fn close_handle(&self, handle: Handle) -> OsResult<()> {
        check(unsafe { CloseHandle(raw(handle)) })
    }
}
