//! In-memory job object emulation
//!
//! `RecordingJobApi` keeps a small model of handles, jobs and processes so the
//! resource group and launcher can be exercised without a kernel. It records
//! every call, can be told to fail the next call of a given kind, and models
//! the behaviors the crate relies on: kill-on-close, exclusive job
//! membership, suspended primary threads and the job memory ceiling.
//!
//! Clones share state, so a test can keep one clone for inspection while the
//! code under test owns another.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use jobgroup_core::{CpuRateControl, ExtendedLimits, LimitFlags, OsError};

use crate::api::{CreateProcessRequest, CreationFlags, JobApi, OsResult, ProcessInformation};
use crate::handle::Handle;

const ERROR_ACCESS_DENIED: u32 = 5;
const ERROR_INVALID_HANDLE: u32 = 6;
const ERROR_INVALID_PARAMETER: u32 = 87;
const ERROR_ALREADY_EXISTS: u32 = 183;
const WAIT_TIMEOUT: u32 = 258;

/// Exit code of a process that hit the job memory ceiling on start
pub const STATUS_NO_MEMORY: u32 = 0xC000_0017;

/// Exit code of processes killed because their job was closed
pub const JOB_CLOSED_EXIT_CODE: u32 = 0;

/// Kinds of platform call, for counting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    CreateJob,
    SetExtendedLimits,
    QueryExtendedLimits,
    SetCpuRate,
    QueryCpuRate,
    AssignProcess,
    IsCurrentProcessInJob,
    OpenProcess,
    CreateProcess,
    ResumeThread,
    TerminateProcess,
    DuplicateHandle,
    WaitProcess,
    ExitCode,
    CloseHandle,
}

/// Observable state of an emulated process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Suspended,
    Running,
    Exited(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Object {
    Job(usize),
    Process(u32),
    Thread(u32),
}

#[derive(Debug, Default)]
struct Job {
    name: Option<String>,
    extended: ExtendedLimits,
    cpu_rate: CpuRateControl,
    members: Vec<u32>,
    open_handles: usize,
}

#[derive(Debug)]
struct Process {
    state: ProcessState,
    job: Option<usize>,
    footprint: usize,
}

#[derive(Debug, Default)]
struct State {
    next_handle: isize,
    next_pid: u32,
    handles: HashMap<Handle, Object>,
    close_counts: HashMap<Handle, usize>,
    jobs: Vec<Job>,
    processes: HashMap<u32, Process>,
    pending_failures: HashMap<Op, u32>,
    calls: Vec<Op>,
    requests: Vec<CreateProcessRequest>,
    caller_in_job: bool,
    footprint: usize,
}

impl State {
    fn begin(&mut self, op: Op) -> OsResult<()> {
        self.calls.push(op);
        match self.pending_failures.remove(&op) {
            Some(code) => Err(OsError::from_code(code)),
            None => Ok(()),
        }
    }

    fn alloc(&mut self, object: Object) -> Handle {
        self.next_handle += 4;
        let handle = Handle::from_raw(0x100 + self.next_handle);
        self.handles.insert(handle, object);
        if let Object::Job(id) = object {
            self.jobs[id].open_handles += 1;
        }
        handle
    }

    fn lookup(&self, handle: Handle) -> OsResult<Object> {
        self.handles
            .get(&handle)
            .copied()
            .ok_or_else(|| OsError::from_code(ERROR_INVALID_HANDLE))
    }

    fn job(&self, handle: Handle) -> OsResult<usize> {
        match self.lookup(handle)? {
            Object::Job(id) => Ok(id),
            _ => Err(OsError::from_code(ERROR_INVALID_HANDLE)),
        }
    }

    fn process(&self, handle: Handle) -> OsResult<u32> {
        match self.lookup(handle)? {
            Object::Process(pid) => Ok(pid),
            _ => Err(OsError::from_code(ERROR_INVALID_HANDLE)),
        }
    }

    fn spawn(&mut self, state: ProcessState) -> u32 {
        self.next_pid += 4;
        let pid = 1000 + self.next_pid;
        self.processes.insert(
            pid,
            Process {
                state,
                job: None,
                footprint: self.footprint,
            },
        );
        pid
    }

    fn exit(&mut self, pid: u32, code: u32) {
        if let Some(process) = self.processes.get_mut(&pid) {
            if !matches!(process.state, ProcessState::Exited(_)) {
                process.state = ProcessState::Exited(code);
            }
        }
    }

    /// A process exceeding its job's memory ceiling dies as soon as it runs
    fn enforce_job_memory(&mut self, pid: u32) {
        let Some(process) = self.processes.get(&pid) else {
            return;
        };
        if process.state != ProcessState::Running {
            return;
        }
        let Some(id) = process.job else {
            return;
        };
        let limits = &self.jobs[id].extended;
        if limits.flags.contains(LimitFlags::JOB_MEMORY)
            && process.footprint > limits.job_memory_limit
        {
            self.exit(pid, STATUS_NO_MEMORY);
        }
    }
}

/// Shared, inspectable in-memory backend
#[derive(Debug, Clone, Default)]
pub struct RecordingJobApi {
    state: Arc<Mutex<State>>,
}

impl RecordingJobApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Make the next call of `op` fail with `code`
    pub fn fail_next(&self, op: Op, code: u32) {
        self.lock().pending_failures.insert(op, code);
    }

    /// Pretend the calling process already runs inside a job
    pub fn set_caller_in_job(&self, in_job: bool) {
        self.lock().caller_in_job = in_job;
    }

    /// Committed memory every process created from now on needs, in bytes
    pub fn set_process_footprint(&self, bytes: usize) {
        self.lock().footprint = bytes;
    }

    /// Start a running process outside any job, as if launched elsewhere
    pub fn spawn_external(&self) -> u32 {
        self.lock().spawn(ProcessState::Running)
    }

    /// Let a process finish on its own
    pub fn exit_process(&self, pid: u32, code: u32) {
        self.lock().exit(pid, code);
    }

    pub fn process_state(&self, pid: u32) -> Option<ProcessState> {
        self.lock().processes.get(&pid).map(|p| p.state)
    }

    pub fn is_running(&self, pid: u32) -> bool {
        matches!(
            self.process_state(pid),
            Some(ProcessState::Running) | Some(ProcessState::Suspended)
        )
    }

    /// Pids attached to the job behind `job`, in attach order
    pub fn job_members(&self, job: Handle) -> Vec<u32> {
        let state = self.lock();
        match state.handles.get(&job) {
            Some(Object::Job(id)) => state.jobs[*id].members.clone(),
            _ => Vec::new(),
        }
    }

    /// Whether `pid` belongs to any job
    pub fn is_in_job(&self, pid: u32) -> bool {
        self.lock()
            .processes
            .get(&pid)
            .is_some_and(|p| p.job.is_some())
    }

    pub fn calls(&self) -> Vec<Op> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: Op) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    /// Every request passed to `create_process`, including failed ones
    pub fn create_requests(&self) -> Vec<CreateProcessRequest> {
        self.lock().requests.clone()
    }

    /// How often `close_handle` was called with this value
    pub fn close_count(&self, handle: Handle) -> usize {
        self.lock()
            .close_counts
            .get(&handle)
            .copied()
            .unwrap_or_default()
    }

    /// Number of handles currently open
    pub fn open_handle_count(&self) -> usize {
        self.lock().handles.len()
    }

    /// Handles that are open and refer to processes or threads
    pub fn open_process_handles(&self) -> HashSet<Handle> {
        self.lock()
            .handles
            .iter()
            .filter(|(_, object)| !matches!(object, Object::Job(_)))
            .map(|(handle, _)| *handle)
            .collect()
    }
}

impl JobApi for RecordingJobApi {
    fn create_job(&self, name: Option<&str>) -> OsResult<Handle> {
        let mut state = self.lock();
        state.begin(Op::CreateJob)?;

        if let Some(name) = name {
            let taken = state
                .jobs
                .iter()
                .any(|job| job.open_handles > 0 && job.name.as_deref() == Some(name));
            if taken {
                return Err(OsError::from_code(ERROR_ALREADY_EXISTS));
            }
        }

        state.jobs.push(Job {
            name: name.map(str::to_string),
            ..Default::default()
        });
        let id = state.jobs.len() - 1;
        Ok(state.alloc(Object::Job(id)))
    }

    fn set_extended_limits(&self, job: Handle, limits: &ExtendedLimits) -> OsResult<()> {
        let mut state = self.lock();
        state.begin(Op::SetExtendedLimits)?;
        let id = state.job(job)?;
        if limits.flags.contains(LimitFlags::WORKINGSET)
            && limits.min_working_set > limits.max_working_set
        {
            return Err(OsError::from_code(ERROR_INVALID_PARAMETER));
        }
        state.jobs[id].extended = *limits;
        Ok(())
    }

    fn query_extended_limits(&self, job: Handle) -> OsResult<ExtendedLimits> {
        let mut state = self.lock();
        state.begin(Op::QueryExtendedLimits)?;
        let id = state.job(job)?;
        Ok(state.jobs[id].extended)
    }

    fn set_cpu_rate(&self, job: Handle, rate: &CpuRateControl) -> OsResult<()> {
        let mut state = self.lock();
        state.begin(Op::SetCpuRate)?;
        let id = state.job(job)?;
        if rate.is_enabled() && (rate.rate == 0 || rate.rate > 10_000) {
            // Single-core emulation: a hard cap must lie in 1..=100%
            return Err(OsError::from_code(ERROR_INVALID_PARAMETER));
        }
        state.jobs[id].cpu_rate = *rate;
        Ok(())
    }

    fn query_cpu_rate(&self, job: Handle) -> OsResult<CpuRateControl> {
        let mut state = self.lock();
        state.begin(Op::QueryCpuRate)?;
        let id = state.job(job)?;
        Ok(state.jobs[id].cpu_rate)
    }

    fn assign_process(&self, job: Handle, process: Handle) -> OsResult<()> {
        let mut state = self.lock();
        state.begin(Op::AssignProcess)?;
        let id = state.job(job)?;
        let pid = state.process(process)?;

        let entry = state
            .processes
            .get_mut(&pid)
            .ok_or_else(|| OsError::from_code(ERROR_INVALID_HANDLE))?;
        if matches!(entry.state, ProcessState::Exited(_)) {
            return Err(OsError::from_code(ERROR_ACCESS_DENIED));
        }
        match entry.job {
            Some(current) if current == id => return Ok(()),
            Some(_) => return Err(OsError::from_code(ERROR_ACCESS_DENIED)),
            None => entry.job = Some(id),
        }

        state.jobs[id].members.push(pid);
        state.enforce_job_memory(pid);
        Ok(())
    }

    fn is_current_process_in_job(&self) -> OsResult<bool> {
        let mut state = self.lock();
        state.begin(Op::IsCurrentProcessInJob)?;
        Ok(state.caller_in_job)
    }

    fn open_process(&self, pid: u32) -> OsResult<Handle> {
        let mut state = self.lock();
        state.begin(Op::OpenProcess)?;
        if !state.processes.contains_key(&pid) {
            return Err(OsError::from_code(ERROR_INVALID_PARAMETER));
        }
        Ok(state.alloc(Object::Process(pid)))
    }

    fn create_process(&self, request: &CreateProcessRequest) -> OsResult<ProcessInformation> {
        let mut state = self.lock();
        state.requests.push(request.clone());
        state.begin(Op::CreateProcess)?;

        if state.caller_in_job && !request.flags.contains(CreationFlags::BREAKAWAY_FROM_JOB) {
            // Children of a confined caller would inherit its job; not modelled
            return Err(OsError::from_code(ERROR_ACCESS_DENIED));
        }

        let initial = if request.flags.contains(CreationFlags::SUSPENDED) {
            ProcessState::Suspended
        } else {
            ProcessState::Running
        };
        let pid = state.spawn(initial);
        let process = state.alloc(Object::Process(pid));
        let thread = state.alloc(Object::Thread(pid));

        Ok(ProcessInformation {
            process,
            thread,
            pid,
        })
    }

    fn resume_thread(&self, thread: Handle) -> OsResult<()> {
        let mut state = self.lock();
        state.begin(Op::ResumeThread)?;
        let pid = match state.lookup(thread)? {
            Object::Thread(pid) => pid,
            _ => return Err(OsError::from_code(ERROR_INVALID_HANDLE)),
        };
        if let Some(process) = state.processes.get_mut(&pid) {
            if process.state == ProcessState::Suspended {
                process.state = ProcessState::Running;
            }
        }
        state.enforce_job_memory(pid);
        Ok(())
    }

    fn terminate_process(&self, process: Handle, exit_code: u32) -> OsResult<()> {
        let mut state = self.lock();
        state.begin(Op::TerminateProcess)?;
        let pid = state.process(process)?;
        state.exit(pid, exit_code);
        Ok(())
    }

    fn duplicate_handle(&self, handle: Handle) -> OsResult<Handle> {
        let mut state = self.lock();
        state.begin(Op::DuplicateHandle)?;
        let object = state.lookup(handle)?;
        Ok(state.alloc(object))
    }

    fn wait_process(&self, process: Handle, timeout: Option<Duration>) -> OsResult<bool> {
        let mut state = self.lock();
        state.begin(Op::WaitProcess)?;
        let pid = state.process(process)?;
        let exited = matches!(
            state.processes.get(&pid).map(|p| p.state),
            Some(ProcessState::Exited(_))
        );
        match (exited, timeout) {
            (true, _) => Ok(true),
            (false, Some(_)) => Ok(false),
            // Nothing would ever wake an infinite wait here
            (false, None) => Err(OsError::from_code(WAIT_TIMEOUT)),
        }
    }

    fn exit_code(&self, process: Handle) -> OsResult<Option<u32>> {
        let mut state = self.lock();
        state.begin(Op::ExitCode)?;
        let pid = state.process(process)?;
        Ok(match state.processes.get(&pid).map(|p| p.state) {
            Some(ProcessState::Exited(code)) => Some(code),
            _ => None,
        })
    }

    fn close_handle(&self, handle: Handle) -> OsResult<()> {
        let mut state = self.lock();
        *state.close_counts.entry(handle).or_default() += 1;
        state.begin(Op::CloseHandle)?;

        let object = state
            .handles
            .remove(&handle)
            .ok_or_else(|| OsError::from_code(ERROR_INVALID_HANDLE))?;

        if let Object::Job(id) = object {
            state.jobs[id].open_handles -= 1;
            if state.jobs[id].open_handles == 0 && state.jobs[id].extended.kills_on_close() {
                let members = state.jobs[id].members.clone();
                for pid in members {
                    state.exit(pid, JOB_CLOSED_EXIT_CODE);
                }
            }
        }
        Ok(())
    }
}
