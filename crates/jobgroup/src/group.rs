//! Resource group: one job object and the limits on it

use std::mem;

use jobgroup_core::util::{memory_size_to_usize, parse_memory_size};
use jobgroup_core::{
    CpuRateControl, ExtendedLimits, JobError, LimitKind, LimitsConfig, MemoryLimits, Result,
};
use jobgroup_sys::{Handle, JobApi, NativeJobApi, OwnedHandle};
use log::{debug, warn};

use crate::process::ConfinedProcess;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupState {
    Active(Handle),
    Disposed,
}

/// A set of processes limited and terminated together.
///
/// Every member is killed when the group's handle is closed, either by
/// [`dispose`](ResourceGroup::dispose) or when the group is dropped. The
/// kill-on-close flag is set at creation and kept through every limit update.
///
/// Limit updates replace the whole descriptor of their kind. Calling
/// `set_memory_limits(None, None, Some(x))` after a working-set update clears
/// the working-set limit.
#[derive(Debug)]
pub struct ResourceGroup<A: JobApi = NativeJobApi> {
    api: A,
    state: GroupState,
    name: Option<String>,
}

impl ResourceGroup<NativeJobApi> {
    /// Create an anonymous group on the native backend
    pub fn new() -> Result<Self> {
        Self::with_api(NativeJobApi::default())
    }

    /// Create a named group; fails if the name is already taken
    pub fn named(name: &str) -> Result<Self> {
        Self::named_with_api(NativeJobApi::default(), name)
    }

    /// Attach a child spawned through `std::process::Command`.
    ///
    /// The child has already been running, so limits only bound what it does
    /// from here on; prefer [`ConfinedProcessLauncher`](crate::ConfinedProcessLauncher).
    #[cfg(windows)]
    pub fn attach_child(&self, child: &std::process::Child) -> Result<()> {
        use std::os::windows::io::AsRawHandle;
        self.attach_handle(Handle::from_raw(child.as_raw_handle() as isize))
    }
}

impl<A: JobApi> ResourceGroup<A> {
    pub fn with_api(api: A) -> Result<Self> {
        Self::create(api, None)
    }

    pub fn named_with_api(api: A, name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(JobError::InvalidConfig(
                "Resource group name cannot be empty".to_string(),
            ));
        }
        Self::create(api, Some(name))
    }

    fn create(api: A, name: Option<&str>) -> Result<Self> {
        let handle = api
            .create_job(name)
            .map_err(JobError::ResourceGroupCreationFailed)?;
        debug!("Created resource group {:?} ({:?})", name, handle);

        let group = Self {
            api,
            state: GroupState::Active(handle),
            name: name.map(str::to_string),
        };
        // On failure the group is dropped here, which closes the handle
        group.apply_memory_limits(&MemoryLimits::default())?;
        Ok(group)
    }

    fn handle(&self) -> Result<Handle> {
        match self.state {
            GroupState::Active(handle) => Ok(handle),
            GroupState::Disposed => Err(JobError::AlreadyDisposed),
        }
    }

    /// Native handle of the group, `None` once disposed
    pub fn raw_handle(&self) -> Option<Handle> {
        self.handle().ok()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn is_disposed(&self) -> bool {
        self.state == GroupState::Disposed
    }

    /// Fail with `AlreadyDisposed` unless the group can still be used
    pub fn ensure_active(&self) -> Result<()> {
        self.handle().map(|_| ())
    }

    /// Replace the memory limits.
    ///
    /// The working-set range applies only when both bounds are given. Kinds
    /// left as `None` are switched off, not kept from an earlier call.
    pub fn set_memory_limits(
        &self,
        min_working_set: Option<usize>,
        max_working_set: Option<usize>,
        max_job_memory: Option<usize>,
    ) -> Result<()> {
        self.apply_memory_limits(&MemoryLimits::new(
            min_working_set,
            max_working_set,
            max_job_memory,
        ))
    }

    pub fn apply_memory_limits(&self, limits: &MemoryLimits) -> Result<()> {
        let handle = self.handle()?;
        limits.validate()?;

        let descriptor = limits.to_descriptor();
        self.api
            .set_extended_limits(handle, &descriptor)
            .map_err(|source| JobError::LimitUpdateFailed {
                kind: LimitKind::Memory,
                source,
            })?;
        debug!("Resource group {:?}: memory limits {:?}", handle, limits);
        Ok(())
    }

    /// Hard-cap the group's CPU time to `fraction` of total CPU (0.5 = 50%).
    ///
    /// A rate the OS refuses, such as 0.0, fails with `LimitUpdateFailed`.
    pub fn set_cpu_rate_limit(&self, fraction: f64) -> Result<()> {
        let handle = self.handle()?;
        let rate = CpuRateControl::hard_cap(fraction)?;

        self.api
            .set_cpu_rate(handle, &rate)
            .map_err(|source| JobError::LimitUpdateFailed {
                kind: LimitKind::CpuRate,
                source,
            })?;
        debug!(
            "Resource group {:?}: cpu rate {} (hundredths of a percent)",
            handle, rate.rate
        );
        Ok(())
    }

    /// Apply every limit present in `config`, memory first
    pub fn apply_limits(&self, config: &LimitsConfig) -> Result<()> {
        self.ensure_active()?;
        config.validate()?;
        if !config.memory.is_empty() {
            self.apply_memory_limits(&config.memory)?;
        }
        if let Some(fraction) = config.cpu_rate {
            self.set_cpu_rate_limit(fraction)?;
        }
        Ok(())
    }

    /// Extended limit descriptor as currently held by the OS
    pub fn extended_limits(&self) -> Result<ExtendedLimits> {
        let handle = self.handle()?;
        self.api
            .query_extended_limits(handle)
            .map_err(|source| JobError::QueryFailed {
                kind: LimitKind::Memory,
                source,
            })
    }

    pub fn memory_limits(&self) -> Result<MemoryLimits> {
        Ok(self.extended_limits()?.memory_limits())
    }

    pub fn cpu_rate_control(&self) -> Result<CpuRateControl> {
        let handle = self.handle()?;
        self.api
            .query_cpu_rate(handle)
            .map_err(|source| JobError::QueryFailed {
                kind: LimitKind::CpuRate,
                source,
            })
    }

    /// Current CPU cap as a fraction of total CPU, `None` if uncapped
    pub fn cpu_rate_limit(&self) -> Result<Option<f64>> {
        let rate = self.cpu_rate_control()?;
        Ok(rate.is_enabled().then(|| rate.fraction()))
    }

    /// Attach a process by handle. The handle needs set-quota and terminate rights.
    pub fn attach_handle(&self, process: Handle) -> Result<()> {
        let handle = self.handle()?;
        self.api
            .assign_process(handle, process)
            .map_err(JobError::attach)?;
        debug!("Resource group {:?}: attached {:?}", handle, process);
        Ok(())
    }

    /// Attach a running process by id
    pub fn attach_pid(&self, pid: u32) -> Result<()> {
        self.ensure_active()?;
        let process = self.api.open_process(pid).map_err(JobError::attach)?;
        let process = OwnedHandle::new(self.api.clone(), process);
        self.attach_handle(process.as_handle())
    }

    pub fn attach(&self, process: &ConfinedProcess<A>) -> Result<()> {
        self.attach_handle(process.raw_handle())
    }

    /// Close the group's handle, terminating every member.
    ///
    /// Later calls do nothing; every other operation then fails with
    /// `AlreadyDisposed`.
    pub fn dispose(&mut self) {
        if let GroupState::Active(handle) = mem::replace(&mut self.state, GroupState::Disposed) {
            match self.api.close_handle(handle) {
                Ok(()) => debug!("Disposed resource group {:?}", handle),
                Err(e) => warn!("Closing resource group {:?} failed: {}", handle, e),
            }
        }
    }
}

impl<A: JobApi> Drop for ResourceGroup<A> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Builder pattern for resource group creation
#[derive(Debug, Clone, Default)]
pub struct ResourceGroupBuilder {
    name: Option<String>,
    limits: LimitsConfig,
}

impl ResourceGroupBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the group instead of leaving it anonymous
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set per-process working set bounds in bytes
    pub fn working_set(mut self, min: usize, max: usize) -> Self {
        self.limits.memory.min_working_set = Some(min);
        self.limits.memory.max_working_set = Some(max);
        self
    }

    /// Set the committed memory ceiling for the whole group
    pub fn max_job_memory(mut self, bytes: usize) -> Self {
        self.limits.memory.max_job_memory = Some(bytes);
        self
    }

    /// Set the memory ceiling from a string (e.g., "256M")
    pub fn max_job_memory_str(self, s: &str) -> Result<Self> {
        let bytes = memory_size_to_usize(parse_memory_size(s)?)?;
        Ok(self.max_job_memory(bytes))
    }

    pub fn memory_limits(mut self, limits: MemoryLimits) -> Self {
        self.limits.memory = limits;
        self
    }

    /// Set the CPU cap as a fraction of total CPU (0.25 = 25%)
    pub fn cpu_rate(mut self, fraction: f64) -> Self {
        self.limits.cpu_rate = Some(fraction);
        self
    }

    /// Replace all configured limits
    pub fn limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn build(self) -> Result<ResourceGroup> {
        self.build_with_api(NativeJobApi::default())
    }

    pub fn build_with_api<A: JobApi>(self, api: A) -> Result<ResourceGroup<A>> {
        self.limits.validate()?;

        let mut group = match &self.name {
            Some(name) => ResourceGroup::named_with_api(api, name)?,
            None => ResourceGroup::with_api(api)?,
        };
        if let Err(e) = group.apply_limits(&self.limits) {
            group.dispose();
            return Err(e);
        }
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobgroup_core::LimitFlags;
    use jobgroup_sys::recording::Op;
    use jobgroup_sys::RecordingJobApi;

    #[test]
    fn test_create_applies_kill_on_close() {
        let api = RecordingJobApi::new();
        let group = ResourceGroup::with_api(api.clone()).unwrap();

        let limits = group.extended_limits().unwrap();
        assert_eq!(limits.flags, LimitFlags::KILL_ON_JOB_CLOSE);
        assert_eq!(api.call_count(Op::SetExtendedLimits), 1);
    }

    #[test]
    fn test_create_failure_is_reported() {
        let api = RecordingJobApi::new();
        api.fail_next(Op::CreateJob, 1450);

        let err = ResourceGroup::with_api(api).unwrap_err();
        assert!(matches!(err, JobError::ResourceGroupCreationFailed(_)));
        assert_eq!(err.os_code(), Some(1450));
    }

    #[test]
    fn test_default_limit_failure_closes_handle() {
        let api = RecordingJobApi::new();
        api.fail_next(Op::SetExtendedLimits, 5);

        let err = ResourceGroup::with_api(api.clone()).unwrap_err();
        assert!(matches!(
            err,
            JobError::LimitUpdateFailed {
                kind: LimitKind::Memory,
                ..
            }
        ));
        assert_eq!(api.open_handle_count(), 0);
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = ResourceGroup::named_with_api(RecordingJobApi::new(), "").unwrap_err();
        assert!(matches!(err, JobError::InvalidConfig(_)));
    }

    #[test]
    fn test_dispose_state() {
        let mut group = ResourceGroup::with_api(RecordingJobApi::new()).unwrap();
        assert!(!group.is_disposed());
        assert!(group.raw_handle().is_some());

        group.dispose();
        assert!(group.is_disposed());
        assert!(group.raw_handle().is_none());
        assert!(matches!(
            group.ensure_active(),
            Err(JobError::AlreadyDisposed)
        ));
    }

    #[test]
    fn test_builder_applies_limits() {
        let api = RecordingJobApi::new();
        let group = ResourceGroupBuilder::new()
            .name("builder")
            .working_set(1 << 20, 8 << 20)
            .max_job_memory_str("64M")
            .unwrap()
            .cpu_rate(0.5)
            .build_with_api(api)
            .unwrap();

        assert_eq!(group.name(), Some("builder"));
        let memory = group.memory_limits().unwrap();
        assert_eq!(memory.min_working_set, Some(1 << 20));
        assert_eq!(memory.max_working_set, Some(8 << 20));
        assert_eq!(memory.max_job_memory, Some(64 << 20));
        assert_eq!(group.cpu_rate_control().unwrap().rate, 5000);
    }

    #[test]
    fn test_builder_rejects_invalid_before_creating() {
        let api = RecordingJobApi::new();
        let result = ResourceGroupBuilder::new()
            .cpu_rate(-1.0)
            .build_with_api(api.clone());

        assert!(matches!(result, Err(JobError::InvalidConfig(_))));
        assert_eq!(api.call_count(Op::CreateJob), 0);
    }

    #[test]
    fn test_builder_disposes_on_apply_failure() {
        let api = RecordingJobApi::new();
        api.fail_next(Op::SetCpuRate, 87);

        let result = ResourceGroupBuilder::new()
            .cpu_rate(0.5)
            .build_with_api(api.clone());

        assert!(matches!(
            result,
            Err(JobError::LimitUpdateFailed {
                kind: LimitKind::CpuRate,
                ..
            })
        ));
        assert_eq!(api.open_handle_count(), 0);
    }

    #[test]
    fn test_builder_from_limits_config() {
        let config = LimitsConfig::from_json_str(r#"{"cpu_rate": 0.25}"#).unwrap();
        let group = ResourceGroupBuilder::new()
            .limits(config)
            .build_with_api(RecordingJobApi::new())
            .unwrap();

        assert_eq!(group.cpu_rate_limit().unwrap(), Some(0.25));
        assert_eq!(group.memory_limits().unwrap(), MemoryLimits::default());
    }
}
