//! Confined launch tests against the in-memory backend

use std::path::Path;
use std::time::Duration;

use jobgroup::launcher::ABORTED_EXIT_CODE;
use jobgroup::sys::recording::{Op, ProcessState, STATUS_NO_MEMORY};
use jobgroup::sys::{CreationFlags, RecordingJobApi};
use jobgroup::{
    ConfinedProcessLauncher, JobError, LaunchConfig, ResourceGroup, ResourceGroupBuilder,
};

fn setup() -> (
    RecordingJobApi,
    ConfinedProcessLauncher<RecordingJobApi>,
    ResourceGroup<RecordingJobApi>,
) {
    let api = RecordingJobApi::new();
    let launcher = ConfinedProcessLauncher::with_api(api.clone());
    let group = ResourceGroup::with_api(api.clone()).expect("create group");
    (api, launcher, group)
}

#[test]
fn confined_launch_creates_suspended_then_attaches_then_resumes() {
    let (api, launcher, group) = setup();

    let child = launcher
        .launch("worker.exe", &["--once"], None, Some(&group))
        .unwrap();

    let requests = api.create_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].command_line, r#""worker.exe" --once"#);
    assert!(requests[0].flags.contains(CreationFlags::SUSPENDED));
    assert!(requests[0].flags.contains(CreationFlags::BREAKAWAY_FROM_JOB));
    assert!(requests[0].flags.contains(CreationFlags::NO_WINDOW));

    let order: Vec<Op> = api
        .calls()
        .into_iter()
        .filter(|op| {
            matches!(
                op,
                Op::CreateProcess | Op::AssignProcess | Op::ResumeThread
            )
        })
        .collect();
    assert_eq!(
        order,
        vec![Op::CreateProcess, Op::AssignProcess, Op::ResumeThread]
    );

    assert!(child.is_confined());
    assert_eq!(api.process_state(child.id()), Some(ProcessState::Running));
    assert_eq!(
        api.job_members(group.raw_handle().unwrap()),
        vec![child.id()]
    );
}

#[test]
fn unconfined_launch_never_suspends_or_resumes() {
    let (api, launcher, _group) = setup();

    let child = launcher
        .launch::<&str>("worker.exe", &[], None, None)
        .unwrap();

    let request = &api.create_requests()[0];
    assert!(!request.flags.contains(CreationFlags::SUSPENDED));
    assert!(request.flags.contains(CreationFlags::BREAKAWAY_FROM_JOB));
    assert_eq!(api.call_count(Op::ResumeThread), 0);
    assert_eq!(api.call_count(Op::AssignProcess), 0);

    assert!(!child.is_confined());
    assert!(child.is_running().unwrap());
    assert!(!api.is_in_job(child.id()));
}

#[test]
fn setup_handles_are_closed_after_success() {
    let (api, launcher, group) = setup();

    let child = launcher
        .launch::<&str>("worker.exe", &[], None, Some(&group))
        .unwrap();

    // Only the returned reference stays open
    let open = api.open_process_handles();
    assert_eq!(open.len(), 1);
    assert!(open.contains(&child.raw_handle()));

    drop(child);
    assert!(api.open_process_handles().is_empty());
}

#[test]
fn attach_failure_terminates_child() {
    let (api, launcher, group) = setup();
    api.fail_next(Op::AssignProcess, 5);

    let err = launcher
        .launch::<&str>("worker.exe", &[], None, Some(&group))
        .unwrap_err();

    assert!(matches!(err, JobError::AttachFailed { cleanup: None, .. }));
    assert_eq!(err.os_code(), Some(5));

    assert_eq!(api.create_requests().len(), 1);
    assert_eq!(api.call_count(Op::TerminateProcess), 1);
    assert_eq!(api.call_count(Op::ResumeThread), 0);
    assert!(api.open_process_handles().is_empty());
}

#[test]
fn attach_failure_leaves_no_running_child() {
    let (api, launcher, group) = setup();
    api.fail_next(Op::AssignProcess, 5);

    let pid_before = api.spawn_external();
    launcher
        .launch::<&str>("worker.exe", &[], None, Some(&group))
        .unwrap_err();

    // The launched child got the pid after the external one
    let child_pid = pid_before + 4;
    assert_eq!(
        api.process_state(child_pid),
        Some(ProcessState::Exited(ABORTED_EXIT_CODE))
    );
}

#[test]
fn resume_failure_terminates_child() {
    let (api, launcher, group) = setup();
    api.fail_next(Op::ResumeThread, 6);

    let err = launcher
        .launch::<&str>("worker.exe", &[], None, Some(&group))
        .unwrap_err();

    assert!(matches!(err, JobError::ResumeFailed { cleanup: None, .. }));
    let members = api.job_members(group.raw_handle().unwrap());
    assert_eq!(members.len(), 1);
    assert_eq!(
        api.process_state(members[0]),
        Some(ProcessState::Exited(ABORTED_EXIT_CODE))
    );
    assert!(api.open_process_handles().is_empty());
}

#[test]
fn termination_failure_is_nested_under_original_error() {
    let (api, launcher, group) = setup();
    api.fail_next(Op::AssignProcess, 5);
    api.fail_next(Op::TerminateProcess, 6);

    let err = launcher
        .launch::<&str>("worker.exe", &[], None, Some(&group))
        .unwrap_err();

    assert!(matches!(err, JobError::AttachFailed { .. }));
    assert_eq!(err.os_code(), Some(5));
    let cleanup = err.termination_failure().expect("cleanup failure recorded");
    assert_eq!(cleanup.source.code, 6);
    assert!(err.to_string().contains("cleanup also failed"));
    assert!(api.open_process_handles().is_empty());
}

#[test]
fn creation_failure_needs_no_cleanup() {
    let (api, launcher, group) = setup();
    api.fail_next(Op::CreateProcess, 2);

    let err = launcher
        .launch::<&str>("missing.exe", &[], None, Some(&group))
        .unwrap_err();

    assert!(matches!(
        err,
        JobError::ProcessCreationFailed { cleanup: None, .. }
    ));
    assert_eq!(err.os_code(), Some(2));
    assert_eq!(api.call_count(Op::TerminateProcess), 0);
    assert_eq!(api.call_count(Op::CloseHandle), 0);
}

#[test]
fn disposed_group_is_rejected_before_creating() {
    let (api, launcher, mut group) = setup();
    group.dispose();

    let err = launcher
        .launch::<&str>("worker.exe", &[], None, Some(&group))
        .unwrap_err();

    assert!(matches!(err, JobError::AlreadyDisposed));
    assert!(api.create_requests().is_empty());
}

#[test]
fn confined_caller_can_still_launch() {
    let (api, launcher, group) = setup();
    api.set_caller_in_job(true);

    let child = launcher
        .launch::<&str>("worker.exe", &[], None, Some(&group))
        .unwrap();
    assert!(api.is_in_job(child.id()));
}

#[test]
fn working_dir_is_passed_through() {
    let (api, launcher, _group) = setup();

    let config = LaunchConfig::new(r#""C:\tools\worker.exe""#)
        .args(["-n", "2"])
        .working_dir(r"C:\work");
    launcher.launch_config(&config, None).unwrap();

    let request = &api.create_requests()[0];
    assert_eq!(request.command_line, r#""C:\tools\worker.exe" -n 2"#);
    assert_eq!(request.working_dir.as_deref(), Some(Path::new(r"C:\work")));
}

#[test]
fn disposing_group_kills_launched_children() {
    let (api, launcher, mut group) = setup();

    let first = launcher
        .launch::<&str>("a.exe", &[], None, Some(&group))
        .unwrap();
    let second = launcher
        .launch::<&str>("b.exe", &[], None, Some(&group))
        .unwrap();
    let free = launcher.launch::<&str>("c.exe", &[], None, None).unwrap();

    group.dispose();

    assert!(first.try_wait().unwrap().is_some());
    assert!(second.try_wait().unwrap().is_some());
    assert_eq!(free.try_wait().unwrap(), None);
}

#[test]
fn tiny_job_memory_ceiling_kills_child_on_start() {
    let api = RecordingJobApi::new();
    api.set_process_footprint(2 << 20);
    let group = ResourceGroupBuilder::new()
        .max_job_memory(64 * 1024)
        .build_with_api(api.clone())
        .unwrap();
    let launcher = ConfinedProcessLauncher::with_api(api.clone());

    let child = launcher
        .launch("sleep.exe", &["30"], None, Some(&group))
        .unwrap();

    let code = child
        .wait_timeout(Duration::from_secs(5))
        .unwrap()
        .expect("child should have been killed");
    assert_eq!(code, STATUS_NO_MEMORY);
}

#[test]
fn launched_child_can_join_another_group_later() {
    let (api, launcher, _group) = setup();
    let other = ResourceGroup::with_api(api.clone()).unwrap();

    let child = launcher.launch::<&str>("w.exe", &[], None, None).unwrap();
    other.attach(&child).unwrap();

    assert_eq!(api.job_members(other.raw_handle().unwrap()), vec![child.id()]);
}
