//! Tests against real job objects
//!
//! Run on Windows only. They start `cmd.exe` children, so they need no extra
//! tooling but do spawn real processes.
#![cfg(windows)]

use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use jobgroup::{ConfinedProcessLauncher, JobError, ResourceGroup, ResourceGroupBuilder};

const PING_30S: [&str; 5] = ["/c", "ping", "-n", "30", "127.0.0.1"];

#[test]
fn test_tiny_job_memory_kills_child() {
    let group = ResourceGroupBuilder::new()
        .max_job_memory(64 * 1024)
        .build()
        .expect("create group");
    let launcher = ConfinedProcessLauncher::new();

    let child = launcher
        .launch("cmd.exe", &PING_30S, None, Some(&group))
        .expect("launch");

    let code = child
        .wait_timeout(Duration::from_secs(10))
        .expect("wait")
        .expect("child should not survive a 64K ceiling");
    assert_ne!(code, 0);
}

#[test]
fn test_dispose_kills_child() {
    let mut group = ResourceGroup::new().expect("create group");
    let launcher = ConfinedProcessLauncher::new();

    let child = launcher
        .launch("cmd.exe", &PING_30S, None, Some(&group))
        .expect("launch");
    assert!(child.is_running().unwrap());

    group.dispose();
    let code = child.wait_timeout(Duration::from_secs(10)).expect("wait");
    assert!(code.is_some());
}

#[test]
fn test_limits_round_trip_through_the_kernel() {
    let group = ResourceGroup::new().expect("create group");

    group
        .set_memory_limits(Some(1 << 20), Some(32 << 20), Some(256 << 20))
        .unwrap();
    let memory = group.memory_limits().unwrap();
    assert_eq!(memory.max_job_memory, Some(256 << 20));
    assert!(group.extended_limits().unwrap().kills_on_close());

    group.set_cpu_rate_limit(0.5).unwrap();
    assert_eq!(group.cpu_rate_control().unwrap().rate, 5000);
}

#[test]
fn test_unconfined_child_outlives_group() {
    let mut group = ResourceGroup::new().expect("create group");
    let launcher = ConfinedProcessLauncher::new();

    let child = launcher
        .launch("cmd.exe", &PING_30S, None, None)
        .expect("launch");
    group.dispose();

    assert_eq!(child.wait_timeout(Duration::from_millis(500)).unwrap(), None);
    child.terminate(1).unwrap();
}

#[test]
fn test_attach_child_then_dispose_kills_it() {
    let mut group = ResourceGroup::new().expect("create group");
    let mut child = Command::new("cmd.exe")
        .args(PING_30S)
        .stdout(Stdio::null())
        .spawn()
        .expect("spawn");

    group.attach_child(&child).unwrap();
    assert!(child.try_wait().unwrap().is_none());

    group.dispose();

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if child.try_wait().unwrap().is_some() {
            break;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("attached child survived dispose");
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_named_group_collision() {
    let name = format!("jobgroup-e2e-{}", std::process::id());
    let first = ResourceGroup::named(&name).expect("create named group");
    assert_eq!(first.name(), Some(name.as_str()));

    let err = ResourceGroup::named(&name).unwrap_err();
    assert!(matches!(err, JobError::ResourceGroupCreationFailed(_)));
    assert_eq!(err.os_code(), Some(183));

    drop(first);
    assert!(ResourceGroup::named(&name).is_ok());
}
