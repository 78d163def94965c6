//! Fleet orchestration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sonic_salt_deployer::fleet::{run_fleet, DeviceOutcome, OutcomeStatus};

fn hostnames(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[tokio::test]
async fn test_fleet_mixed_outcomes() {
    let devices = hostnames(&["switch-01", "switch-02", "switch-03"]);

    let report = run_fleet(&devices, false, |hostname| async move {
        match hostname.as_str() {
            "switch-01" => DeviceOutcome::new(&hostname, OutcomeStatus::Succeeded),
            "switch-02" => DeviceOutcome::new(&hostname, OutcomeStatus::AlreadyUpToDate),
            _ => DeviceOutcome::with_reason(
                &hostname,
                OutcomeStatus::Failed,
                "minion step failed".to_string(),
            ),
        }
    })
    .await;

    let mut succeeded = report.succeeded.clone();
    succeeded.sort();
    assert_eq!(succeeded, vec!["switch-01", "switch-02"]);
    assert_eq!(report.failed, vec!["switch-03"]);
    assert!(!report.all_clear());
}

#[tokio::test]
async fn test_fleet_panicking_task_is_recorded_as_failed() {
    let devices = hostnames(&["switch-01", "switch-02"]);

    let report = run_fleet(&devices, false, |hostname| async move {
        if hostname == "switch-02" {
            panic!("device task blew up");
        }
        DeviceOutcome::new(&hostname, OutcomeStatus::Succeeded)
    })
    .await;

    assert_eq!(report.succeeded, vec!["switch-01"]);
    assert_eq!(report.failed, vec!["switch-02"]);
}

#[tokio::test]
async fn test_fleet_every_hostname_lands_in_one_bucket() {
    let devices: Vec<String> = (1..=20).map(|i| format!("switch-{:02}", i)).collect();

    let report = run_fleet(&devices, false, |hostname| async move {
        let id: usize = hostname["switch-".len()..].parse().unwrap();
        if id % 3 == 0 {
            DeviceOutcome::with_reason(&hostname, OutcomeStatus::Failed, "unreachable".to_string())
        } else {
            DeviceOutcome::new(&hostname, OutcomeStatus::Succeeded)
        }
    })
    .await;

    assert_eq!(report.succeeded.len() + report.failed.len(), devices.len());
    let mut all: Vec<String> = report
        .succeeded
        .iter()
        .chain(report.failed.iter())
        .cloned()
        .collect();
    all.sort();
    let mut expected = devices.clone();
    expected.sort();
    assert_eq!(all, expected);
}

#[tokio::test]
async fn test_fleet_dry_run_buckets() {
    let devices = hostnames(&["switch-01", "switch-02"]);

    let report = run_fleet(&devices, true, |hostname| async move {
        if hostname == "switch-01" {
            DeviceOutcome::new(&hostname, OutcomeStatus::AlreadyUpToDate)
        } else {
            DeviceOutcome::new(&hostname, OutcomeStatus::NeedsDeployment)
        }
    })
    .await;

    assert!(report.dry_run);
    assert_eq!(report.succeeded, vec!["switch-01"]);
    assert_eq!(report.failed, vec!["switch-02"]);
}

#[tokio::test]
async fn test_fleet_runs_devices_concurrently() {
    let devices = hostnames(&["switch-01", "switch-02", "switch-03", "switch-04"]);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let report = run_fleet(&devices, false, |hostname| {
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            DeviceOutcome::new(&hostname, OutcomeStatus::Succeeded)
        }
    })
    .await;

    assert_eq!(report.succeeded.len(), devices.len());
    assert_eq!(peak.load(Ordering::SeqCst), devices.len());
}

#[tokio::test]
async fn test_fleet_empty_device_list() {
    let report = run_fleet(&[], false, |hostname| async move {
        DeviceOutcome::new(&hostname, OutcomeStatus::Succeeded)
    })
    .await;

    assert!(report.succeeded.is_empty());
    assert!(report.failed.is_empty());
    assert!(report.all_clear());
}
