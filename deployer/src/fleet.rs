//! Fleet orchestration
//!
//! Runs one device task per hostname, all at once, and folds every result
//! into a [`FleetReport`]. A device failing, misbehaving or even panicking
//! never takes the rest of the fleet down; each hostname ends up in exactly
//! one report bucket.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use colored::Colorize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::artifacts::ArtifactStore;
use crate::credentials::CredentialSet;
use crate::device::session::{Device, PipelineStatus};
use crate::errors::DeployerError;
use crate::metrics::DeploymentGauge;
use crate::shutdown::ShutdownState;
use crate::ssh::ConnectOptions;

/// Terminal status of one device run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// The pipeline ran and every step is satisfied
    Succeeded,

    /// Every step was already satisfied, nothing was deployed
    AlreadyUpToDate,

    /// Dry-run only: at least one step is not satisfied
    NeedsDeployment,

    /// The pipeline stopped at a failing step or the device misbehaved
    Failed,

    /// No credential produced an authenticated session
    ConnectionFailed,
}

/// What one device run ended with
#[derive(Debug, Clone)]
pub struct DeviceOutcome {
    pub hostname: String,
    pub status: OutcomeStatus,
    pub reason: Option<String>,
}

impl DeviceOutcome {
    pub fn new(hostname: &str, status: OutcomeStatus) -> Self {
        Self {
            hostname: hostname.to_string(),
            status,
            reason: None,
        }
    }

    pub fn with_reason(hostname: &str, status: OutcomeStatus, reason: String) -> Self {
        Self {
            hostname: hostname.to_string(),
            status,
            reason: Some(reason),
        }
    }
}

/// Aggregated result of one fleet run
#[derive(Debug, Default)]
pub struct FleetReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub dry_run: bool,
}

impl FleetReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }

    fn record(&mut self, outcome: &DeviceOutcome) {
        match outcome.status {
            OutcomeStatus::Succeeded | OutcomeStatus::AlreadyUpToDate => {
                self.succeeded.push(outcome.hostname.clone())
            }
            OutcomeStatus::NeedsDeployment
            | OutcomeStatus::Failed
            | OutcomeStatus::ConnectionFailed => self.failed.push(outcome.hostname.clone()),
        }
    }

    /// True when no device failed (under dry-run: none needs a deployment)
    pub fn all_clear(&self) -> bool {
        self.failed.is_empty()
    }

    /// Log the fleet summary
    pub fn log(&self) {
        let (ok_label, nok_label) = if self.dry_run {
            ("already_deployed", "to_deploy")
        } else {
            ("succeeded", "failed")
        };

        info!("{}: {:?}", ok_label, self.succeeded);
        info!("{}: {:?}", nok_label, self.failed);

        let ok_count = self.succeeded.len().to_string();
        let nok_count = self.failed.len().to_string();
        warn!(
            "********* FINISHED ({}: {}, {}: {}) *********",
            ok_label,
            ok_count.green(),
            nok_label,
            nok_count.red(),
        );
    }
}

/// What to do with a device once its readiness is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPlan {
    /// Record the status without touching the device
    ReportOnly(OutcomeStatus),

    /// Run the deployment pipeline
    Deploy,
}

/// Decide the run plan for one device.
///
/// dry-run never deploys; force deploys even when the device is ready.
pub fn plan_action(ready: bool, force: bool, dry_run: bool) -> RunPlan {
    if dry_run {
        return RunPlan::ReportOnly(if ready {
            OutcomeStatus::AlreadyUpToDate
        } else {
            OutcomeStatus::NeedsDeployment
        });
    }
    if !force && ready {
        return RunPlan::ReportOnly(OutcomeStatus::AlreadyUpToDate);
    }
    RunPlan::Deploy
}

/// Shared dependencies handed to every device task
#[derive(Clone)]
pub struct FleetContext {
    pub credentials: CredentialSet,
    pub artifacts: Arc<ArtifactStore>,
    pub gauge: Arc<DeploymentGauge>,
    pub shutdown: Arc<ShutdownState>,
    pub connect: ConnectOptions,
    pub force: bool,
    pub dry_run: bool,
}

/// Run the full lifecycle on one device.
///
/// Never returns an error: every failure is folded into the outcome so the
/// fleet loop stays failure-agnostic.
pub async fn deploy_one(hostname: String, context: FleetContext) -> DeviceOutcome {
    warn!("********* {} *********", hostname);
    let mut device = Device::new(
        &hostname,
        Arc::clone(&context.artifacts),
        Arc::clone(&context.gauge),
        Arc::clone(&context.shutdown),
    );

    if let Err(e) = device.connect(&context.credentials, &context.connect).await {
        let status = match e {
            DeployerError::ConnectionError(_) => OutcomeStatus::ConnectionFailed,
            _ => OutcomeStatus::Failed,
        };
        error!("{}: {}", hostname, e);
        return DeviceOutcome::with_reason(&hostname, status, e.to_string());
    }

    warn!("{}: checking if minion needs to be installed", hostname);
    let ready = match device.is_ready().await {
        Ok(ready) => ready,
        Err(e) => {
            error!("{}: readiness check failed: {}", hostname, e);
            device.disconnect().await;
            return DeviceOutcome::with_reason(&hostname, OutcomeStatus::Failed, e.to_string());
        }
    };

    let outcome = match plan_action(ready, context.force, context.dry_run) {
        RunPlan::ReportOnly(status) => {
            if status == OutcomeStatus::AlreadyUpToDate {
                if !context.dry_run {
                    warn!("{}: minion is already installed", hostname);
                }
                if let Err(e) = device.mark_up_to_date() {
                    debug!("{}: {}", hostname, e);
                }
            }
            DeviceOutcome::new(&hostname, status)
        }
        RunPlan::Deploy => {
            warn!("{}: starting deployment", hostname);
            match device.deploy(context.force).await {
                Ok(PipelineStatus::Completed { .. }) => {
                    DeviceOutcome::new(&hostname, OutcomeStatus::Succeeded)
                }
                Ok(PipelineStatus::StepFailed { step }) => DeviceOutcome::with_reason(
                    &hostname,
                    OutcomeStatus::Failed,
                    format!("{} step failed", step),
                ),
                Ok(PipelineStatus::Interrupted) => DeviceOutcome::with_reason(
                    &hostname,
                    OutcomeStatus::Failed,
                    "interrupted by a shutdown request".to_string(),
                ),
                Err(e) => {
                    error!("{}: deployment failed: {}", hostname, e);
                    DeviceOutcome::with_reason(&hostname, OutcomeStatus::Failed, e.to_string())
                }
            }
        }
    };

    device.disconnect().await;
    outcome
}

/// Deploy on every device concurrently and aggregate the outcomes.
///
/// Generic over the per-device future so the fan-out/fan-in logic can be
/// exercised without SSH. A panicking device task is recorded as failed
/// through its task id.
pub async fn run_fleet<D, F>(hostnames: &[String], dry_run: bool, deploy: D) -> FleetReport
where
    D: Fn(String) -> F,
    F: Future<Output = DeviceOutcome> + Send + 'static,
{
    warn!("Starting deployment");

    let mut tasks = JoinSet::new();
    let mut names: HashMap<tokio::task::Id, String> = HashMap::new();
    for hostname in hostnames {
        let span = info_span!("device", hostname = %hostname);
        let handle = tasks.spawn(deploy(hostname.clone()).instrument(span));
        names.insert(handle.id(), hostname.clone());
    }

    let mut report = FleetReport::new(dry_run);
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((_, outcome)) => report.record(&outcome),
            Err(e) => {
                let hostname = names.get(&e.id()).cloned().unwrap_or_default();
                let reason = if e.is_panic() {
                    "device task panicked"
                } else {
                    "device task was cancelled"
                };
                error!("{}: {}", hostname, reason);
                report.record(&DeviceOutcome::with_reason(
                    &hostname,
                    OutcomeStatus::Failed,
                    reason.to_string(),
                ));
            }
        }
    }
    report
}
