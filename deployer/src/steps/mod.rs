//! Idempotent deployment steps
//!
//! Each step owns one concern on the device and exposes `check` (is the
//! concern already satisfied?) and `apply` (make it so). Steps never decide
//! ordering or skipping, that is the pipeline's job.

pub mod config;
pub mod grains;
pub mod minion;
pub mod systemd;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::artifacts::ArtifactStore;
use crate::errors::DeployerError;
use crate::ssh::RemoteSession;

/// One idempotent unit of deployment work.
///
/// `Ok(false)` means "not satisfied" (check) or "could not be applied"
/// (apply); `Err` is reserved for transport faults. A successful `apply`
/// does not certify the step, the caller re-runs `check` for that.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self) -> Result<bool, DeployerError>;

    async fn apply(&self) -> Result<bool, DeployerError>;
}

/// Everything a step needs to work on one device
#[derive(Clone)]
pub struct StepContext {
    pub session: Arc<dyn RemoteSession>,
    pub hostname: String,
    pub sonic_version: String,
    pub artifacts: Arc<ArtifactStore>,
}

/// Build the full step list for one device, in deployment order: the minion
/// binary and its helpers first, unit activation last.
pub fn bind_steps(context: &StepContext) -> Vec<Box<dyn Step>> {
    vec![
        Box::new(minion::MinionStep::new(context.clone())),
        Box::new(grains::GrainsStep::new(context.clone())),
        Box::new(config::ConfigStep::new(context.clone())),
        Box::new(systemd::SystemdStep::new(context.clone())),
    ]
}

/// Upload a payload to /tmp and move it into place owned by root.
///
/// Plain `cat`/`mv` cannot write below /etc or /opt on SONiC, hence the
/// two-phase dance through /tmp.
pub(crate) async fn upload_file(
    session: &dyn RemoteSession,
    hostname: &str,
    payload: &[u8],
    remote_dir: &str,
    remote_name: &str,
) -> Result<bool, DeployerError> {
    let tmp_path = format!("/tmp/{}", remote_name);
    debug!("{}: pushing {} to remote", hostname, remote_name);
    if !session.upload(payload, &tmp_path).await? {
        info!("{}: upload of {} failed", hostname, remote_name);
        return Ok(false);
    }

    let remote_path = format!("{}/{}", remote_dir.trim_end_matches('/'), remote_name);
    info!("{}: move {} to {}", hostname, remote_name, remote_path);
    let commands = [
        (
            format!("ensure {} exists", remote_dir),
            format!("sudo mkdir -p {}", remote_dir),
        ),
        (
            format!("move file to {}", remote_dir),
            format!("sudo mv {} {}", tmp_path, remote_path),
        ),
        (
            "change owner to root".to_string(),
            format!("sudo chown -R root:root {}", remote_path),
        ),
    ];

    for (action, command) in &commands {
        debug!("{}: {}", hostname, action);
        if !session.run(command).await?.success() {
            info!("{}: {}: failed", hostname, action);
            return Ok(false);
        }
    }

    Ok(true)
}
