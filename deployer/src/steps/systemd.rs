//! Systemd units step

use async_trait::async_trait;
use tracing::{debug, info};

use crate::errors::DeployerError;
use crate::ssh::RemoteSession;
use crate::utils::extract_checksum;

use super::{upload_file, Step, StepContext};

/// Unit supervising the minion executable
pub const MINION_SERVICE: &str = "salt-minion.service";

/// Installs, enables and starts the minion service and the grains
/// service/timer pair
pub struct SystemdStep {
    context: StepContext,
}

impl SystemdStep {
    pub fn new(context: StepContext) -> Self {
        Self { context }
    }

    async fn check_unit_states(&self) -> Result<bool, DeployerError> {
        let commands = [
            (
                "minion service is enabled",
                "sudo systemctl is-enabled salt-minion.service",
            ),
            (
                "minion service is started",
                "sudo systemctl is-active salt-minion.service",
            ),
            (
                "grains timer is enabled",
                "sudo systemctl is-enabled salt-update-grains.timer",
            ),
            (
                "grains timer is started",
                "sudo systemctl is-active salt-update-grains.timer",
            ),
            (
                "grains service is enabled",
                "sudo systemctl is-enabled salt-update-grains.service",
            ),
        ];

        for (action, command) in commands {
            debug!("{}: check if {}", self.context.hostname, action);
            let output = self.context.session.run(command).await?;

            if !output.success() {
                info!("{}: check {}: failed", self.context.hostname, action);
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn check_unit_checksums(&self) -> Result<bool, DeployerError> {
        for unit in self.context.artifacts.systemd_units() {
            debug!("{}: check sha256 of {}", self.context.hostname, unit.name);
            let output = self
                .context
                .session
                .run(&format!("sha256sum /etc/systemd/system/{}", unit.name))
                .await?;

            if !output.success() {
                info!("{}: check {}: failed", self.context.hostname, unit.name);
                return Ok(false);
            }
            if extract_checksum(&output.stdout) != unit.sha256 {
                info!("{}: {} is outdated", self.context.hostname, unit.name);
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl Step for SystemdStep {
    fn name(&self) -> &'static str {
        "systemd"
    }

    async fn check(&self) -> Result<bool, DeployerError> {
        let states = self.check_unit_states().await?;
        let checksums = self.check_unit_checksums().await?;
        Ok(states && checksums)
    }

    async fn apply(&self) -> Result<bool, DeployerError> {
        for unit in self.context.artifacts.systemd_units() {
            if !upload_file(
                self.context.session.as_ref(),
                &self.context.hostname,
                unit.bytes,
                "/etc/systemd/system",
                unit.name,
            )
            .await?
            {
                return Ok(false);
            }
        }

        // daemon-reload first so enable/start see the fresh unit files
        let mut commands = vec![(
            "reload systemd".to_string(),
            "sudo systemctl daemon-reload".to_string(),
        )];
        for unit in self.context.artifacts.systemd_units() {
            commands.push((
                format!("enable {}", unit.name),
                format!("sudo systemctl enable {}", unit.name),
            ));
            commands.push((
                format!("start {}", unit.name),
                format!("sudo systemctl start {}", unit.name),
            ));
        }

        for (action, command) in &commands {
            debug!("{}: {}", self.context.hostname, action);
            let output = self.context.session.run(command).await?;
            if !output.success() {
                info!("{}: {}: failed", self.context.hostname, action);
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Restart the minion service. Used by the pipeline after a run that
/// changed anything on the device.
pub async fn restart_minion(session: &dyn RemoteSession) -> Result<bool, DeployerError> {
    let output = session
        .run("sudo systemctl restart salt-minion.service")
        .await?;
    Ok(output.success())
}
