//! DNS and minion configuration step

use async_trait::async_trait;
use tracing::{debug, info};

use crate::errors::DeployerError;

use super::{systemd, upload_file, Step, StepContext};

/// Keeps /etc/resolv.conf, /etc/resolvconf.conf and /etc/salt/minion in the
/// prepared state
pub struct ConfigStep {
    context: StepContext,
}

impl ConfigStep {
    pub fn new(context: StepContext) -> Self {
        Self { context }
    }

    async fn check_dns_configuration(&self) -> Result<bool, DeployerError> {
        debug!("{}: check DNS servers configuration", self.context.hostname);

        let output = self.context.session.run("cat /etc/resolv.conf").await?;
        if output.stdout.trim_end() != self.context.artifacts.resolv_conf() {
            info!(
                "{}: check DNS servers configuration: failed",
                self.context.hostname
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn check_no_automatic_changes(&self) -> Result<bool, DeployerError> {
        debug!(
            "{}: check automatic changes on resolv.conf disabled",
            self.context.hostname
        );

        let output = self
            .context
            .session
            .run("grep 'resolvconf=NO' /etc/resolvconf.conf")
            .await?;
        if !output.success() {
            info!(
                "{}: check automatic changes on resolv.conf disabled: failed",
                self.context.hostname
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn check_minion_configuration(&self) -> Result<bool, DeployerError> {
        debug!("{}: check minion configuration", self.context.hostname);

        let output = self.context.session.run("sudo cat /etc/salt/minion").await?;
        if output.stdout.trim_end() != self.context.artifacts.minion_config().trim_end() {
            info!("{}: check minion configuration: failed", self.context.hostname);
            return Ok(false);
        }
        Ok(true)
    }

    async fn apply_dns_configuration(&self) -> Result<bool, DeployerError> {
        // resolvconf=NO keeps DHCP from rewriting the file afterwards,
        // see https://wiki.debian.org/resolv.conf
        let commands = [
            (
                "configure DNS servers",
                format!(
                    "echo '{}' | sudo tee /etc/resolv.conf",
                    self.context.artifacts.resolv_conf()
                ),
            ),
            (
                "disable automatic changes",
                "echo 'resolvconf=NO' | sudo tee /etc/resolvconf.conf".to_string(),
            ),
        ];

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

    async fn apply_minion_configuration(&self) -> Result<bool, DeployerError> {
        if !upload_file(
            self.context.session.as_ref(),
            &self.context.hostname,
            self.context.artifacts.minion_config().as_bytes(),
            "/etc/salt",
            "minion",
        )
        .await?
        {
            return Ok(false);
        }

        let commands = [
            ("change permission", "sudo chmod 600 /etc/salt/minion"),
            (
                "get back pki after an upgrade",
                "if [ ! -d /etc/sonic/salt ] && [ -d /etc/sonic/old_config/salt ] ; \
                 then sudo cp -r /etc/sonic/old_config/salt /etc/sonic/ ; fi",
            ),
        ];

        for (action, command) in commands {
            debug!("{}: {}", self.context.hostname, action);
            let output = self.context.session.run(command).await?;
            if !output.success() {
                info!("{}: {}: failed", self.context.hostname, action);
                return Ok(false);
            }
        }

        // pick up the new configuration right away when the minion is
        // already running
        let status = self
            .context
            .session
            .run("sudo systemctl is-active salt-minion.service")
            .await?;
        if status.success() && !systemd::restart_minion(self.context.session.as_ref()).await? {
            return Ok(false);
        }

        Ok(true)
    }
}

#[async_trait]
impl Step for ConfigStep {
    fn name(&self) -> &'static str {
        "config"
    }

    async fn check(&self) -> Result<bool, DeployerError> {
        // evaluate every condition so the logs name all drifted files
        let dns = self.check_dns_configuration().await?;
        let locked = self.check_no_automatic_changes().await?;
        let minion = self.check_minion_configuration().await?;
        Ok(dns && locked && minion)
    }

    async fn apply(&self) -> Result<bool, DeployerError> {
        if !self.apply_dns_configuration().await? {
            return Ok(false);
        }
        self.apply_minion_configuration().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::artifacts::ArtifactStore;
    use crate::ssh::testing::MockSession;

    const RESOLV: &str = "nameserver 10.0.0.53\nnameserver 10.0.1.53";
    const MINION_CONFIG: &str = "master: salt.example.net\nid_function:\n  grain: fqdn\n";

    fn step(session: Arc<MockSession>) -> ConfigStep {
        ConfigStep::new(StepContext {
            session,
            hostname: "switch-01".to_string(),
            sonic_version: "202311".to_string(),
            artifacts: Arc::new(ArtifactStore::for_tests(
                HashMap::new(),
                RESOLV,
                MINION_CONFIG,
            )),
        })
    }

    fn satisfied_session() -> MockSession {
        MockSession::new()
            .respond("cat /etc/resolv.conf", &format!("{}\n", RESOLV), 0)
            .respond("sudo cat /etc/salt/minion", MINION_CONFIG, 0)
    }

    #[tokio::test]
    async fn test_check_satisfied() {
        let session = Arc::new(satisfied_session());
        assert!(step(session).check().await.unwrap());
    }

    #[tokio::test]
    async fn test_check_runs_every_condition_on_drift() {
        // resolv.conf drifted, the two other conditions still evaluated
        let session = Arc::new(
            MockSession::new()
                .respond("cat /etc/resolv.conf", "nameserver 8.8.8.8\n", 0)
                .respond("sudo cat /etc/salt/minion", MINION_CONFIG, 0),
        );
        let config = step(session.clone());

        assert!(!config.check().await.unwrap());
        assert_eq!(
            session.recorded_commands(),
            vec![
                "cat /etc/resolv.conf",
                "grep 'resolvconf=NO' /etc/resolvconf.conf",
                "sudo cat /etc/salt/minion",
            ]
        );
    }

    #[tokio::test]
    async fn test_check_unlocked_resolvconf() {
        let session = Arc::new(
            satisfied_session().respond("grep 'resolvconf=NO' /etc/resolvconf.conf", "", 1),
        );
        assert!(!step(session).check().await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_pushes_config_and_restarts_running_minion() {
        let session = Arc::new(MockSession::new());
        assert!(step(session.clone()).apply().await.unwrap());

        let uploads = session.recorded_uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "/tmp/minion");
        assert_eq!(uploads[0].1, MINION_CONFIG.as_bytes());

        let commands = session.recorded_commands();
        assert!(commands[0].starts_with("echo 'nameserver 10.0.0.53"));
        assert!(commands.contains(&"sudo chmod 600 /etc/salt/minion".to_string()));
        // is-active defaulted to success, so the restart must have run
        assert!(commands.contains(&"sudo systemctl restart salt-minion.service".to_string()));
    }

    #[tokio::test]
    async fn test_apply_skips_restart_when_minion_inactive() {
        let session = Arc::new(
            MockSession::new().respond("sudo systemctl is-active salt-minion.service", "inactive", 3),
        );
        assert!(step(session.clone()).apply().await.unwrap());
        assert!(!session
            .recorded_commands()
            .contains(&"sudo systemctl restart salt-minion.service".to_string()));
    }

    #[tokio::test]
    async fn test_apply_fails_when_tee_fails() {
        let resolv_cmd = format!("echo '{}' | sudo tee /etc/resolv.conf", RESOLV);
        let session = Arc::new(MockSession::new().respond(&resolv_cmd, "", 1));
        assert!(!step(session.clone()).apply().await.unwrap());
        // minion config never touched
        assert!(session.recorded_uploads().is_empty());
    }
}
