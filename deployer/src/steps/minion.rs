//! Minion executable step

use async_trait::async_trait;
use tracing::{debug, info};

use crate::errors::DeployerError;
use crate::utils::extract_checksum;

use super::{upload_file, Step, StepContext};

/// Path of the minion PEX on the device
pub const MINION_PATH: &str = "/opt/salt/salt-minion";

/// Ensures the device runs the minion build pinned to its SONiC release
pub struct MinionStep {
    context: StepContext,
}

impl MinionStep {
    pub fn new(context: StepContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Step for MinionStep {
    fn name(&self) -> &'static str {
        "minion"
    }

    async fn check(&self) -> Result<bool, DeployerError> {
        let artifact = self
            .context
            .artifacts
            .minion(&self.context.sonic_version)?;

        let commands = [
            ("if minion is present", "ls /opt/salt/salt-minion"),
            (
                "if minion is executable",
                "if [ ! -x /opt/salt/salt-minion ]; then exit 1 ; fi",
            ),
            ("file checksum", "sha256sum /opt/salt/salt-minion"),
        ];

        let mut checksum = String::new();
        for (action, command) in commands {
            debug!("{}: check {}", self.context.hostname, action);
            let output = self.context.session.run(command).await?;

            if !output.success() {
                info!("{}: check {}: failed", self.context.hostname, action);
                return Ok(false);
            }

            if action == "file checksum" {
                checksum = extract_checksum(&output.stdout);
            }
        }

        Ok(checksum == artifact.sha256)
    }

    async fn apply(&self) -> Result<bool, DeployerError> {
        let artifact = self
            .context
            .artifacts
            .minion(&self.context.sonic_version)?;

        if !upload_file(
            self.context.session.as_ref(),
            &self.context.hostname,
            &artifact.payload,
            "/opt/salt",
            "salt-minion",
        )
        .await?
        {
            return Ok(false);
        }

        debug!("{}: make the minion executable", self.context.hostname);
        let output = self
            .context
            .session
            .run("sudo chmod +x /opt/salt/salt-minion")
            .await?;
        Ok(output.success())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::artifacts::{ArtifactStore, MinionArtifact};
    use crate::ssh::testing::MockSession;
    use crate::utils::sha256_hash;

    fn minion_store() -> (Arc<ArtifactStore>, String) {
        let payload = b"#!/usr/bin/env python\nPK-payload".to_vec();
        let sha256 = sha256_hash(&payload);
        let mut minions = HashMap::new();
        minions.insert(
            "202311".to_string(),
            MinionArtifact {
                payload,
                sha256: sha256.clone(),
            },
        );
        let store = ArtifactStore::for_tests(minions, "nameserver 10.0.0.53", "master: salt");
        (Arc::new(store), sha256)
    }

    fn step(session: Arc<MockSession>, sonic_version: &str) -> MinionStep {
        let (artifacts, _) = minion_store();
        MinionStep::new(StepContext {
            session,
            hostname: "switch-01".to_string(),
            sonic_version: sonic_version.to_string(),
            artifacts,
        })
    }

    #[tokio::test]
    async fn test_check_satisfied() {
        let (_, sha256) = minion_store();
        let session = Arc::new(MockSession::new().respond(
            "sha256sum /opt/salt/salt-minion",
            &format!("{}  /opt/salt/salt-minion\n", sha256),
            0,
        ));
        let step = step(session.clone(), "202311");

        assert!(step.check().await.unwrap());
        // check is pure: repeatable and never uploads
        assert!(step.check().await.unwrap());
        assert!(session.recorded_uploads().is_empty());
    }

    #[tokio::test]
    async fn test_check_missing_binary_short_circuits() {
        let session =
            Arc::new(MockSession::new().respond("ls /opt/salt/salt-minion", "", 2));
        let step = step(session.clone(), "202311");

        assert!(!step.check().await.unwrap());
        assert_eq!(session.recorded_commands(), vec!["ls /opt/salt/salt-minion"]);
    }

    #[tokio::test]
    async fn test_check_checksum_mismatch() {
        let session = Arc::new(MockSession::new().respond(
            "sha256sum /opt/salt/salt-minion",
            "0000000000000000000000000000000000000000000000000000000000000000  /opt/salt/salt-minion\n",
            0,
        ));
        let step = step(session, "202311");
        assert!(!step.check().await.unwrap());
    }

    #[tokio::test]
    async fn test_check_unknown_version_is_an_error() {
        let step = step(Arc::new(MockSession::new()), "209999");
        assert!(step.check().await.is_err());
    }

    #[tokio::test]
    async fn test_apply_uploads_and_marks_executable() {
        let session = Arc::new(MockSession::new());
        let step = step(session.clone(), "202311");

        assert!(step.apply().await.unwrap());

        let uploads = session.recorded_uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "/tmp/salt-minion");
        assert!(uploads[0].1.starts_with(b"#!/usr/bin/env python"));

        let commands = session.recorded_commands();
        assert_eq!(
            commands.last().map(String::as_str),
            Some("sudo chmod +x /opt/salt/salt-minion")
        );
    }

    #[tokio::test]
    async fn test_apply_failed_upload() {
        let session = Arc::new(MockSession::new().failing_uploads());
        let step = step(session.clone(), "202311");

        assert!(!step.apply().await.unwrap());
        assert!(session.recorded_commands().is_empty());
    }

    #[tokio::test]
    async fn test_apply_then_check_converges() {
        let (_, sha256) = minion_store();
        let session = Arc::new(MockSession::new().respond(
            "sha256sum /opt/salt/salt-minion",
            &format!("{}  /opt/salt/salt-minion\n", sha256),
            0,
        ));
        let step = step(session, "202311");

        assert!(step.apply().await.unwrap());
        assert!(step.check().await.unwrap());
    }
}
