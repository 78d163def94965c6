//! Grains refresh script step
//!
//! The systemd wiring for the script lives in the systemd step.

use async_trait::async_trait;
use tracing::debug;

use crate::errors::DeployerError;
use crate::utils::extract_checksum;

use super::{upload_file, Step, StepContext};

/// Keeps /opt/salt/update_grains.py identical to the embedded script
pub struct GrainsStep {
    context: StepContext,
}

impl GrainsStep {
    pub fn new(context: StepContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Step for GrainsStep {
    fn name(&self) -> &'static str {
        "grains"
    }

    async fn check(&self) -> Result<bool, DeployerError> {
        debug!(
            "{}: check if update_grains.py is present on remote",
            self.context.hostname
        );

        let output = self
            .context
            .session
            .run("sha256sum /opt/salt/update_grains.py")
            .await?;

        if !output.success() {
            debug!("{}: check failed", self.context.hostname);
            return Ok(false);
        }

        Ok(extract_checksum(&output.stdout) == self.context.artifacts.grains_script().sha256)
    }

    async fn apply(&self) -> Result<bool, DeployerError> {
        debug!("{}: pushing update_grains.py", self.context.hostname);
        upload_file(
            self.context.session.as_ref(),
            &self.context.hostname,
            self.context.artifacts.grains_script().bytes,
            "/opt/salt",
            "update_grains.py",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::artifacts::ArtifactStore;
    use crate::ssh::testing::MockSession;

    fn step(session: Arc<MockSession>) -> GrainsStep {
        GrainsStep::new(StepContext {
            session,
            hostname: "switch-01".to_string(),
            sonic_version: "202311".to_string(),
            artifacts: Arc::new(ArtifactStore::for_tests(HashMap::new(), "", "")),
        })
    }

    #[tokio::test]
    async fn test_check_satisfied() {
        let expected = {
            let artifacts = ArtifactStore::for_tests(HashMap::new(), "", "");
            artifacts.grains_script().sha256.clone()
        };
        let session = Arc::new(MockSession::new().respond(
            "sha256sum /opt/salt/update_grains.py",
            &format!("{}  /opt/salt/update_grains.py\n", expected),
            0,
        ));
        assert!(step(session).check().await.unwrap());
    }

    #[tokio::test]
    async fn test_check_missing_script() {
        let session = Arc::new(
            MockSession::new().respond("sha256sum /opt/salt/update_grains.py", "", 1),
        );
        assert!(!step(session).check().await.unwrap());
    }

    #[tokio::test]
    async fn test_check_stale_script() {
        let session = Arc::new(MockSession::new().respond(
            "sha256sum /opt/salt/update_grains.py",
            "1111111111111111111111111111111111111111111111111111111111111111  /opt/salt/update_grains.py\n",
            0,
        ));
        assert!(!step(session).check().await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_uploads_embedded_script() {
        let session = Arc::new(MockSession::new());
        assert!(step(session.clone()).apply().await.unwrap());

        let uploads = session.recorded_uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "/tmp/update_grains.py");
        assert!(!uploads[0].1.is_empty());

        let commands = session.recorded_commands();
        assert!(commands
            .iter()
            .any(|c| c == "sudo mv /tmp/update_grains.py /opt/salt/update_grains.py"));
    }
}
