//! Per-device deployment session
//!
//! A [`Device`] owns one SSH session and drives the full lifecycle on a
//! single switch: credential-fallback authentication, SONiC version
//! detection, step binding, readiness checks and the deployment pipeline.
//! Lifecycle transitions go through the per-run state machine so an illegal
//! call order is a hard error instead of silent misbehavior.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::artifacts::ArtifactStore;
use crate::credentials::{Credential, CredentialSet};
use crate::errors::DeployerError;
use crate::metrics::DeploymentGauge;
use crate::shutdown::ShutdownState;
use crate::ssh::{ConnectOptions, RemoteSession, SshSession};
use crate::steps::{bind_steps, systemd, Step, StepContext};

use super::state::{DeviceEvent, DeviceFsm, DeviceState};

const SONIC_RELEASE_COMMAND: &str = "cat /etc/sonic/sonic_release 2> /dev/null";
const SONIC_VERSION_FALLBACK_COMMAND: &str =
    "show version 2> /dev/null | sed -En 's/SONiC Software Version: SONiC\\.([0-9]{6}).*/\\1/p'";

/// Terminal result of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    /// Every step is satisfied; `changed` tells whether anything was applied
    Completed { changed: bool },

    /// A step could not be applied or failed its check after apply
    StepFailed { step: &'static str },

    /// A shutdown request ended the run between mutation regions
    Interrupted,
}

/// A SONiC device and how to bring its Salt minion up to date
pub struct Device {
    hostname: String,
    fsm: DeviceFsm,
    sonic_version: Option<String>,
    session: Option<Arc<dyn RemoteSession>>,
    steps: Vec<Box<dyn Step>>,
    artifacts: Arc<ArtifactStore>,
    gauge: Arc<DeploymentGauge>,
    shutdown: Arc<ShutdownState>,
}

impl Device {
    pub fn new(
        hostname: &str,
        artifacts: Arc<ArtifactStore>,
        gauge: Arc<DeploymentGauge>,
        shutdown: Arc<ShutdownState>,
    ) -> Self {
        Self {
            hostname: hostname.to_string(),
            fsm: DeviceFsm::new(),
            sonic_version: None,
            session: None,
            steps: Vec::new(),
            artifacts,
            gauge,
            shutdown,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn state(&self) -> &DeviceState {
        self.fsm.state()
    }

    pub fn sonic_version(&self) -> Option<&str> {
        self.sonic_version.as_deref()
    }

    /// Open the SSH session, detect the SONiC version and bind the steps.
    ///
    /// Credentials are tried in order; the device ends up `Connected` only
    /// when one of them authenticates and a version was detected.
    pub async fn connect(
        &mut self,
        credentials: &CredentialSet,
        options: &ConnectOptions,
    ) -> Result<(), DeployerError> {
        self.transition(DeviceEvent::Connect)?;

        let connected = authenticate(&self.hostname, credentials, |credential| {
            let hostname = self.hostname.clone();
            let options = options.clone();
            async move {
                SshSession::connect(&hostname, &credential.username, &credential.secret, &options)
                    .await
            }
        })
        .await;

        let session: Arc<dyn RemoteSession> = match connected {
            Ok(session) => Arc::new(session),
            Err(e) => {
                self.transition(DeviceEvent::ConnectFailed(e.to_string()))?;
                return Err(e);
            }
        };

        let sonic_version = match detect_version(session.as_ref(), &self.hostname).await {
            Ok(version) => version,
            Err(e) => {
                self.transition(DeviceEvent::VersionDetectionFailed(e.to_string()))?;
                close_session(session.as_ref(), &self.hostname).await;
                return Err(e);
            }
        };
        info!("{}: SONiC version: {}", self.hostname, sonic_version);

        self.transition(DeviceEvent::ConnectSuccess)?;
        self.steps = bind_steps(&StepContext {
            session: Arc::clone(&session),
            hostname: self.hostname.clone(),
            sonic_version: sonic_version.clone(),
            artifacts: Arc::clone(&self.artifacts),
        });
        self.session = Some(session);
        self.sonic_version = Some(sonic_version);
        Ok(())
    }

    /// Check whether every step is already satisfied.
    ///
    /// Stops at the first unsatisfied step and publishes the result on the
    /// status gauge. The device stays in `Checking` so a deployment can
    /// follow either way.
    pub async fn is_ready(&mut self) -> Result<bool, DeployerError> {
        self.transition(DeviceEvent::Check)?;

        if self.steps.is_empty() {
            self.gauge.set(&self.hostname, self.version_label(), 0);
            return Ok(false);
        }
        for step in &self.steps {
            if !step.check().await? {
                info!("{}: {} step is not satisfied", self.hostname, step.name());
                self.gauge.set(&self.hostname, self.version_label(), 0);
                return Ok(false);
            }
        }
        self.gauge.set(&self.hostname, self.version_label(), 1);
        Ok(true)
    }

    /// Record that nothing needed to be deployed
    pub fn mark_up_to_date(&mut self) -> Result<(), DeployerError> {
        self.transition(DeviceEvent::MarkUpToDate)
    }

    /// Run the deployment pipeline over the bound steps.
    ///
    /// Stops at the first step that fails to apply or to certify. With
    /// `force`, steps are applied without consulting their checks first.
    pub async fn deploy(&mut self, force: bool) -> Result<PipelineStatus, DeployerError> {
        if self.steps.is_empty() {
            return Err(DeployerError::Internal(format!(
                "{} has no deployment steps bound",
                self.hostname
            )));
        }
        self.transition(DeviceEvent::Deploy)?;

        let outcome = self.run_pipeline(force).await;
        let status = match outcome {
            Ok(status) => status,
            Err(e) => {
                self.gauge.set(&self.hostname, self.version_label(), -1);
                self.transition(DeviceEvent::DeployFailed(e.to_string()))?;
                return Err(e);
            }
        };

        match &status {
            PipelineStatus::Completed { .. } => self.transition(DeviceEvent::DeploySuccess)?,
            PipelineStatus::StepFailed { step } => {
                self.transition(DeviceEvent::DeployFailed(format!("{} step failed", step)))?
            }
            PipelineStatus::Interrupted => self.transition(DeviceEvent::DeployFailed(
                "interrupted by a shutdown request".to_string(),
            ))?,
        }
        Ok(status)
    }

    /// Close the SSH session and drop the bound steps
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            close_session(session.as_ref(), &self.hostname).await;
        }
        self.steps.clear();
    }

    async fn run_pipeline(&self, force: bool) -> Result<PipelineStatus, DeployerError> {
        let mut changed = false;

        for step in &self.steps {
            if self.stop_if_requested().await {
                return Ok(PipelineStatus::Interrupted);
            }

            if !force && step.check().await? {
                debug!(
                    "{}: {} step is already satisfied",
                    self.hostname,
                    step.name()
                );
                continue;
            }

            warn!("{}: {} step started", self.hostname, step.name());
            let applied = {
                let _guard = self.shutdown.begin_mutation();
                step.apply().await?
            };

            if self.stop_if_requested().await {
                return Ok(PipelineStatus::Interrupted);
            }

            if !applied {
                self.gauge.set(&self.hostname, self.version_label(), -1);
                error!("{}: {} step failed", self.hostname, step.name());
                return Ok(PipelineStatus::StepFailed { step: step.name() });
            }

            // apply never certifies its own work
            if !step.check().await? {
                self.gauge.set(&self.hostname, self.version_label(), -1);
                error!(
                    "{}: {} step is still not satisfied after apply",
                    self.hostname,
                    step.name()
                );
                return Ok(PipelineStatus::StepFailed { step: step.name() });
            }

            self.gauge.set(&self.hostname, self.version_label(), 1);
            warn!("{}: {} step succeeded", self.hostname, step.name());
            changed = true;
        }

        if changed {
            match systemd::restart_minion(self.active_session()?.as_ref()).await {
                Ok(true) => warn!("{}: salt-minion restarted", self.hostname),
                Ok(false) => error!("{}: salt-minion failed to restart", self.hostname),
                Err(e) => error!("{}: salt-minion failed to restart: {}", self.hostname, e),
            }
        }
        Ok(PipelineStatus::Completed { changed })
    }

    /// Safe point between mutation regions.
    ///
    /// Returns true when a pending stop request ends this run. When no other
    /// device task is mid-mutation the process exits here, completing the
    /// stop the signal listener deferred.
    async fn stop_if_requested(&self) -> bool {
        if !self.shutdown.stop_requested() {
            return false;
        }
        warn!("Exiting...");
        if let Some(session) = &self.session {
            close_session(session.as_ref(), &self.hostname).await;
        }
        warn!("SSH connection closed. Bye.");
        if !self.shutdown.mutation_in_progress() {
            std::process::exit(0);
        }
        true
    }

    fn active_session(&self) -> Result<&Arc<dyn RemoteSession>, DeployerError> {
        self.session.as_ref().ok_or_else(|| {
            DeployerError::Internal(format!("{} has no active session", self.hostname))
        })
    }

    fn version_label(&self) -> &str {
        self.sonic_version.as_deref().unwrap_or_default()
    }

    fn transition(&mut self, event: DeviceEvent) -> Result<(), DeployerError> {
        self.fsm.process(event).map_err(DeployerError::Internal)
    }

    #[cfg(test)]
    fn with_steps(
        hostname: &str,
        sonic_version: &str,
        session: Arc<dyn RemoteSession>,
        steps: Vec<Box<dyn Step>>,
        artifacts: Arc<ArtifactStore>,
        gauge: Arc<DeploymentGauge>,
        shutdown: Arc<ShutdownState>,
    ) -> Self {
        let mut fsm = DeviceFsm::new();
        fsm.process(DeviceEvent::Connect).unwrap();
        fsm.process(DeviceEvent::ConnectSuccess).unwrap();
        Self {
            hostname: hostname.to_string(),
            fsm,
            sonic_version: Some(sonic_version.to_string()),
            session: Some(session),
            steps,
            artifacts,
            gauge,
            shutdown,
        }
    }
}

async fn close_session(session: &dyn RemoteSession, hostname: &str) {
    if let Err(e) = session.close().await {
        debug!("{}: error while closing the SSH session: {}", hostname, e);
    }
}

/// Try every credential in order until one authenticates.
///
/// Generic over the connect function so the fallback logic is testable
/// without a live SSH endpoint.
pub(crate) async fn authenticate<S, F, Fut>(
    hostname: &str,
    credentials: &CredentialSet,
    connect: F,
) -> Result<S, DeployerError>
where
    F: Fn(Credential) -> Fut,
    Fut: Future<Output = Result<S, DeployerError>>,
{
    for credential in credentials.iter() {
        let username = credential.username.clone();
        match connect(credential.clone()).await {
            Ok(session) => {
                info!(
                    "Successfully connected to {} with user '{}'",
                    hostname, username
                );
                return Ok(session);
            }
            Err(e) => {
                error!("Unable to connect to {} with user '{}': {}", hostname, username, e);
            }
        }
    }
    Err(DeployerError::ConnectionError(format!(
        "unable to connect to {} with any configured credential",
        hostname
    )))
}

/// Detect the running SONiC version.
///
/// The release file is authoritative; older images only expose the version
/// through `show version`.
pub(crate) async fn detect_version(
    session: &dyn RemoteSession,
    hostname: &str,
) -> Result<String, DeployerError> {
    for command in [SONIC_RELEASE_COMMAND, SONIC_VERSION_FALLBACK_COMMAND] {
        let output = session.run(command).await?;
        if !output.success() {
            continue;
        }
        let version = output.stdout.lines().next().unwrap_or_default().trim();
        if !version.is_empty() {
            return Ok(version.to_string());
        }
    }
    Err(DeployerError::VersionError(format!(
        "could not determine the SONiC version of {}",
        hostname
    )))
}
