//! Finite state machine for a device deployment run

use serde::{Deserialize, Serialize};

/// Device session state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Initial state, no SSH session
    Disconnected,

    /// Authentication and version detection in progress
    Connecting,

    /// No credential produced an authenticated session
    ConnectionFailed,

    /// Authenticated, but the SONiC version could not be determined
    VersionUnknown,

    /// Authenticated with a detected version, steps are bound
    Connected,

    /// Readiness checks running
    Checking,

    /// Every step was already satisfied
    AlreadyUpToDate,

    /// The pipeline is applying steps
    Deploying,

    /// The pipeline completed with every step certified
    Succeeded,

    /// The pipeline stopped at a failing step
    Failed,
}

/// Device session event
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Start connecting
    Connect,

    /// Authentication and version detection both succeeded
    ConnectSuccess,

    /// No credential was accepted
    ConnectFailed(String),

    /// Authenticated, but the version commands yielded nothing usable
    VersionDetectionFailed(String),

    /// Start the readiness checks
    Check,

    /// Every check passed, there is nothing to deploy
    MarkUpToDate,

    /// Start the deployment pipeline
    Deploy,

    /// Pipeline completed successfully
    DeploySuccess,

    /// Pipeline failed or was interrupted
    DeployFailed(String),
}

/// Per-run device FSM
#[derive(Debug, Clone)]
pub struct DeviceFsm {
    state: DeviceState,
    error: Option<String>,
}

impl DeviceFsm {
    /// Create a new FSM in disconnected state
    pub fn new() -> Self {
        Self {
            state: DeviceState::Disconnected,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeviceEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            // From Disconnected
            (DeviceState::Disconnected, DeviceEvent::Connect) => {
                self.error = None;
                DeviceState::Connecting
            }

            // From Connecting
            (DeviceState::Connecting, DeviceEvent::ConnectSuccess) => DeviceState::Connected,
            (DeviceState::Connecting, DeviceEvent::ConnectFailed(err)) => {
                self.error = Some(err.clone());
                DeviceState::ConnectionFailed
            }
            (DeviceState::Connecting, DeviceEvent::VersionDetectionFailed(err)) => {
                self.error = Some(err.clone());
                DeviceState::VersionUnknown
            }

            // From Connected
            (DeviceState::Connected, DeviceEvent::Check) => DeviceState::Checking,
            (DeviceState::Connected, DeviceEvent::Deploy) => DeviceState::Deploying,

            // From Checking
            (DeviceState::Checking, DeviceEvent::MarkUpToDate) => DeviceState::AlreadyUpToDate,
            (DeviceState::Checking, DeviceEvent::Deploy) => DeviceState::Deploying,

            // From Deploying
            (DeviceState::Deploying, DeviceEvent::DeploySuccess) => DeviceState::Succeeded,
            (DeviceState::Deploying, DeviceEvent::DeployFailed(err)) => {
                self.error = Some(err.clone());
                DeviceState::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for DeviceFsm {
    fn default() -> Self {
        Self::new()
    }
}
