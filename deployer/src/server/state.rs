//! Server state

use std::sync::Arc;

use crate::metrics::DeploymentGauge;

/// Server state shared across handlers
pub struct ServerState {
    pub gauge: Arc<DeploymentGauge>,
}

impl ServerState {
    pub fn new(gauge: Arc<DeploymentGauge>) -> Self {
        Self { gauge }
    }
}
