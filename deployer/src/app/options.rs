//! Application configuration options

use crate::ssh::ConnectOptions;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Redeploy every step even when its check passes
    pub force: bool,

    /// Report what a run would do without mutating any device
    pub dry_run: bool,

    /// SSH transport configuration
    pub connect: ConnectOptions,

    /// Metrics server configuration
    pub server: ServerOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            force: false,
            dry_run: false,
            connect: ConnectOptions::default(),
            server: ServerOptions::default(),
        }
    }
}

/// Metrics HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
        }
    }
}
