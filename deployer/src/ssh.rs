//! SSH transport to the switches
//!
//! Steps and the pipeline only ever see the [`RemoteSession`] trait; the
//! concrete [`SshSession`] drives a russh client underneath. Uploads go
//! through an exec channel running `cat > path` with the payload streamed as
//! channel stdin, which keeps the transport to a single channel type.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::{ChannelMsg, Disconnect};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::DeployerError;

/// Output of a remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub exit_status: u32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// A live session to one device.
///
/// `run` reports a non-zero remote exit status as data, never as an error;
/// `Err` is reserved for transport faults. `upload` likewise returns
/// `Ok(false)` when the remote write fails cleanly.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn run(&self, command: &str) -> Result<CommandOutput, DeployerError>;

    async fn upload(&self, data: &[u8], remote_path: &str) -> Result<bool, DeployerError>;

    async fn close(&self) -> Result<(), DeployerError> {
        Ok(())
    }
}

/// Connection parameters for [`SshSession::connect`]
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub port: u16,

    /// Bound on TCP connect + handshake + authentication together
    pub timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            port: 22,
            timeout: Duration::from_secs(10),
        }
    }
}

struct Handler;

#[async_trait]
impl client::Handler for Handler {
    type Error = russh::Error;

    // Switch host keys churn with every reimage, so they are not pinned.
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// russh-backed [`RemoteSession`]
pub struct SshSession {
    hostname: String,
    handle: Mutex<client::Handle<Handler>>,
}

impl SshSession {
    /// Open a session and authenticate with a password, all within
    /// `options.timeout`.
    pub async fn connect(
        hostname: &str,
        username: &str,
        secret: &SecretString,
        options: &ConnectOptions,
    ) -> Result<Self, DeployerError> {
        let config = Arc::new(client::Config::default());
        let attempt = async {
            let mut handle =
                client::connect(config, (hostname, options.port), Handler).await?;
            let authenticated = handle
                .authenticate_password(username, secret.expose_secret())
                .await?;
            if !authenticated {
                return Err(DeployerError::ConnectionError(format!(
                    "authentication rejected for user '{}' on {}",
                    username, hostname
                )));
            }
            Ok(handle)
        };
        let handle = tokio::time::timeout(options.timeout, attempt)
            .await
            .map_err(|_| {
                DeployerError::ConnectionError(format!(
                    "connection to {} timed out after {:?}",
                    hostname, options.timeout
                ))
            })??;

        Ok(Self {
            hostname: hostname.to_string(),
            handle: Mutex::new(handle),
        })
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn run(&self, command: &str) -> Result<CommandOutput, DeployerError> {
        debug!("{}: running '{}'", self.hostname, command);
        let handle = self.handle.lock().await;
        let mut channel = handle.channel_open_session().await?;
        drop(handle);

        channel.exec(true, command).await?;
        // No command reads channel stdin, close it right away
        channel.eof().await?;

        let mut stdout = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                _ => {}
            }
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            exit_status: exit_status.unwrap_or(1),
        })
    }

    async fn upload(&self, data: &[u8], remote_path: &str) -> Result<bool, DeployerError> {
        debug!(
            "{}: uploading {} bytes to {}",
            self.hostname,
            data.len(),
            remote_path
        );
        let handle = self.handle.lock().await;
        let mut channel = handle.channel_open_session().await?;
        drop(handle);

        channel
            .exec(true, format!("cat > {}", remote_path))
            .await?;
        channel.data(data).await?;
        channel.eof().await?;

        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            if let ChannelMsg::ExitStatus { exit_status: status } = msg {
                exit_status = Some(status);
            }
        }

        Ok(exit_status.unwrap_or(1) == 0)
    }

    async fn close(&self) -> Result<(), DeployerError> {
        let handle = self.handle.lock().await;
        handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockSession;
    use super::*;

    #[tokio::test]
    async fn test_mock_session_scripted_response() {
        let session = MockSession::new().respond("ls /opt/salt/salt-minion", "", 2);
        let output = session.run("ls /opt/salt/salt-minion").await.unwrap();
        assert!(!output.success());
        assert_eq!(session.recorded_commands(), vec!["ls /opt/salt/salt-minion"]);
    }

    #[tokio::test]
    async fn test_mock_session_default_success() {
        let session = MockSession::new();
        let output = session.run("sudo systemctl daemon-reload").await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "");
    }
}
