//! Settings file management

use serde::{Deserialize, Serialize};

use crate::errors::DeployerError;
use crate::inventory::InventoryFilter;
use crate::logs::LogLevel;

/// Deployer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Enable ANSI colors on stdout
    #[serde(default = "default_true")]
    pub pretty_logs: bool,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,

    /// Redeploy every step even when its check passes
    #[serde(default)]
    pub force: bool,

    /// Report what would be deployed without mutating any device
    #[serde(default)]
    pub dry_run: bool,

    /// SONiC releases a minion build must be prepared for
    #[serde(default)]
    pub sonic_versions: Vec<String>,

    /// Static device list; when empty the inventory service is queried
    #[serde(default)]
    pub devices: Vec<String>,

    /// Static SSH username, tried before any Vault credentials
    #[serde(default)]
    pub username: Option<String>,

    /// Static SSH password
    #[serde(default)]
    pub password: Option<String>,

    /// HTTP client timeout in seconds (inventory, Nexus, Vault)
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Minion artifact configuration
    #[serde(default)]
    pub minion: MinionSettings,

    /// DNS configuration pushed to the switches
    #[serde(default)]
    pub dns: DnsSettings,

    /// Inventory service configuration
    #[serde(default)]
    pub inventory: InventorySettings,

    /// Vault configuration
    #[serde(default)]
    pub vault: VaultSettings,

    /// SSH transport configuration
    #[serde(default)]
    pub ssh: SshSettings,

    /// Metrics server configuration
    #[serde(default)]
    pub server: ServerSettings,
}

fn default_true() -> bool {
    true
}

fn default_http_timeout() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            pretty_logs: true,
            json_logs: false,
            force: false,
            dry_run: false,
            sonic_versions: Vec::new(),
            devices: Vec::new(),
            username: None,
            password: None,
            http_timeout_secs: default_http_timeout(),
            minion: MinionSettings::default(),
            dns: DnsSettings::default(),
            inventory: InventorySettings::default(),
            vault: VaultSettings::default(),
            ssh: SshSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file
    pub async fn load(path: &str) -> Result<Self, DeployerError> {
        let content = tokio::fs::read_to_string(path).await?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Check that every Vault field required for a lookup is present
    pub fn is_vault_enabled(&self) -> bool {
        self.vault.url.is_some()
            && self.vault.login.is_some()
            && self.vault.password.is_some()
            && self.vault.secret_path.is_some()
            && !self.vault.device_usernames.is_empty()
    }

    /// Check that a static username/password pair is configured
    pub fn has_static_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Reject settings that cannot produce a working run
    pub fn validate(&self) -> Result<(), DeployerError> {
        if self.sonic_versions.is_empty() {
            return Err(DeployerError::ConfigError(
                "sonic_versions must list at least one target release".to_string(),
            ));
        }
        if self.dns.resolvers.is_empty() {
            return Err(DeployerError::ConfigError(
                "dns.resolvers must list at least one server".to_string(),
            ));
        }
        if self.minion.files_local_directory.is_none() && self.minion.files_nexus_location.is_none()
        {
            return Err(DeployerError::ConfigError(
                "minion files location was not specified, define minion.files_local_directory \
                 or minion.files_nexus_location"
                    .to_string(),
            ));
        }
        if !self.has_static_credentials() && !self.is_vault_enabled() {
            return Err(DeployerError::ConfigError(
                "no credential source configured, set username/password or the vault section"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Minion artifact settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinionSettings {
    /// Inline minion configuration; takes precedence over `config_file`
    #[serde(default)]
    pub config: Option<String>,

    /// Path to the minion configuration pushed to /etc/salt/minion
    #[serde(default = "default_minion_config_file")]
    pub config_file: String,

    /// Directory holding salt-minion-<version>.pex files and their checksums
    #[serde(default)]
    pub files_local_directory: Option<String>,

    /// Nexus repository URL holding the minion builds
    #[serde(default)]
    pub files_nexus_location: Option<String>,
}

fn default_minion_config_file() -> String {
    "./minion.yml".to_string()
}

impl Default for MinionSettings {
    fn default() -> Self {
        Self {
            config: None,
            config_file: default_minion_config_file(),
            files_local_directory: None,
            files_nexus_location: None,
        }
    }
}

/// DNS settings for /etc/resolv.conf assembly
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsSettings {
    /// Resolver addresses or hostnames written to the switches
    #[serde(default)]
    pub resolvers: Vec<String>,

    /// Resolve hostnames in `resolvers` to IPv4 addresses first
    #[serde(default)]
    pub resolve_resolver_hostnames: bool,
}

/// Inventory service settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorySettings {
    /// Inventory endpoint returning a JSON device document
    #[serde(default)]
    pub url: Option<String>,

    /// How to extract SONiC hostnames from the document
    #[serde(default)]
    pub filter: InventoryFilter,
}

/// Vault settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSettings {
    /// Vault base URL
    #[serde(default)]
    pub url: Option<String>,

    /// LDAP login used to authenticate against Vault
    #[serde(default)]
    pub login: Option<String>,

    /// LDAP password
    #[serde(default)]
    pub password: Option<String>,

    /// KV v2 path holding the device passwords
    #[serde(default)]
    pub secret_path: Option<String>,

    /// Usernames to look up, in the order they should be tried
    #[serde(default)]
    pub device_usernames: Vec<String>,

    /// KV v2 mount point
    #[serde(default = "default_vault_mount_point")]
    pub mount_point: String,
}

fn default_vault_mount_point() -> String {
    "devices".to_string()
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            url: None,
            login: None,
            password: None,
            secret_path: None,
            device_usernames: Vec::new(),
            mount_point: default_vault_mount_point(),
        }
    }
}

/// SSH transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    /// SSH port on the switches
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Connection plus authentication timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            port: default_ssh_port(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Metrics server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Bind address for the metrics endpoint
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Bind port for the metrics endpoint
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    9000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}
