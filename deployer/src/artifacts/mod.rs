//! Prepared deployment artifacts
//!
//! Everything pushed to a device is prepared once at startup and shared
//! read-only across device tasks: the minion PEX payload per SONiC release
//! (from a local directory or Nexus), the embedded grains script and systemd
//! unit files with their checksums, the assembled /etc/resolv.conf text and
//! the minion configuration.

pub mod nexus;

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::time::Duration;

use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, info};

use crate::errors::DeployerError;
use crate::settings::{DnsSettings, MinionSettings, Settings};
use crate::utils::{is_sha256_hex, sha256_hash};

use nexus::NexusClient;

/// First-line marker every minion PEX must carry
pub const PYTHON_SHEBANG: &str = "#!/usr/bin/env python";

/// Name of the grains refresh script on the device
pub const GRAINS_SCRIPT_NAME: &str = "update_grains.py";

/// A minion PEX payload pinned to one SONiC release
#[derive(Debug, Clone)]
pub struct MinionArtifact {
    pub payload: Vec<u8>,
    pub sha256: String,
}

/// An embedded file shipped to the devices as-is
#[derive(Debug, Clone)]
pub struct ResourceFile {
    pub name: &'static str,
    pub bytes: &'static [u8],
    pub sha256: String,
}

/// Immutable artifact set for one deployer run
#[derive(Debug)]
pub struct ArtifactStore {
    minions: HashMap<String, MinionArtifact>,
    grains_script: ResourceFile,
    systemd_units: Vec<ResourceFile>,
    resolv_conf: String,
    minion_config: String,
}

impl ArtifactStore {
    /// Download, read and validate every artifact named by the settings
    pub async fn prepare(settings: &Settings) -> Result<Self, DeployerError> {
        let minions = prepare_minions(settings).await?;
        let resolv_conf = prepare_resolv_conf(&settings.dns).await?;
        let minion_config = prepare_minion_config(&settings.minion).await?;

        info!(
            "Prepared {} minion build(s) for SONiC version(s): {}",
            minions.len(),
            settings.sonic_versions.join(", ")
        );

        Ok(Self {
            minions,
            grains_script: embedded_grains_script(),
            systemd_units: embedded_systemd_units(),
            resolv_conf,
            minion_config,
        })
    }

    /// Minion payload for a detected SONiC version.
    ///
    /// Devices running a release nobody prepared a build for fail their
    /// deployment with this error instead of being silently skipped.
    pub fn minion(&self, sonic_version: &str) -> Result<&MinionArtifact, DeployerError> {
        self.minions.get(sonic_version).ok_or_else(|| {
            DeployerError::ArtifactError(format!(
                "no minion build prepared for SONiC version {}",
                sonic_version
            ))
        })
    }

    pub fn minion_versions(&self) -> Vec<String> {
        self.minions.keys().cloned().collect()
    }

    pub fn grains_script(&self) -> &ResourceFile {
        &self.grains_script
    }

    pub fn systemd_units(&self) -> &[ResourceFile] {
        &self.systemd_units
    }

    pub fn resolv_conf(&self) -> &str {
        &self.resolv_conf
    }

    pub fn minion_config(&self) -> &str {
        &self.minion_config
    }

    /// Assemble a store from raw parts, bypassing file and network access
    #[cfg(test)]
    pub(crate) fn for_tests(
        minions: HashMap<String, MinionArtifact>,
        resolv_conf: &str,
        minion_config: &str,
    ) -> Self {
        Self {
            minions,
            grains_script: embedded_grains_script(),
            systemd_units: embedded_systemd_units(),
            resolv_conf: resolv_conf.to_string(),
            minion_config: minion_config.to_string(),
        }
    }
}

async fn prepare_minions(
    settings: &Settings,
) -> Result<HashMap<String, MinionArtifact>, DeployerError> {
    if let Some(directory) = &settings.minion.files_local_directory {
        prepare_minions_from_directory(directory, &settings.sonic_versions).await
    } else if let Some(base_url) = &settings.minion.files_nexus_location {
        let client = NexusClient::new(base_url, Duration::from_secs(settings.http_timeout_secs))?;
        prepare_minions_from_nexus(&client, &settings.sonic_versions).await
    } else {
        Err(DeployerError::ConfigError(
            "minion files location was not specified".to_string(),
        ))
    }
}

async fn prepare_minions_from_directory(
    directory: &str,
    sonic_versions: &[String],
) -> Result<HashMap<String, MinionArtifact>, DeployerError> {
    let mut minions = HashMap::new();
    for sonic_version in sonic_versions {
        let minion_file = format!("{}/salt-minion-{}.pex", directory, sonic_version);
        info!("Reading minion build {}", minion_file);

        let payload = tokio::fs::read(&minion_file).await.map_err(|e| {
            DeployerError::ArtifactError(format!("unable to read {}: {}", minion_file, e))
        })?;
        validate_shebang(&payload, &minion_file)?;

        let checksum_file = format!("{}.sha256", minion_file);
        let checksum = tokio::fs::read_to_string(&checksum_file).await.map_err(|e| {
            DeployerError::ArtifactError(format!("unable to read {}: {}", checksum_file, e))
        })?;
        let sha256 = validate_checksum(&checksum, &checksum_file)?;

        minions.insert(sonic_version.clone(), MinionArtifact { payload, sha256 });
    }
    Ok(minions)
}

async fn prepare_minions_from_nexus(
    client: &NexusClient,
    sonic_versions: &[String],
) -> Result<HashMap<String, MinionArtifact>, DeployerError> {
    let release = client.latest_release().await?;
    info!("Latest minion release in Nexus: {}", release);

    let mut minions = HashMap::new();
    for sonic_version in sonic_versions {
        let payload = client.fetch_minion(&release, sonic_version).await?;
        validate_shebang(&payload, &format!("minion build for {}", sonic_version))?;

        let checksum = client.fetch_checksum(&release, sonic_version).await?;
        let sha256 = validate_checksum(&checksum, &format!("checksum for {}", sonic_version))?;

        minions.insert(sonic_version.clone(), MinionArtifact { payload, sha256 });
    }
    Ok(minions)
}

fn validate_shebang(payload: &[u8], name: &str) -> Result<(), DeployerError> {
    let first_line = payload.split(|byte| *byte == b'\n').next().unwrap_or_default();
    if !String::from_utf8_lossy(first_line).contains(PYTHON_SHEBANG) {
        return Err(DeployerError::ArtifactError(format!(
            "{} does not start with the python shebang",
            name
        )));
    }
    Ok(())
}

fn validate_checksum(value: &str, name: &str) -> Result<String, DeployerError> {
    let value = value.trim();
    if !is_sha256_hex(value) {
        return Err(DeployerError::ArtifactError(format!(
            "invalid checksum value in {}",
            name
        )));
    }
    Ok(value.to_string())
}

async fn prepare_resolv_conf(dns: &DnsSettings) -> Result<String, DeployerError> {
    let servers = if dns.resolve_resolver_hostnames {
        resolve_dns_servers(&dns.resolvers).await?
    } else {
        dns.resolvers.clone()
    };
    Ok(construct_resolv_conf(&servers))
}

/// Expand resolver hostnames into their A records, skipping names that do
/// not exist. The result is the sorted set of addresses.
async fn resolve_dns_servers(resolvers: &[String]) -> Result<Vec<String>, DeployerError> {
    let resolver = TokioAsyncResolver::tokio_from_system_conf().map_err(|e| {
        DeployerError::ConfigError(format!(
            "unable to build a DNS resolver from the system configuration: {}",
            e
        ))
    })?;

    let mut addresses: BTreeSet<Ipv4Addr> = BTreeSet::new();
    for hostname in resolvers {
        match resolver.ipv4_lookup(hostname.as_str()).await {
            Ok(lookup) => addresses.extend(lookup.iter().map(|record| record.0)),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => {
                debug!("{} does not exist", hostname);
                continue;
            }
            Err(e) => {
                return Err(DeployerError::ConfigError(format!(
                    "DNS lookup for {} failed: {}",
                    hostname, e
                )))
            }
        }
    }

    if addresses.is_empty() {
        return Err(DeployerError::ConfigError("no DNS servers found".to_string()));
    }
    Ok(addresses.iter().map(|address| address.to_string()).collect())
}

fn construct_resolv_conf(servers: &[String]) -> String {
    servers
        .iter()
        .map(|server| format!("nameserver {}", server))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn prepare_minion_config(minion: &MinionSettings) -> Result<String, DeployerError> {
    match &minion.config {
        Some(config) => Ok(config.clone()),
        None => tokio::fs::read_to_string(&minion.config_file).await.map_err(|e| {
            DeployerError::ConfigError(format!(
                "unable to read minion config file {}: {}",
                minion.config_file, e
            ))
        }),
    }
}

fn resource(name: &'static str, bytes: &'static [u8]) -> ResourceFile {
    ResourceFile {
        name,
        bytes,
        sha256: sha256_hash(bytes),
    }
}

fn embedded_grains_script() -> ResourceFile {
    resource(
        GRAINS_SCRIPT_NAME,
        include_bytes!("../../resources/scripts/update_grains.py"),
    )
}

fn embedded_systemd_units() -> Vec<ResourceFile> {
    vec![
        resource(
            "salt-minion.service",
            include_bytes!("../../resources/systemd/salt-minion.service"),
        ),
        resource(
            "salt-update-grains.service",
            include_bytes!("../../resources/systemd/salt-update-grains.service"),
        ),
        resource(
            "salt-update-grains.timer",
            include_bytes!("../../resources/systemd/salt-update-grains.timer"),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_shebang() {
        assert!(validate_shebang(b"#!/usr/bin/env python\nPK...", "minion").is_ok());
        assert!(validate_shebang(b"#!/bin/sh\nexec foo", "minion").is_err());
        assert!(validate_shebang(b"", "minion").is_err());
    }

    #[test]
    fn test_validate_checksum() {
        let digest = "a".repeat(64);
        assert_eq!(
            validate_checksum(&format!("{}\n", digest), "file").unwrap(),
            digest
        );
        assert!(validate_checksum("not-a-checksum", "file").is_err());
        assert!(validate_checksum(&"a".repeat(63), "file").is_err());
    }

    #[test]
    fn test_construct_resolv_conf() {
        let servers = vec!["10.0.0.53".to_string(), "10.0.1.53".to_string()];
        assert_eq!(
            construct_resolv_conf(&servers),
            "nameserver 10.0.0.53\nnameserver 10.0.1.53"
        );
        assert_eq!(construct_resolv_conf(&[]), "");
    }

    #[test]
    fn test_embedded_resources_are_checksummed() {
        let grains = embedded_grains_script();
        assert_eq!(grains.sha256, sha256_hash(grains.bytes));

        let units = embedded_systemd_units();
        assert_eq!(units.len(), 3);
        assert_eq!(units[0].name, "salt-minion.service");
        for unit in &units {
            assert!(is_sha256_hex(&unit.sha256));
        }
    }

    #[test]
    fn test_minion_lookup_unknown_version() {
        let store = ArtifactStore::for_tests(HashMap::new(), "", "");
        assert!(store.minion("209999").is_err());
    }
}
