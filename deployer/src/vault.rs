//! Vault secret retrieval
//!
//! Device passwords live in a KV v2 secret, one entry per username. The
//! deployer logs in over LDAP, reads the secret once at startup and revokes
//! its own token right away.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::credentials::{Credential, CredentialSet};
use crate::errors::DeployerError;
use crate::settings::Settings;

/// Minimal Vault HTTP API client
pub struct VaultClient {
    client: reqwest::Client,
    base_url: String,
}

impl VaultClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DeployerError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Authenticate with the LDAP backend and return the client token
    pub async fn login_ldap(
        &self,
        login: &str,
        password: &str,
    ) -> Result<SecretString, DeployerError> {
        let url = format!("{}/v1/auth/ldap/login/{}", self.base_url, login);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "password": password }))
            .send()
            .await
            .map_err(|e| DeployerError::VaultError(format!("unable to connect to Vault: {}", e)))?;

        if !response.status().is_success() {
            return Err(DeployerError::VaultError(format!(
                "Vault LDAP login failed with status {}",
                response.status()
            )));
        }
        let body: Value = response.json().await.map_err(|e| {
            DeployerError::VaultError(format!("error while decoding the Vault login response: {}", e))
        })?;
        token_from_login(&body)
    }

    /// Read every entry of a KV v2 secret
    pub async fn read_kv2(
        &self,
        token: &SecretString,
        mount_point: &str,
        path: &str,
    ) -> Result<Map<String, Value>, DeployerError> {
        let url = format!("{}/v1/{}/data/{}", self.base_url, mount_point, path);
        let response = self
            .client
            .get(&url)
            .header("X-Vault-Token", token.expose_secret())
            .send()
            .await
            .map_err(|e| DeployerError::VaultError(format!("unable to connect to Vault: {}", e)))?;

        if !response.status().is_success() {
            return Err(DeployerError::VaultError(format!(
                "Vault secret read failed with status {}",
                response.status()
            )));
        }
        let body: Value = response.json().await.map_err(|e| {
            DeployerError::VaultError(format!("error while decoding the Vault secret: {}", e))
        })?;
        entries_from_secret(&body)
    }

    /// Revoke our own token. Failure is logged and the run continues.
    pub async fn revoke_token(&self, token: &SecretString) {
        let url = format!("{}/v1/auth/token/revoke-self", self.base_url);
        let result = self
            .client
            .post(&url)
            .header("X-Vault-Token", token.expose_secret())
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => debug!("Vault token revoked"),
            Ok(response) => warn!(
                "Vault token revocation failed with status {}",
                response.status()
            ),
            Err(e) => warn!("Vault token revocation failed: {}", e),
        }
    }
}

/// Fetch the device credentials named by the Vault settings
pub async fn fetch_credentials(settings: &Settings) -> Result<CredentialSet, DeployerError> {
    let vault = &settings.vault;
    let (Some(url), Some(login), Some(password), Some(secret_path)) = (
        vault.url.as_deref(),
        vault.login.as_deref(),
        vault.password.as_deref(),
        vault.secret_path.as_deref(),
    ) else {
        return Err(DeployerError::ConfigError(
            "vault settings are incomplete".to_string(),
        ));
    };

    let client = VaultClient::new(url, Duration::from_secs(settings.http_timeout_secs))?;
    let token = client.login_ldap(login, password).await?;
    let entries = client.read_kv2(&token, &vault.mount_point, secret_path).await;
    client.revoke_token(&token).await;

    let credentials = build_credential_set(&vault.device_usernames, &entries?)?;
    info!("{} device credential(s) fetched from Vault", credentials.len());
    Ok(credentials)
}

fn token_from_login(body: &Value) -> Result<SecretString, DeployerError> {
    body.pointer("/auth/client_token")
        .and_then(Value::as_str)
        .map(SecretString::from)
        .ok_or_else(|| {
            DeployerError::VaultError("no client token in the Vault login response".to_string())
        })
}

fn entries_from_secret(body: &Value) -> Result<Map<String, Value>, DeployerError> {
    body.pointer("/data/data")
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| DeployerError::VaultError("no data in the Vault secret".to_string()))
}

/// Build the ordered credential set from raw secret entries.
///
/// Usernames keep the order of the settings; entries carrying the fallback
/// suffix are stored under the stripped username.
pub(crate) fn build_credential_set(
    usernames: &[String],
    entries: &Map<String, Value>,
) -> Result<CredentialSet, DeployerError> {
    let mut credentials = CredentialSet::new();
    for username in usernames {
        let Some(password) = entries.get(username).and_then(Value::as_str) else {
            return Err(DeployerError::SecretNotFound(format!(
                "Unable to find {}",
                username
            )));
        };
        credentials.push(Credential::from_entry(username, SecretString::from(password)));
    }
    Ok(credentials)
}
