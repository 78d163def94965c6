//! Nexus artifact repository client
//!
//! Minion builds live in a maven-style layout: `maven-metadata.xml` names the
//! latest release, and each release directory holds one
//! `salt-minion-<release>-<sonic_version>.pex` per supported SONiC release
//! together with its `.sha256` file.

use std::time::Duration;

use crate::errors::DeployerError;

/// HTTP client for one Nexus repository location
pub struct NexusClient {
    client: reqwest::Client,
    base_url: String,
}

impl NexusClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DeployerError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Name of the latest minion release published in the repository
    pub async fn latest_release(&self) -> Result<String, DeployerError> {
        let url = format!("{}/maven-metadata.xml", self.base_url);
        let response = self.client.get(&url).send().await.map_err(|e| {
            DeployerError::ArtifactError(format!("error while fetching metadata from Nexus: {}", e))
        })?;
        let metadata = response.error_for_status().map_err(|e| {
            DeployerError::ArtifactError(format!("error while fetching metadata from Nexus: {}", e))
        })?;
        let text = metadata.text().await?;

        extract_tag(&text, "latest").ok_or_else(|| {
            DeployerError::ArtifactError("no <latest> release in Nexus metadata".to_string())
        })
    }

    /// Download the minion PEX for one SONiC release
    pub async fn fetch_minion(
        &self,
        release: &str,
        sonic_version: &str,
    ) -> Result<Vec<u8>, DeployerError> {
        let url = format!(
            "{}/{}/salt-minion-{}-{}.pex",
            self.base_url, release, release, sonic_version
        );
        let payload = self
            .fetch_checked(&url)
            .await
            .map_err(|e| {
                DeployerError::ArtifactError(format!(
                    "error while fetching minion from Nexus: {}",
                    e
                ))
            })?
            .bytes()
            .await?;
        Ok(payload.to_vec())
    }

    /// Download the published checksum for one SONiC release
    pub async fn fetch_checksum(
        &self,
        release: &str,
        sonic_version: &str,
    ) -> Result<String, DeployerError> {
        let url = format!(
            "{}/{}/salt-minion-{}-{}.pex.sha256",
            self.base_url, release, release, sonic_version
        );
        let checksum = self
            .fetch_checked(&url)
            .await
            .map_err(|e| {
                DeployerError::ArtifactError(format!(
                    "error while fetching minion checksum from Nexus: {}",
                    e
                ))
            })?
            .text()
            .await?;
        Ok(checksum)
    }

    async fn fetch_checked(&self, url: &str) -> Result<reqwest::Response, reqwest::Error> {
        let response = self.client.get(url).send().await?;
        response.error_for_status()
    }
}

/// Pull the text of the first `<tag>...</tag>` element out of an XML
/// document
fn extract_tag(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const METADATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>net.example.salt</groupId>
  <artifactId>salt-minion</artifactId>
  <versioning>
    <latest>3006.9-2</latest>
    <release>3006.9-2</release>
    <versions>
      <version>3006.9-1</version>
      <version>3006.9-2</version>
    </versions>
  </versioning>
</metadata>
"#;

    #[test]
    fn test_extract_latest_release() {
        assert_eq!(
            extract_tag(METADATA, "latest").as_deref(),
            Some("3006.9-2")
        );
    }

    #[test]
    fn test_extract_missing_tag() {
        assert_eq!(extract_tag(METADATA, "snapshot"), None);
        assert_eq!(extract_tag("<latest>unterminated", "latest"), None);
    }
}
