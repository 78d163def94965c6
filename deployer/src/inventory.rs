//! Dynamic device inventory
//!
//! Fetches a JSON inventory document and extracts the device hostnames with
//! a small declarative filter instead of a query expression.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::DeployerError;

/// Declarative extraction of hostnames from an inventory document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryFilter {
    /// JSON pointer to the record array, "" for the document root
    pub records_pointer: String,

    /// Keep only records whose `match_field` equals `match_value`
    /// (case-insensitive). Both unset keeps every record.
    pub match_field: Option<String>,
    pub match_value: Option<String>,

    /// Record field holding the hostname. Unset means the records are
    /// plain hostname strings.
    pub hostname_field: Option<String>,
}

/// Fetch the inventory document and extract the device hostnames
pub async fn fetch_devices(
    url: &str,
    filter: &InventoryFilter,
    timeout: Duration,
) -> Result<Vec<String>, DeployerError> {
    info!("Fetching the device inventory from {}", url);
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let document: Value = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let hostnames = filter_hostnames(&document, filter)?;
    debug!("SONiC device list: {:?}", hostnames);
    Ok(hostnames)
}

/// Apply the filter to an already-fetched inventory document.
///
/// A matched record without a usable hostname fails the whole lookup.
pub fn filter_hostnames(
    document: &Value,
    filter: &InventoryFilter,
) -> Result<Vec<String>, DeployerError> {
    let records = document
        .pointer(&filter.records_pointer)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            DeployerError::InventoryError(format!(
                "no record array at '{}' in the inventory document",
                filter.records_pointer
            ))
        })?;

    let mut hostnames = Vec::new();
    for record in records {
        if let (Some(field), Some(value)) = (&filter.match_field, &filter.match_value) {
            let matched = record
                .get(field)
                .and_then(Value::as_str)
                .map(|found| found.eq_ignore_ascii_case(value))
                .unwrap_or(false);
            if !matched {
                continue;
            }
        }

        let hostname = match &filter.hostname_field {
            Some(field) => record.get(field).and_then(Value::as_str),
            None => record.as_str(),
        };
        match hostname {
            Some(hostname) if !hostname.is_empty() => hostnames.push(hostname.to_string()),
            _ => {
                return Err(DeployerError::InventoryError(format!(
                    "inventory record without a usable hostname: {}",
                    record
                )))
            }
        }
    }

    if hostnames.is_empty() {
        return Err(DeployerError::InventoryError(
            "no devices found in the inventory".to_string(),
        ));
    }
    Ok(hostnames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_defaults_deserialize() {
        let filter: InventoryFilter = serde_json::from_str("{}").unwrap();
        assert_eq!(filter.records_pointer, "");
        assert!(filter.match_field.is_none());
        assert!(filter.hostname_field.is_none());
    }

    #[test]
    fn test_filter_root_array_of_strings() {
        let document = json!(["switch-01", "switch-02"]);
        let hostnames = filter_hostnames(&document, &InventoryFilter::default()).unwrap();
        assert_eq!(hostnames, vec!["switch-01", "switch-02"]);
    }

    #[test]
    fn test_filter_nested_records_with_field_match() {
        let document = json!({
            "data": {
                "devices": [
                    {"os": "sonic", "name": "switch-01"},
                    {"os": "eos", "name": "router-01"},
                    {"os": "SONiC", "name": "switch-02"},
                ]
            }
        });
        let filter = InventoryFilter {
            records_pointer: "/data/devices".to_string(),
            match_field: Some("os".to_string()),
            match_value: Some("sonic".to_string()),
            hostname_field: Some("name".to_string()),
        };
        let hostnames = filter_hostnames(&document, &filter).unwrap();
        assert_eq!(hostnames, vec!["switch-01", "switch-02"]);
    }

    #[test]
    fn test_filter_rejects_missing_record_array() {
        let document = json!({"devices": []});
        let filter = InventoryFilter {
            records_pointer: "/nothing/here".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            filter_hostnames(&document, &filter),
            Err(DeployerError::InventoryError(_))
        ));
    }

    #[test]
    fn test_filter_rejects_null_hostname() {
        let document = json!([{"name": "switch-01"}, {"name": null}]);
        let filter = InventoryFilter {
            hostname_field: Some("name".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            filter_hostnames(&document, &filter),
            Err(DeployerError::InventoryError(_))
        ));
    }

    #[test]
    fn test_filter_rejects_empty_result() {
        let document = json!([{"os": "eos", "name": "router-01"}]);
        let filter = InventoryFilter {
            match_field: Some("os".to_string()),
            match_value: Some("sonic".to_string()),
            hostname_field: Some("name".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            filter_hostnames(&document, &filter),
            Err(DeployerError::InventoryError(_))
        ));
    }
}
