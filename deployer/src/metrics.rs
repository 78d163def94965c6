//! Deployment status metrics
//!
//! One gauge per (hostname, minion build version) pair:
//! -1 = deployment failed, 0 = waiting or not ready, 1 = minion up to date.

use std::collections::BTreeMap;
use std::sync::Mutex;

pub const GAUGE_NAME: &str = "sonic_salt_minion_deployment_status";
const GAUGE_HELP: &str =
    "Status of the salt-minion deployment (-1: failed, 0: waiting, 1: updated)";

/// Per-device deployment status gauge registry
#[derive(Debug, Default)]
pub struct DeploymentGauge {
    values: Mutex<BTreeMap<(String, String), i64>>,
}

impl DeploymentGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gauge for a device
    pub fn set(&self, hostname: &str, version: &str, value: i64) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert((hostname.to_string(), version.to_string()), value);
    }

    /// Get the gauge for a device, if it was ever set
    pub fn get(&self, hostname: &str, version: &str) -> Option<i64> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values
            .get(&(hostname.to_string(), version.to_string()))
            .copied()
    }

    /// Render every gauge in Prometheus text exposition format
    pub fn render(&self) -> String {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let mut output = String::new();
        output.push_str(&format!("# HELP {} {}\n", GAUGE_NAME, GAUGE_HELP));
        output.push_str(&format!("# TYPE {} gauge\n", GAUGE_NAME));
        for ((hostname, version), value) in values.iter() {
            output.push_str(&format!(
                "{}{{hostname=\"{}\",salt_pex_build_version=\"{}\"}} {}\n",
                GAUGE_NAME,
                escape_label(hostname),
                escape_label(version),
                value
            ));
        }
        output
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let gauge = DeploymentGauge::new();
        assert_eq!(gauge.get("switch-01", "202311"), None);
        gauge.set("switch-01", "202311", 0);
        gauge.set("switch-01", "202311", 1);
        assert_eq!(gauge.get("switch-01", "202311"), Some(1));
    }

    #[test]
    fn test_render_exposition_format() {
        let gauge = DeploymentGauge::new();
        gauge.set("switch-02", "202311", -1);
        gauge.set("switch-01", "202311", 1);
        let rendered = gauge.render();
        assert!(rendered.starts_with(&format!("# HELP {}", GAUGE_NAME)));
        assert!(rendered.contains(&format!("# TYPE {} gauge", GAUGE_NAME)));
        assert!(rendered.contains(
            "sonic_salt_minion_deployment_status{hostname=\"switch-01\",salt_pex_build_version=\"202311\"} 1\n"
        ));
        assert!(rendered.contains(
            "sonic_salt_minion_deployment_status{hostname=\"switch-02\",salt_pex_build_version=\"202311\"} -1\n"
        ));
    }

    #[test]
    fn test_label_escaping() {
        let gauge = DeploymentGauge::new();
        gauge.set("bad\"host", "v\\1", 0);
        let rendered = gauge.render();
        assert!(rendered.contains("hostname=\"bad\\\"host\""));
        assert!(rendered.contains("salt_pex_build_version=\"v\\\\1\""));
    }
}
