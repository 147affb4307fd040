//! The `qtmcp://status` resource

use serde::Serialize;

use crate::config::Mode;

pub const STATUS_URI: &str = "qtmcp://status";
pub const STATUS_NAME: &str = "probe_status";

/// Connection and discovery state at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub ws_url: Option<String>,
    pub mode: Mode,
    pub discovery_active: bool,
    pub discovered_probes: usize,
}

impl StatusSnapshot {
    /// Compact JSON served as the resource body
    pub fn to_resource_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_text_shape() {
        let snapshot = StatusSnapshot {
            connected: false,
            ws_url: None,
            mode: Mode::Native,
            discovery_active: true,
            discovered_probes: 2,
        };
        let value: serde_json::Value =
            serde_json::from_str(&snapshot.to_resource_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "connected": false,
                "ws_url": null,
                "mode": "native",
                "discovery_active": true,
                "discovered_probes": 2
            })
        );
    }
}
