//! Data types sent to the client over WebSocket.
//! Keep this module minimal and stable: it defines the wire format.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct UsageData {
    pub percent: f32,
    pub total: u64,
    pub used: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NetData {
    // cumulative totals since boot (client should diff to get rates)
    pub sent: u64,
    pub received: u64,
}

/// Payload for the `/` page.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub cpu: f32,
    pub ram: UsageData,
    pub swap: UsageData,
    pub disk: UsageData,
    pub network: NetData,
    /// CPU temperature in degrees Celsius; null when the host has no sensor.
    pub temp: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu: f32,
    /// Resident set size in MiB.
    pub ram: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ProcessList {
    pub processes: Vec<ProcessInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SoftwareEntry {
    pub id: i32,
    pub installed: bool,
    pub name: String,
    pub description: String,
    pub dependencies: String,
    pub docs: String,
}

impl SoftwareEntry {
    /// Placeholder row for software the tool reports as disabled.
    pub fn disabled() -> Self {
        Self {
            id: -1,
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SoftwareList {
    pub software: Vec<SoftwareEntry>,
    pub response: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ServiceEntry {
    pub name: String,
    /// `active`, `inactive`, `failed` or `unknown`.
    pub status: String,
    /// Start time as reported by the service tool; empty unless active.
    pub start: String,
    /// Error log lines, only filled for failed units.
    pub log: String,
}

/// Payload for the `/service` page.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ServiceList {
    pub services: Vec<ServiceEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct HostInfo {
    pub hostname: String,
    /// Seconds since boot.
    pub uptime: u64,
    pub platform: String,
    pub kernel: String,
    pub arch: String,
    pub interface: String,
    pub ip: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_snapshot_uses_dashboard_field_names() {
        let snap = StatsSnapshot {
            cpu: 12.5,
            network: NetData {
                sent: 10,
                received: 20,
            },
            ..StatsSnapshot::default()
        };
        let v = serde_json::to_value(&snap).unwrap();
        assert_eq!(v["cpu"], 12.5);
        assert_eq!(v["ram"]["percent"], 0.0);
        assert_eq!(v["network"]["sent"], 10);
        assert_eq!(v["network"]["received"], 20);
        assert!(v["temp"].is_null());

        let warm = StatsSnapshot {
            temp: Some(48.5),
            ..StatsSnapshot::default()
        };
        assert_eq!(serde_json::to_value(&warm).unwrap()["temp"], 48.5);
    }

    #[test]
    fn disabled_entry_is_empty_with_negative_id() {
        let v = serde_json::to_value(SoftwareEntry::disabled()).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "id": -1,
                "installed": false,
                "name": "",
                "description": "",
                "dependencies": "",
                "docs": ""
            })
        );
    }
}
