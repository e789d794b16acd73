//! Reply shapes sent back to the peer
//!
//! Every command produces exactly one [`Reply`]. All replies except `echo` are
//! a single JSON object; `status` has two shapes depending on whether the
//! station link is up.

use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Deserializer, Serialize};

use crate::command::{ParseError, HELP_SIGNATURES};

/// Returned by [`Reply::render`] if serialization ever fails.
const ENCODE_FAILURE: &str = r#"{"error":"encode failed"}"#;

/// One discovered network, as listed while the link is down.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub ssid: String,
    pub rssi: i8,
    /// 0 = open, 1 = secured
    pub encryption: u8,
}

impl NetworkRecord {
    pub fn new(ssid: impl Into<String>, rssi: i8, secured: bool) -> Self {
        Self {
            ssid: ssid.into(),
            rssi,
            encryption: u8::from(secured),
        }
    }
}

/// What the scan cache can offer for the disconnected status shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkListing {
    /// A scan is in flight (or was just started).
    Scanning,
    /// Fresh cached results.
    Networks(Vec<NetworkRecord>),
    /// No cache and the radio refused to start a scan.
    Unavailable,
}

/// Fields common to both status shapes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub heap: u32,
    pub uptime: u64,
    pub ble: bool,
    pub saved_ssid: String,
    pub autoconnect: bool,
    pub devname: String,
    pub nvs_free: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedStatus {
    pub wifi: bool,
    pub rssi: i8,
    pub ip: String,
    pub heap: u32,
    pub uptime: u64,
    pub ble: bool,
    pub saved_ssid: String,
    pub autoconnect: bool,
    pub devname: String,
    pub nvs_free: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlinkedStatus {
    pub wifi: bool,
    pub rssi: i8,
    pub ip: String,
    pub heap: u32,
    pub uptime: u64,
    pub ble: bool,
    pub saved_ssid: String,
    pub autoconnect: bool,
    pub devname: String,
    pub nvs_free: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanning: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_networks: Option<Vec<NetworkRecord>>,
}

/// Both shapes carry the same leading keys, so decoding branches on `wifi`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatusReport {
    Linked(LinkedStatus),
    Unlinked(UnlinkedStatus),
}

impl<'de> Deserialize<'de> for StatusReport {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let status = UnlinkedStatus::deserialize(deserializer)?;
        if !status.wifi {
            return Ok(StatusReport::Unlinked(status));
        }

        Ok(StatusReport::Linked(LinkedStatus {
            wifi: true,
            rssi: status.rssi,
            ip: status.ip,
            heap: status.heap,
            uptime: status.uptime,
            ble: status.ble,
            saved_ssid: status.saved_ssid,
            autoconnect: status.autoconnect,
            devname: status.devname,
            nvs_free: status.nvs_free,
        }))
    }
}

impl StatusReport {
    pub fn linked(rssi: i8, ip: impl Into<String>, device: DeviceSnapshot) -> Self {
        StatusReport::Linked(LinkedStatus {
            wifi: true,
            rssi,
            ip: ip.into(),
            heap: device.heap,
            uptime: device.uptime,
            ble: device.ble,
            saved_ssid: device.saved_ssid,
            autoconnect: device.autoconnect,
            devname: device.devname,
            nvs_free: device.nvs_free,
        })
    }

    pub fn unlinked(device: DeviceSnapshot, listing: NetworkListing) -> Self {
        let (scanning, available_networks) = match listing {
            NetworkListing::Scanning => (Some(true), None),
            NetworkListing::Networks(networks) => (None, Some(networks)),
            NetworkListing::Unavailable => (Some(false), Some(Vec::new())),
        };

        StatusReport::Unlinked(UnlinkedStatus {
            wifi: false,
            rssi: 0,
            ip: String::new(),
            heap: device.heap,
            uptime: device.uptime,
            ble: device.ble,
            saved_ssid: device.saved_ssid,
            autoconnect: device.autoconnect,
            devname: device.devname,
            nvs_free: device.nvs_free,
            scanning,
            available_networks,
        })
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, StatusReport::Linked(_))
    }

    pub fn saved_ssid(&self) -> &str {
        match self {
            StatusReport::Linked(status) => &status.saved_ssid,
            StatusReport::Unlinked(status) => &status.saved_ssid,
        }
    }

    pub fn devname(&self) -> &str {
        match self {
            StatusReport::Linked(status) => &status.devname,
            StatusReport::Unlinked(status) => &status.devname,
        }
    }
}

/// One reply per command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    /// Sent verbatim, not JSON.
    #[serde(skip_serializing)]
    Echo(String),
    Status {
        status: &'static str,
    },
    Noted {
        status: &'static str,
        note: &'static str,
    },
    Error {
        error: String,
    },
    AutoConnect {
        autoconnect: bool,
    },
    DeviceName {
        devname: String,
        note: &'static str,
    },
    Commands {
        commands: &'static [&'static str],
    },
    Led {
        led: bool,
    },
    Report(StatusReport),
}

impl Reply {
    pub fn status(status: &'static str) -> Self {
        Reply::Status { status }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Reply::Error {
            error: error.into(),
        }
    }

    pub fn factory_reset() -> Self {
        Reply::Noted {
            status: "factory_reset",
            note: "restarting...",
        }
    }

    pub fn device_name(devname: impl Into<String>) -> Self {
        Reply::DeviceName {
            devname: devname.into(),
            note: "restart required",
        }
    }

    pub fn help() -> Self {
        Reply::Commands {
            commands: HELP_SIGNATURES,
        }
    }

    /// The exact text handed to the notifier.
    pub fn render(&self) -> String {
        match self {
            Reply::Echo(text) => text.clone(),
            other => {
                serde_json::to_string(other).unwrap_or_else(|_| String::from(ENCODE_FAILURE))
            }
        }
    }
}

impl From<ParseError> for Reply {
    fn from(err: ParseError) -> Self {
        use alloc::string::ToString;
        Reply::error(err.to_string())
    }
}

impl From<StatusReport> for Reply {
    fn from(report: StatusReport) -> Self {
        Reply::Report(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use alloc::string::ToString;
    use alloc::vec;

    fn device() -> DeviceSnapshot {
        DeviceSnapshot {
            heap: 123456,
            uptime: 42,
            ble: true,
            saved_ssid: "Home".to_string(),
            autoconnect: true,
            devname: "ESP32-BLE".to_string(),
            nvs_free: 100,
        }
    }

    #[test]
    fn test_simple_replies() {
        assert_eq!(Reply::status("connecting").render(), r#"{"status":"connecting"}"#);
        assert_eq!(
            Reply::factory_reset().render(),
            r#"{"status":"factory_reset","note":"restarting..."}"#
        );
        assert_eq!(
            Reply::AutoConnect { autoconnect: false }.render(),
            r#"{"autoconnect":false}"#
        );
        assert_eq!(Reply::Led { led: true }.render(), r#"{"led":true}"#);
    }

    #[test]
    fn test_echo_is_raw() {
        assert_eq!(Reply::Echo("not \"json\"".to_string()).render(), "not \"json\"");
    }

    #[test]
    fn test_device_name_is_escaped() {
        assert_eq!(
            Reply::device_name("My \"Device\"").render(),
            r#"{"devname":"My \"Device\"","note":"restart required"}"#
        );
    }

    #[test]
    fn test_parse_errors_render() {
        let unknown = Command::parse("foo()").unwrap_err();
        assert_eq!(Reply::from(unknown).render(), r#"{"error":"unknown: foo"}"#);

        let usage = Command::parse("connect()").unwrap_err();
        assert_eq!(
            Reply::from(usage).render(),
            r#"{"error":"usage: connect(\"ssid\",\"pass\")"}"#
        );
    }

    #[test]
    fn test_help_lists_signatures() {
        let rendered = Reply::help().render();
        assert!(rendered.starts_with(r#"{"commands":["connect(\"ssid\",\"pass\")","reconnect()""#));
        assert!(rendered.ends_with(r#""help()"]}"#));
    }

    #[test]
    fn test_linked_status_shape() {
        let report = StatusReport::linked(-61, "192.168.1.20", device());
        assert_eq!(
            Reply::from(report).render(),
            r#"{"wifi":true,"rssi":-61,"ip":"192.168.1.20","heap":123456,"uptime":42,"ble":true,"saved_ssid":"Home","autoconnect":true,"devname":"ESP32-BLE","nvs_free":100}"#
        );
    }

    #[test]
    fn test_unlinked_status_shapes_are_closed_objects() {
        let scanning = StatusReport::unlinked(device(), NetworkListing::Scanning);
        assert_eq!(
            Reply::from(scanning).render(),
            r#"{"wifi":false,"rssi":0,"ip":"","heap":123456,"uptime":42,"ble":true,"saved_ssid":"Home","autoconnect":true,"devname":"ESP32-BLE","nvs_free":100,"scanning":true}"#
        );

        let cached = StatusReport::unlinked(
            device(),
            NetworkListing::Networks(vec![
                NetworkRecord::new("Cafe", -70, false),
                NetworkRecord::new("Office", -48, true),
            ]),
        );
        let rendered = Reply::from(cached).render();
        assert!(rendered.ends_with(
            r#""nvs_free":100,"available_networks":[{"ssid":"Cafe","rssi":-70,"encryption":0},{"ssid":"Office","rssi":-48,"encryption":1}]}"#
        ));

        let unavailable = StatusReport::unlinked(device(), NetworkListing::Unavailable);
        assert!(Reply::from(unavailable)
            .render()
            .ends_with(r#""nvs_free":100,"scanning":false,"available_networks":[]}"#));
    }

    #[test]
    fn test_status_report_round_trips_through_untagged_shapes() {
        let text = Reply::from(StatusReport::unlinked(device(), NetworkListing::Scanning)).render();
        let parsed: StatusReport = serde_json::from_str(&text).unwrap();
        assert!(!parsed.is_linked());
        assert_eq!(parsed.saved_ssid(), "Home");

        let text = Reply::from(StatusReport::linked(-40, "10.0.0.2", device())).render();
        let parsed: StatusReport = serde_json::from_str(&text).unwrap();
        assert!(parsed.is_linked());
    }
}
