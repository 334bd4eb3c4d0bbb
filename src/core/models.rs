// src/core/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// --- Closed Sets ---

/// Normalized severity of a finding. Anything a tool reports outside this set
/// is bucketed to `Info`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Normalizes a raw severity string from an external tool.
    pub fn normalize(raw: &str) -> Self {
        raw.trim()
            .to_ascii_lowercase()
            .parse()
            .unwrap_or(Severity::Info)
    }
}

/// State of a discovered port. Unrecognized states bucket to `Unknown`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
    Unknown,
}

impl PortState {
    pub fn normalize(raw: &str) -> Self {
        raw.trim()
            .to_ascii_lowercase()
            .parse()
            .unwrap_or(PortState::Unknown)
    }
}

// --- Persisted Entities ---

/// Summary counters recomputed from a full rescan of a scan's findings.
/// Critical findings are tallied during aggregation but kept out of these
/// counters, matching the reporting convention of the rest of the system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityTotals {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub info: u64,
}

/// One orchestrator invocation across one or more targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: String,
    pub target: String,
    pub safe_mode: bool,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub summary: SeverityTotals,
}

/// A scanned address. Created once per target after the port-scan stage,
/// regardless of that stage's success. `tls_json` is the one field written
/// after creation, exactly once, if the TLS stage runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: i64,
    pub scan_id: String,
    pub ip: String,
    pub rdns: Option<String>,
    pub whois_json: Option<String>,
    pub tls_json: Option<String>,
}

/// A port discovered on a host. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRecord {
    pub id: i64,
    pub host_id: i64,
    pub port: u16,
    pub proto: String,
    pub state: PortState,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
}

/// A web endpoint built from an open HTTP/HTTPS port. Created only when the
/// web-fingerprint stage runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebTargetRecord {
    pub id: i64,
    pub host_id: i64,
    pub url: String,
    pub fp_json: Option<String>,
}

/// A normalized vulnerability/observation record attached to a host.
/// Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingRecord {
    pub id: i64,
    pub host_id: i64,
    pub source: String,
    pub name: String,
    pub severity: Severity,
    pub cvss: Option<f64>,
    pub evidence: Option<String>,
    pub remediation: Option<String>,
}

/// Fields for a finding about to be persisted; the store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFinding {
    pub source: String,
    pub name: String,
    pub severity: Severity,
    pub cvss: Option<f64>,
    pub evidence: Option<String>,
    pub remediation: Option<String>,
}

// --- Typed Adapter Shapes ---
// Each external tool gets a typed shape for the successful-parse case. The
// persistence layer only ever sees these serialized to opaque JSON text.

/// One port entry parsed from the port scanner's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortProbe {
    pub port: u16,
    pub proto: String,
    pub state: PortState,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
}

impl PortProbe {
    /// True when this port should yield a web target: an open port carrying
    /// an HTTP or HTTPS service marker.
    pub fn is_open_web(&self) -> bool {
        self.state == PortState::Open
            && matches!(self.service.as_deref(), Some("http") | Some("https"))
    }

    /// True when this port qualifies for TLS analysis: open, and either port
    /// 443 or an HTTPS service marker.
    pub fn is_open_https(&self) -> bool {
        self.state == PortState::Open
            && (self.port == 443 || self.service.as_deref() == Some("https"))
    }

    /// URL scheme for this port: 443 or an "https" service marker means
    /// https, everything else http.
    pub fn url_scheme(&self) -> &'static str {
        if self.port == 443 || self.service.as_deref() == Some("https") {
            "https"
        } else {
            "http"
        }
    }
}

/// Web technology fingerprint for one URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fingerprint {
    pub plugins: Vec<String>,
}

/// Certificate details extracted by the built-in TLS inspector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateSummary {
    pub subject_name: String,
    pub issuer_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub days_until_expiry: i64,
    pub is_valid: bool,
}

/// Outcome of the built-in protocol/certificate inspector. When the raw
/// connect probe fails, `probe_error` carries the specific unreachability
/// reason and no handshake is attempted; `error` is reserved for failures of
/// the analysis itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsInspection {
    pub reachable: bool,
    pub probe_error: Option<String>,
    pub certificate: Option<CertificateSummary>,
    pub supported_protocols: Vec<String>,
    pub error: Option<String>,
}

/// An open HTTPS port noted in the TLS report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpsPort {
    pub port: u16,
    pub service: Option<String>,
}

// --- Manifest ---

/// Terminal status of a batch. A single bad target never produces `Error`;
/// only orchestration-level failures do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BatchStatus {
    Completed,
    Error,
}

/// The batch-level terminal record a caller polls to learn completion
/// status. Also written as pretty JSON under the artifacts directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchManifest {
    #[serde(rename = "batchId")]
    pub scan_id: String,
    pub targets: Vec<String>,
    pub started: DateTime<Utc>,
    pub safe_mode: bool,
    pub concurrent: bool,
    pub max_workers: usize,
    pub status: BatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_normalizes_known_values_case_insensitively() {
        assert_eq!(Severity::normalize("HIGH"), Severity::High);
        assert_eq!(Severity::normalize("  critical "), Severity::Critical);
        assert_eq!(Severity::normalize("low"), Severity::Low);
    }

    #[test]
    fn severity_buckets_unrecognized_values_to_info() {
        assert_eq!(Severity::normalize("urgent"), Severity::Info);
        assert_eq!(Severity::normalize(""), Severity::Info);
    }

    #[test]
    fn port_state_buckets_unrecognized_values_to_unknown() {
        assert_eq!(PortState::normalize("open"), PortState::Open);
        assert_eq!(PortState::normalize("open|filtered"), PortState::Unknown);
    }

    #[test]
    fn manifest_serializes_with_camel_case_schema() {
        let manifest = BatchManifest {
            scan_id: "b1".to_string(),
            targets: vec!["10.0.0.1".to_string()],
            started: Utc::now(),
            safe_mode: true,
            concurrent: false,
            max_workers: 8,
            status: BatchStatus::Completed,
            error: None,
        };
        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["batchId"], "b1");
        assert_eq!(value["safeMode"], true);
        assert_eq!(value["maxWorkers"], 8);
        assert_eq!(value["status"], "completed");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn open_https_detection_covers_port_and_service_marker() {
        let by_port = PortProbe {
            port: 443,
            proto: "tcp".into(),
            state: PortState::Open,
            service: Some("http".into()),
            product: None,
            version: None,
        };
        assert!(by_port.is_open_https());
        assert_eq!(by_port.url_scheme(), "https");

        let by_service = PortProbe {
            port: 8443,
            proto: "tcp".into(),
            state: PortState::Open,
            service: Some("https".into()),
            product: None,
            version: None,
        };
        assert!(by_service.is_open_https());
        assert_eq!(by_service.url_scheme(), "https");

        let filtered = PortProbe {
            port: 443,
            proto: "tcp".into(),
            state: PortState::Filtered,
            service: Some("https".into()),
            product: None,
            version: None,
        };
        assert!(!filtered.is_open_https());
        assert!(!filtered.is_open_web());
    }
}
