// src/core/export.rs

// Flat exports of a scan's findings for downstream tooling: a JSON tree
// grouped by host, and a findings-per-row CSV.

use csv::Writer;
use serde_json::{json, Value};
use thiserror::Error;

use crate::core::error::StoreError;
use crate::core::store::Store;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// All hosts of a scan with their findings, as a JSON array. Hosts without
/// findings still appear, carrying an empty list.
pub fn findings_json(store: &dyn Store, scan_id: &str) -> Result<Value, StoreError> {
    let mut out = Vec::new();
    for host in store.hosts_for_scan(scan_id)? {
        let findings: Vec<Value> = store
            .findings_for_host(host.id)?
            .into_iter()
            .map(|f| {
                json!({
                    "source": f.source,
                    "name": f.name,
                    "severity": f.severity,
                    "cvss": f.cvss,
                })
            })
            .collect();
        out.push(json!({
            "ip": host.ip,
            "rdns": host.rdns,
            "findings": findings,
        }));
    }
    Ok(Value::Array(out))
}

/// One row per finding, with a header row. A missing CVSS score renders as
/// an empty field.
pub fn findings_csv(store: &dyn Store, scan_id: &str) -> Result<String, ExportError> {
    let mut wtr = Writer::from_writer(vec![]);
    wtr.write_record(["ip", "source", "name", "severity", "cvss"])?;

    for host in store.hosts_for_scan(scan_id)? {
        for f in store.findings_for_host(host.id)? {
            wtr.write_record([
                host.ip.as_str(),
                f.source.as_str(),
                f.name.as_str(),
                &f.severity.to_string(),
                &f.cvss.map(|v| v.to_string()).unwrap_or_default(),
            ])?;
        }
    }

    let bytes = wtr.into_inner().map_err(|e| ExportError::Csv(e.into_error().into()))?;
    String::from_utf8(bytes).map_err(|e| ExportError::Store(StoreError::Database(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{NewFinding, ScanRecord, Severity, SeverityTotals};
    use crate::core::store::MemoryStore;
    use chrono::Utc;

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_scan(&ScanRecord {
                id: "s1".to_string(),
                target: "10.0.0.5".to_string(),
                safe_mode: true,
                started: Utc::now(),
                finished: None,
                summary: SeverityTotals::default(),
            })
            .unwrap();
        let host = store
            .create_host("s1", "10.0.0.5", Some("web.internal"), None)
            .unwrap();
        store
            .add_finding(
                host.id,
                &NewFinding {
                    source: "nuclei".to_string(),
                    name: "exposed panel".to_string(),
                    severity: Severity::Medium,
                    cvss: Some(5.3),
                    evidence: None,
                    remediation: None,
                },
            )
            .unwrap();
        store
            .add_finding(
                host.id,
                &NewFinding {
                    source: "zap".to_string(),
                    name: "missing header".to_string(),
                    severity: Severity::Low,
                    cvss: None,
                    evidence: None,
                    remediation: None,
                },
            )
            .unwrap();
        store.create_host("s1", "10.0.0.6", None, None).unwrap();
        store
    }

    #[test]
    fn json_export_groups_findings_by_host() {
        let store = seeded_store();
        let value = findings_json(&store, "s1").unwrap();
        let hosts = value.as_array().unwrap();
        assert_eq!(hosts.len(), 2);

        assert_eq!(hosts[0]["ip"], "10.0.0.5");
        assert_eq!(hosts[0]["rdns"], "web.internal");
        let findings = hosts[0]["findings"].as_array().unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0]["source"], "nuclei");
        assert_eq!(findings[0]["severity"], "medium");
        assert_eq!(findings[0]["cvss"], 5.3);
        assert!(findings[1]["cvss"].is_null());

        assert_eq!(hosts[1]["ip"], "10.0.0.6");
        assert!(hosts[1]["findings"].as_array().unwrap().is_empty());
    }

    #[test]
    fn csv_export_writes_one_row_per_finding_with_header() {
        let store = seeded_store();
        let text = findings_csv(&store, "s1").unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ip,source,name,severity,cvss");
        assert_eq!(lines[1], "10.0.0.5,nuclei,exposed panel,medium,5.3");
        assert_eq!(lines[2], "10.0.0.5,zap,missing header,low,");
        assert_eq!(lines.len(), 3);
    }
}
