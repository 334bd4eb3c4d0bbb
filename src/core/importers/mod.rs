// src/core/importers/mod.rs

// Ingests findings produced by external assessment tools into an existing
// scan, then recomputes the scan's severity totals. Imports are idempotent:
// a finding already present for the same host, source and name is skipped.

pub mod nessus;
pub mod zap;

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::info;

use crate::core::aggregate;
use crate::core::error::StoreError;
use crate::core::models::{NewFinding, Severity};
use crate::core::store::Store;

pub use nessus::parse_nessus;
pub use zap::parse_zap;

const TEXT_LIMIT: usize = 400;

/// One normalized finding lifted out of an external report. `host` is the
/// address the report attributes it to, when the format carries one.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFinding {
    pub host: Option<String>,
    pub name: String,
    pub severity: Severity,
    pub cvss: Option<f64>,
    pub evidence: Option<String>,
    pub remediation: Option<String>,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to parse report: {0}")]
    Parse(String),
    #[error("host {host} not found in scan {scan_id}")]
    HostNotFound { scan_id: String, host: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn truncate_text(text: Option<&str>) -> Option<String> {
    let text = text?;
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(TEXT_LIMIT).collect())
}

/// (source, name) pairs already persisted for a host; imports skip these.
fn existing_names(store: &dyn Store, host_id: i64) -> Result<HashSet<(String, String)>, StoreError> {
    Ok(store
        .findings_for_host(host_id)?
        .into_iter()
        .map(|f| (f.source, f.name))
        .collect())
}

/// Imports a .nessus XML report into a scan. Report hosts are matched to the
/// scan's hosts by IP; items for addresses the scan never touched are
/// dropped. Returns the number of findings persisted.
pub fn import_nessus(
    store: &dyn Store,
    scan_id: &str,
    xml: &str,
) -> Result<usize, ImportError> {
    let by_ip: HashMap<String, i64> = store
        .hosts_for_scan(scan_id)?
        .into_iter()
        .map(|h| (h.ip, h.id))
        .collect();

    let mut seen: HashMap<i64, HashSet<(String, String)>> = HashMap::new();
    let mut count = 0usize;

    for item in parse_nessus(xml)? {
        let Some(ip) = item.host.as_deref() else {
            continue;
        };
        let Some(&host_id) = by_ip.get(ip) else {
            continue;
        };
        let known = match seen.entry(host_id) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(existing_names(store, host_id)?)
            }
        };
        let key = ("nessus".to_string(), item.name.clone());
        if known.contains(&key) {
            continue;
        }
        store.add_finding(
            host_id,
            &NewFinding {
                source: "nessus".to_string(),
                name: item.name,
                severity: item.severity,
                cvss: item.cvss,
                evidence: item.evidence,
                remediation: item.remediation,
            },
        )?;
        known.insert(key);
        count += 1;
    }

    aggregate::update_scan_totals(store, scan_id)?;
    info!(scan_id, count, "Imported Nessus findings.");
    Ok(count)
}

/// Imports a ZAP JSON report into a scan. The report carries no scan host
/// address, so the caller names the host the alerts belong to; an unknown
/// host is an error. Returns the number of findings persisted.
pub fn import_zap(
    store: &dyn Store,
    scan_id: &str,
    host_ip: &str,
    json: &str,
) -> Result<usize, ImportError> {
    let host = store
        .hosts_for_scan(scan_id)?
        .into_iter()
        .find(|h| h.ip == host_ip)
        .ok_or_else(|| ImportError::HostNotFound {
            scan_id: scan_id.to_string(),
            host: host_ip.to_string(),
        })?;

    let mut known = existing_names(store, host.id)?;
    let mut count = 0usize;

    for item in parse_zap(json)? {
        let key = ("zap".to_string(), item.name.clone());
        if known.contains(&key) {
            continue;
        }
        store.add_finding(
            host.id,
            &NewFinding {
                source: "zap".to_string(),
                name: item.name,
                severity: item.severity,
                cvss: None,
                evidence: item.evidence,
                remediation: item.remediation,
            },
        )?;
        known.insert(key);
        count += 1;
    }

    aggregate::update_scan_totals(store, scan_id)?;
    info!(scan_id, host = host_ip, count, "Imported ZAP alerts.");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{ScanRecord, SeverityTotals};
    use crate::core::store::MemoryStore;
    use chrono::Utc;

    const NESSUS_XML: &str = r#"<NessusClientData_v2><Report>
      <ReportHost name="10.0.0.5">
        <ReportItem pluginName="Expired Certificate" severity="3" cvssBaseScore="7.5">
          <description>Expired.</description>
        </ReportItem>
        <ReportItem pluginName="Banner Grab" severity="0"/>
      </ReportHost>
      <ReportHost name="192.168.9.9">
        <ReportItem pluginName="Not In Scan" severity="4"/>
      </ReportHost>
    </Report></NessusClientData_v2>"#;

    const ZAP_JSON: &str = r#"{"site":[{"alerts":[
      {"name":"Missing Header","riskdesc":"Low (Medium)","desc":"No header.","solution":"Add it."},
      {"name":"SQL Injection","riskdesc":"High (High)"}
    ]}]}"#;

    fn seeded_store() -> (MemoryStore, i64) {
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
        let host = store.create_host("s1", "10.0.0.5", None, None).unwrap();
        (store, host.id)
    }

    #[test]
    fn nessus_import_matches_hosts_by_ip_and_updates_totals() {
        let (store, host_id) = seeded_store();
        let count = import_nessus(&store, "s1", NESSUS_XML).unwrap();
        assert_eq!(count, 2);

        let findings = store.findings_for_host(host_id).unwrap();
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.source == "nessus"));
        assert_eq!(findings[0].name, "Expired Certificate");
        assert_eq!(findings[0].cvss, Some(7.5));

        let totals = store.get_scan("s1").unwrap().unwrap().summary;
        assert_eq!(totals.high, 1);
        assert_eq!(totals.info, 1);
    }

    #[test]
    fn nessus_reimport_is_idempotent() {
        let (store, host_id) = seeded_store();
        assert_eq!(import_nessus(&store, "s1", NESSUS_XML).unwrap(), 2);
        assert_eq!(import_nessus(&store, "s1", NESSUS_XML).unwrap(), 0);
        assert_eq!(store.findings_for_host(host_id).unwrap().len(), 2);
    }

    #[test]
    fn zap_import_requires_a_known_host() {
        let (store, _) = seeded_store();
        let err = import_zap(&store, "s1", "10.9.9.9", ZAP_JSON).unwrap_err();
        assert!(matches!(err, ImportError::HostNotFound { .. }));
    }

    #[test]
    fn zap_import_attaches_alerts_to_the_named_host() {
        let (store, host_id) = seeded_store();
        let count = import_zap(&store, "s1", "10.0.0.5", ZAP_JSON).unwrap();
        assert_eq!(count, 2);

        let findings = store.findings_for_host(host_id).unwrap();
        assert!(findings.iter().all(|f| f.source == "zap" && f.cvss.is_none()));

        assert_eq!(import_zap(&store, "s1", "10.0.0.5", ZAP_JSON).unwrap(), 0);

        let totals = store.get_scan("s1").unwrap().unwrap().summary;
        assert_eq!(totals.high, 1);
        assert_eq!(totals.low, 1);
    }
}
