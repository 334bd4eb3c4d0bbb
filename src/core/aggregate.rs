// src/core/aggregate.rs

use std::path::Path;

use tracing::{info, warn};

use crate::core::error::StoreError;
use crate::core::models::{BatchManifest, ScanRecord, Severity, SeverityTotals};
use crate::core::store::Store;

/// Recomputes a scan's severity totals from a full rescan of its findings
/// and overwrites the stored counters. Never incremental: running this twice
/// in a row yields identical counts. Totals are eventually consistent when
/// writers are still racing the rescan.
///
/// Critical findings are counted but not folded into the stored buckets; the
/// count is returned so callers can surface it.
pub fn update_scan_totals(store: &dyn Store, scan_id: &str) -> Result<u64, StoreError> {
    let mut totals = SeverityTotals::default();
    let mut critical = 0u64;

    for host in store.hosts_for_scan(scan_id)? {
        for finding in store.findings_for_host(host.id)? {
            match finding.severity {
                Severity::Critical => critical += 1,
                Severity::High => totals.high += 1,
                Severity::Medium => totals.medium += 1,
                Severity::Low => totals.low += 1,
                Severity::Info => totals.info += 1,
            }
        }
    }

    store.set_scan_totals(scan_id, &totals)?;
    info!(
        scan_id,
        critical,
        high = totals.high,
        medium = totals.medium,
        low = totals.low,
        info_count = totals.info,
        "Recomputed severity totals."
    );
    Ok(critical)
}

/// Writes the manifest as pretty JSON under the artifacts directory. Failure
/// to write the file never fails the batch; the manifest is still returned
/// to the caller.
pub fn write_manifest(artifacts_dir: &Path, manifest: &BatchManifest) {
    let path = artifacts_dir.join(format!("{}.json", manifest.scan_id));
    let result = serde_json::to_string_pretty(manifest)
        .map_err(|e| e.to_string())
        .and_then(|text| std::fs::write(&path, text).map_err(|e| e.to_string()));
    match result {
        Ok(()) => info!(path = %path.display(), "Wrote batch manifest."),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to write batch manifest."),
    }
}

/// One-line assessment sentence for a finished scan, printed by the summary
/// command.
pub fn assessment_line(scan: &ScanRecord) -> String {
    let t = &scan.summary;
    let total = t.high + t.medium + t.low + t.info;
    let verdict = if t.high > 0 {
        "high-severity issues require immediate attention"
    } else if t.medium > 0 {
        "medium-severity issues should be reviewed"
    } else if t.low > 0 {
        "only low-severity issues were found"
    } else if total > 0 {
        "only informational findings were recorded"
    } else {
        "no findings were recorded"
    };
    format!(
        "Scan {} of {}: {} findings ({} high, {} medium, {} low, {} info); {}.",
        scan.id, scan.target, total, t.high, t.medium, t.low, t.info, verdict
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::NewFinding;
    use crate::core::store::MemoryStore;
    use chrono::Utc;

    fn seeded_store() -> (MemoryStore, i64) {
        let store = MemoryStore::new();
        store
            .create_scan(&ScanRecord {
                id: "s1".to_string(),
                target: "10.0.0.1".to_string(),
                safe_mode: true,
                started: Utc::now(),
                finished: None,
                summary: SeverityTotals::default(),
            })
            .unwrap();
        let host = store.create_host("s1", "10.0.0.1", None, None).unwrap();
        (store, host.id)
    }

    fn finding(severity: Severity) -> NewFinding {
        NewFinding {
            source: "nuclei".to_string(),
            name: "f".to_string(),
            severity,
            cvss: None,
            evidence: None,
            remediation: None,
        }
    }

    #[test]
    fn totals_are_a_full_rescan_and_idempotent() {
        let (store, host_id) = seeded_store();
        for sev in [
            Severity::High,
            Severity::High,
            Severity::Medium,
            Severity::Info,
            Severity::Critical,
        ] {
            store.add_finding(host_id, &finding(sev)).unwrap();
        }

        let critical = update_scan_totals(&store, "s1").unwrap();
        assert_eq!(critical, 1);
        let first = store.get_scan("s1").unwrap().unwrap().summary;
        assert_eq!(first.high, 2);
        assert_eq!(first.medium, 1);
        assert_eq!(first.low, 0);
        assert_eq!(first.info, 1);

        update_scan_totals(&store, "s1").unwrap();
        let second = store.get_scan("s1").unwrap().unwrap().summary;
        assert_eq!(first, second);
    }

    #[test]
    fn totals_overwrite_previous_values() {
        let (store, host_id) = seeded_store();
        store
            .set_scan_totals(
                "s1",
                &SeverityTotals {
                    high: 99,
                    medium: 99,
                    low: 99,
                    info: 99,
                },
            )
            .unwrap();
        store.add_finding(host_id, &finding(Severity::Low)).unwrap();

        update_scan_totals(&store, "s1").unwrap();
        let totals = store.get_scan("s1").unwrap().unwrap().summary;
        assert_eq!(totals.high, 0);
        assert_eq!(totals.low, 1);
    }

    #[test]
    fn assessment_line_picks_the_worst_bucket() {
        let scan = ScanRecord {
            id: "s1".to_string(),
            target: "10.0.0.1".to_string(),
            safe_mode: true,
            started: Utc::now(),
            finished: None,
            summary: SeverityTotals {
                high: 0,
                medium: 2,
                low: 1,
                info: 4,
            },
        };
        let line = assessment_line(&scan);
        assert!(line.contains("7 findings"));
        assert!(line.contains("medium-severity issues should be reviewed"));
    }
}
