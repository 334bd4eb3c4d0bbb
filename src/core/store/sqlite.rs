// src/core/store/sqlite.rs

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::core::error::StoreError;
use crate::core::models::{
    FindingRecord, HostRecord, NewFinding, PortProbe, PortRecord, PortState, ScanRecord, Severity,
    SeverityTotals, WebTargetRecord,
};
use crate::core::store::Store;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS scans (
  id            TEXT PRIMARY KEY,
  target        TEXT NOT NULL,
  safe_mode     INTEGER NOT NULL DEFAULT 1,
  started       TEXT NOT NULL,
  finished      TEXT,
  summary_high   INTEGER NOT NULL DEFAULT 0,
  summary_medium INTEGER NOT NULL DEFAULT 0,
  summary_low    INTEGER NOT NULL DEFAULT 0,
  summary_info   INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS hosts (
  id         INTEGER PRIMARY KEY AUTOINCREMENT,
  scan_id    TEXT NOT NULL REFERENCES scans(id),
  ip         TEXT NOT NULL,
  rdns       TEXT,
  whois_json TEXT,
  tls_json   TEXT
);
CREATE INDEX IF NOT EXISTS idx_hosts_scan ON hosts(scan_id);

CREATE TABLE IF NOT EXISTS ports (
  id      INTEGER PRIMARY KEY AUTOINCREMENT,
  host_id INTEGER NOT NULL REFERENCES hosts(id),
  port    INTEGER NOT NULL,
  proto   TEXT NOT NULL,
  state   TEXT NOT NULL,
  service TEXT,
  product TEXT,
  version TEXT
);
CREATE INDEX IF NOT EXISTS idx_ports_host ON ports(host_id);

CREATE TABLE IF NOT EXISTS webtargets (
  id      INTEGER PRIMARY KEY AUTOINCREMENT,
  host_id INTEGER NOT NULL REFERENCES hosts(id),
  url     TEXT NOT NULL,
  fp_json TEXT
);
CREATE INDEX IF NOT EXISTS idx_webtargets_host ON webtargets(host_id);

CREATE TABLE IF NOT EXISTS findings (
  id          INTEGER PRIMARY KEY AUTOINCREMENT,
  host_id     INTEGER NOT NULL REFERENCES hosts(id),
  source      TEXT NOT NULL,
  name        TEXT NOT NULL,
  severity    TEXT NOT NULL,
  cvss        REAL,
  evidence    TEXT,
  remediation TEXT
);
CREATE INDEX IF NOT EXISTS idx_findings_host ON findings(host_id);
";

/// SQLite-backed store. One connection behind a mutex; every stage write is
/// short-lived, and the busy timeout absorbs what little contention a full
/// worker pool produces.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (and migrates) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.as_ref().display(), "Opened scan database.");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

impl Store for SqliteStore {
    fn create_scan(&self, scan: &ScanRecord) -> Result<(), StoreError> {
        self.lock().execute(
            "INSERT INTO scans (id, target, safe_mode, started, finished,
                                summary_high, summary_medium, summary_low, summary_info)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                scan.id,
                scan.target,
                scan.safe_mode,
                scan.started.to_rfc3339(),
                scan.finished.map(|t| t.to_rfc3339()),
                scan.summary.high,
                scan.summary.medium,
                scan.summary.low,
                scan.summary.info,
            ],
        )?;
        Ok(())
    }

    fn get_scan(&self, scan_id: &str) -> Result<Option<ScanRecord>, StoreError> {
        let conn = self.lock();
        let scan = conn
            .query_row(
                "SELECT id, target, safe_mode, started, finished,
                        summary_high, summary_medium, summary_low, summary_info
                 FROM scans WHERE id = ?1",
                params![scan_id],
                |row| {
                    Ok(ScanRecord {
                        id: row.get(0)?,
                        target: row.get(1)?,
                        safe_mode: row.get(2)?,
                        started: parse_timestamp(row.get(3)?),
                        finished: row.get::<_, Option<String>>(4)?.map(parse_timestamp),
                        summary: SeverityTotals {
                            high: row.get(5)?,
                            medium: row.get(6)?,
                            low: row.get(7)?,
                            info: row.get(8)?,
                        },
                    })
                },
            )
            .optional()?;
        Ok(scan)
    }

    fn set_scan_totals(&self, scan_id: &str, totals: &SeverityTotals) -> Result<(), StoreError> {
        let changed = self.lock().execute(
            "UPDATE scans SET summary_high = ?2, summary_medium = ?3,
                              summary_low = ?4, summary_info = ?5
             WHERE id = ?1",
            params![scan_id, totals.high, totals.medium, totals.low, totals.info],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownScan(scan_id.to_string()));
        }
        Ok(())
    }

    fn finish_scan(&self, scan_id: &str, finished: DateTime<Utc>) -> Result<(), StoreError> {
        let changed = self.lock().execute(
            "UPDATE scans SET finished = ?2 WHERE id = ?1",
            params![scan_id, finished.to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownScan(scan_id.to_string()));
        }
        Ok(())
    }

    fn create_host(
        &self,
        scan_id: &str,
        ip: &str,
        rdns: Option<&str>,
        whois_json: Option<&str>,
    ) -> Result<HostRecord, StoreError> {
        let conn = self.lock();
        let known: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM scans WHERE id = ?1)",
            params![scan_id],
            |row| row.get(0),
        )?;
        if !known {
            return Err(StoreError::UnknownScan(scan_id.to_string()));
        }
        conn.execute(
            "INSERT INTO hosts (scan_id, ip, rdns, whois_json) VALUES (?1, ?2, ?3, ?4)",
            params![scan_id, ip, rdns, whois_json],
        )?;
        Ok(HostRecord {
            id: conn.last_insert_rowid(),
            scan_id: scan_id.to_string(),
            ip: ip.to_string(),
            rdns: rdns.map(str::to_string),
            whois_json: whois_json.map(str::to_string),
            tls_json: None,
        })
    }

    fn set_host_tls(&self, host_id: i64, tls_json: &str) -> Result<(), StoreError> {
        let conn = self.lock();
        let existing: Option<Option<String>> = conn
            .query_row(
                "SELECT tls_json FROM hosts WHERE id = ?1",
                params![host_id],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            None => Err(StoreError::UnknownHost(host_id)),
            Some(Some(_)) => Err(StoreError::TlsAlreadySet(host_id)),
            Some(None) => {
                conn.execute(
                    "UPDATE hosts SET tls_json = ?2 WHERE id = ?1",
                    params![host_id, tls_json],
                )?;
                Ok(())
            }
        }
    }

    fn hosts_for_scan(&self, scan_id: &str) -> Result<Vec<HostRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, scan_id, ip, rdns, whois_json, tls_json
             FROM hosts WHERE scan_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![scan_id], |row| {
            Ok(HostRecord {
                id: row.get(0)?,
                scan_id: row.get(1)?,
                ip: row.get(2)?,
                rdns: row.get(3)?,
                whois_json: row.get(4)?,
                tls_json: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn add_port(&self, host_id: i64, probe: &PortProbe) -> Result<PortRecord, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO ports (host_id, port, proto, state, service, product, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                host_id,
                probe.port,
                probe.proto,
                probe.state.to_string(),
                probe.service,
                probe.product,
                probe.version,
            ],
        )?;
        Ok(PortRecord {
            id: conn.last_insert_rowid(),
            host_id,
            port: probe.port,
            proto: probe.proto.clone(),
            state: probe.state,
            service: probe.service.clone(),
            product: probe.product.clone(),
            version: probe.version.clone(),
        })
    }

    fn add_web_target(
        &self,
        host_id: i64,
        url: &str,
        fp_json: Option<&str>,
    ) -> Result<WebTargetRecord, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO webtargets (host_id, url, fp_json) VALUES (?1, ?2, ?3)",
            params![host_id, url, fp_json],
        )?;
        Ok(WebTargetRecord {
            id: conn.last_insert_rowid(),
            host_id,
            url: url.to_string(),
            fp_json: fp_json.map(str::to_string),
        })
    }

    fn add_finding(&self, host_id: i64, finding: &NewFinding) -> Result<FindingRecord, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO findings (host_id, source, name, severity, cvss, evidence, remediation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                host_id,
                finding.source,
                finding.name,
                finding.severity.to_string(),
                finding.cvss,
                finding.evidence,
                finding.remediation,
            ],
        )?;
        Ok(FindingRecord {
            id: conn.last_insert_rowid(),
            host_id,
            source: finding.source.clone(),
            name: finding.name.clone(),
            severity: finding.severity,
            cvss: finding.cvss,
            evidence: finding.evidence.clone(),
            remediation: finding.remediation.clone(),
        })
    }

    fn ports_for_host(&self, host_id: i64) -> Result<Vec<PortRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, host_id, port, proto, state, service, product, version
             FROM ports WHERE host_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![host_id], |row| {
            Ok(PortRecord {
                id: row.get(0)?,
                host_id: row.get(1)?,
                port: row.get(2)?,
                proto: row.get(3)?,
                state: PortState::normalize(&row.get::<_, String>(4)?),
                service: row.get(5)?,
                product: row.get(6)?,
                version: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn web_targets_for_host(&self, host_id: i64) -> Result<Vec<WebTargetRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, host_id, url, fp_json FROM webtargets WHERE host_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![host_id], |row| {
            Ok(WebTargetRecord {
                id: row.get(0)?,
                host_id: row.get(1)?,
                url: row.get(2)?,
                fp_json: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn findings_for_host(&self, host_id: i64) -> Result<Vec<FindingRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, host_id, source, name, severity, cvss, evidence, remediation
             FROM findings WHERE host_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![host_id], |row| {
            Ok(FindingRecord {
                id: row.get(0)?,
                host_id: row.get(1)?,
                source: row.get(2)?,
                name: row.get(3)?,
                severity: Severity::normalize(&row.get::<_, String>(4)?),
                cvss: row.get(5)?,
                evidence: row.get(6)?,
                remediation: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Severity;

    fn scan(id: &str) -> ScanRecord {
        ScanRecord {
            id: id.to_string(),
            target: "10.0.0.1".to_string(),
            safe_mode: true,
            started: Utc::now(),
            finished: None,
            summary: SeverityTotals::default(),
        }
    }

    #[test]
    fn round_trips_the_full_entity_tree() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_scan(&scan("s1")).unwrap();
        let host = store
            .create_host("s1", "10.0.0.1", Some("gw.lab"), Some("{}"))
            .unwrap();

        let probe = PortProbe {
            port: 443,
            proto: "tcp".into(),
            state: PortState::Open,
            service: Some("https".into()),
            product: Some("nginx".into()),
            version: Some("1.18.0".into()),
        };
        store.add_port(host.id, &probe).unwrap();
        store.add_web_target(host.id, "https://10.0.0.1:443", None).unwrap();
        store
            .add_finding(
                host.id,
                &NewFinding {
                    source: "nuclei".into(),
                    name: "X".into(),
                    severity: Severity::High,
                    cvss: Some(7.5),
                    evidence: None,
                    remediation: None,
                },
            )
            .unwrap();

        let hosts = store.hosts_for_scan("s1").unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].rdns.as_deref(), Some("gw.lab"));

        let ports = store.ports_for_host(host.id).unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].state, PortState::Open);
        assert_eq!(ports[0].version.as_deref(), Some("1.18.0"));

        assert_eq!(store.web_targets_for_host(host.id).unwrap().len(), 1);
        let findings = store.findings_for_host(host.id).unwrap();
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].cvss, Some(7.5));
    }

    #[test]
    fn tls_json_is_write_once() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_scan(&scan("s1")).unwrap();
        let host = store.create_host("s1", "10.0.0.1", None, None).unwrap();
        store.set_host_tls(host.id, "{\"a\":1}").unwrap();
        assert!(matches!(
            store.set_host_tls(host.id, "{}"),
            Err(StoreError::TlsAlreadySet(_))
        ));
        let hosts = store.hosts_for_scan("s1").unwrap();
        assert_eq!(hosts[0].tls_json.as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn totals_update_rejects_unknown_scan() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(
            store.set_scan_totals("nope", &SeverityTotals::default()),
            Err(StoreError::UnknownScan(_))
        ));
    }
}
