// src/core/store/memory.rs

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::core::error::StoreError;
use crate::core::models::{
    FindingRecord, HostRecord, NewFinding, PortProbe, PortRecord, ScanRecord, SeverityTotals,
    WebTargetRecord,
};
use crate::core::store::Store;

/// In-memory store for tests and ephemeral runs. One mutex around the whole
/// table set; writes are short-lived, so contention stays negligible even
/// with a full worker pool.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    scans: HashMap<String, ScanRecord>,
    hosts: Vec<HostRecord>,
    ports: Vec<PortRecord>,
    web_targets: Vec<WebTargetRecord>,
    findings: Vec<FindingRecord>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    fn create_scan(&self, scan: &ScanRecord) -> Result<(), StoreError> {
        self.lock().scans.insert(scan.id.clone(), scan.clone());
        Ok(())
    }

    fn get_scan(&self, scan_id: &str) -> Result<Option<ScanRecord>, StoreError> {
        Ok(self.lock().scans.get(scan_id).cloned())
    }

    fn set_scan_totals(&self, scan_id: &str, totals: &SeverityTotals) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let scan = tables
            .scans
            .get_mut(scan_id)
            .ok_or_else(|| StoreError::UnknownScan(scan_id.to_string()))?;
        scan.summary = *totals;
        Ok(())
    }

    fn finish_scan(&self, scan_id: &str, finished: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let scan = tables
            .scans
            .get_mut(scan_id)
            .ok_or_else(|| StoreError::UnknownScan(scan_id.to_string()))?;
        scan.finished = Some(finished);
        Ok(())
    }

    fn create_host(
        &self,
        scan_id: &str,
        ip: &str,
        rdns: Option<&str>,
        whois_json: Option<&str>,
    ) -> Result<HostRecord, StoreError> {
        let mut tables = self.lock();
        if !tables.scans.contains_key(scan_id) {
            return Err(StoreError::UnknownScan(scan_id.to_string()));
        }
        let host = HostRecord {
            id: tables.next_id(),
            scan_id: scan_id.to_string(),
            ip: ip.to_string(),
            rdns: rdns.map(str::to_string),
            whois_json: whois_json.map(str::to_string),
            tls_json: None,
        };
        tables.hosts.push(host.clone());
        Ok(host)
    }

    fn set_host_tls(&self, host_id: i64, tls_json: &str) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let host = tables
            .hosts
            .iter_mut()
            .find(|h| h.id == host_id)
            .ok_or(StoreError::UnknownHost(host_id))?;
        if host.tls_json.is_some() {
            return Err(StoreError::TlsAlreadySet(host_id));
        }
        host.tls_json = Some(tls_json.to_string());
        Ok(())
    }

    fn hosts_for_scan(&self, scan_id: &str) -> Result<Vec<HostRecord>, StoreError> {
        Ok(self
            .lock()
            .hosts
            .iter()
            .filter(|h| h.scan_id == scan_id)
            .cloned()
            .collect())
    }

    fn add_port(&self, host_id: i64, probe: &PortProbe) -> Result<PortRecord, StoreError> {
        let mut tables = self.lock();
        if !tables.hosts.iter().any(|h| h.id == host_id) {
            return Err(StoreError::UnknownHost(host_id));
        }
        let port = PortRecord {
            id: tables.next_id(),
            host_id,
            port: probe.port,
            proto: probe.proto.clone(),
            state: probe.state,
            service: probe.service.clone(),
            product: probe.product.clone(),
            version: probe.version.clone(),
        };
        tables.ports.push(port.clone());
        Ok(port)
    }

    fn add_web_target(
        &self,
        host_id: i64,
        url: &str,
        fp_json: Option<&str>,
    ) -> Result<WebTargetRecord, StoreError> {
        let mut tables = self.lock();
        if !tables.hosts.iter().any(|h| h.id == host_id) {
            return Err(StoreError::UnknownHost(host_id));
        }
        let web = WebTargetRecord {
            id: tables.next_id(),
            host_id,
            url: url.to_string(),
            fp_json: fp_json.map(str::to_string),
        };
        tables.web_targets.push(web.clone());
        Ok(web)
    }

    fn add_finding(&self, host_id: i64, finding: &NewFinding) -> Result<FindingRecord, StoreError> {
        let mut tables = self.lock();
        if !tables.hosts.iter().any(|h| h.id == host_id) {
            return Err(StoreError::UnknownHost(host_id));
        }
        let record = FindingRecord {
            id: tables.next_id(),
            host_id,
            source: finding.source.clone(),
            name: finding.name.clone(),
            severity: finding.severity,
            cvss: finding.cvss,
            evidence: finding.evidence.clone(),
            remediation: finding.remediation.clone(),
        };
        tables.findings.push(record.clone());
        Ok(record)
    }

    fn ports_for_host(&self, host_id: i64) -> Result<Vec<PortRecord>, StoreError> {
        Ok(self
            .lock()
            .ports
            .iter()
            .filter(|p| p.host_id == host_id)
            .cloned()
            .collect())
    }

    fn web_targets_for_host(&self, host_id: i64) -> Result<Vec<WebTargetRecord>, StoreError> {
        Ok(self
            .lock()
            .web_targets
            .iter()
            .filter(|w| w.host_id == host_id)
            .cloned()
            .collect())
    }

    fn findings_for_host(&self, host_id: i64) -> Result<Vec<FindingRecord>, StoreError> {
        Ok(self
            .lock()
            .findings
            .iter()
            .filter(|f| f.host_id == host_id)
            .cloned()
            .collect())
    }
}
