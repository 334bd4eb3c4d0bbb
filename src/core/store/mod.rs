// src/core/store/mod.rs

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::core::error::StoreError;
use crate::core::models::{
    FindingRecord, HostRecord, NewFinding, PortProbe, PortRecord, ScanRecord, SeverityTotals,
    WebTargetRecord,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Create/append/query-by-parent interface the pipelines and aggregator
/// depend on. The core cares only about these semantics, not about any query
/// language; workers call it concurrently, and each pipeline touches a
/// disjoint host subtree.
pub trait Store: Send + Sync {
    // Scans
    fn create_scan(&self, scan: &ScanRecord) -> Result<(), StoreError>;
    fn get_scan(&self, scan_id: &str) -> Result<Option<ScanRecord>, StoreError>;
    /// Overwrites (never increments) the scan's summary counters.
    fn set_scan_totals(&self, scan_id: &str, totals: &SeverityTotals) -> Result<(), StoreError>;
    fn finish_scan(&self, scan_id: &str, finished: DateTime<Utc>) -> Result<(), StoreError>;

    // Hosts
    fn create_host(
        &self,
        scan_id: &str,
        ip: &str,
        rdns: Option<&str>,
        whois_json: Option<&str>,
    ) -> Result<HostRecord, StoreError>;
    /// Sets the one post-creation host field. Exactly once: a second write
    /// for the same host is an error.
    fn set_host_tls(&self, host_id: i64, tls_json: &str) -> Result<(), StoreError>;
    fn hosts_for_scan(&self, scan_id: &str) -> Result<Vec<HostRecord>, StoreError>;

    // Append-only children
    fn add_port(&self, host_id: i64, probe: &PortProbe) -> Result<PortRecord, StoreError>;
    fn add_web_target(
        &self,
        host_id: i64,
        url: &str,
        fp_json: Option<&str>,
    ) -> Result<WebTargetRecord, StoreError>;
    fn add_finding(&self, host_id: i64, finding: &NewFinding) -> Result<FindingRecord, StoreError>;

    fn ports_for_host(&self, host_id: i64) -> Result<Vec<PortRecord>, StoreError>;
    fn web_targets_for_host(&self, host_id: i64) -> Result<Vec<WebTargetRecord>, StoreError>;
    fn findings_for_host(&self, host_id: i64) -> Result<Vec<FindingRecord>, StoreError>;
}
