// src/core/scanner/recon.rs

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::proto::rr::RecordType;
use serde_json::{Value, json};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Per-probe timeout. Recon probes are cheap and fail fast, well below the
/// tool timeouts of the heavier stages.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the registry lookup over HTTP.
const WHOIS_TIMEOUT: Duration = Duration::from_secs(10);

/// Forward record types gathered when reverse DNS succeeded.
const FORWARD_RECORD_TYPES: &[RecordType] = &[
    RecordType::A,
    RecordType::AAAA,
    RecordType::MX,
    RecordType::TXT,
];

/// Best-effort reverse DNS. Returns `None` for hostnames, lookup failures
/// and timeouts; never fatal.
pub async fn reverse_dns(resolver: &TokioAsyncResolver, target: &str) -> Option<String> {
    let ip = IpAddr::from_str(target).ok()?;
    match timeout(PROBE_TIMEOUT, resolver.reverse_lookup(ip)).await {
        Ok(Ok(response)) => {
            let name = response
                .iter()
                .next()
                .map(|ptr| ptr.to_string().trim_end_matches('.').to_string());
            debug!(target, rdns = ?name, "Reverse DNS lookup finished.");
            name
        }
        Ok(Err(e)) => {
            debug!(target, error = %e, "Reverse DNS lookup failed.");
            None
        }
        Err(_) => {
            debug!(target, "Reverse DNS lookup timed out.");
            None
        }
    }
}

/// Best-effort registry WHOIS via an RDAP endpoint. Failure of any kind
/// yields an empty record. `endpoint` is the RDAP base URL
/// (e.g. `https://rdap.org/ip`); `None` disables the lookup entirely.
pub async fn whois_ip(http: &reqwest::Client, endpoint: Option<&str>, target: &str) -> Value {
    let Some(base) = endpoint else {
        return json!({});
    };
    let url = format!("{}/{}", base.trim_end_matches('/'), target);
    let request = http.get(&url).timeout(WHOIS_TIMEOUT).send();
    match request.await {
        Ok(response) if response.status().is_success() => {
            match response.json::<Value>().await {
                Ok(record) => {
                    info!(target, "WHOIS lookup succeeded.");
                    record
                }
                Err(e) => {
                    warn!(target, error = %e, "WHOIS response was not valid JSON.");
                    json!({})
                }
            }
        }
        Ok(response) => {
            debug!(target, status = %response.status(), "WHOIS lookup rejected.");
            json!({})
        }
        Err(e) => {
            debug!(target, error = %e, "WHOIS lookup failed.");
            json!({})
        }
    }
}

/// Forward DNS lookups across a fixed set of record types, each one
/// independently allowed to fail. Only called once reverse DNS produced a
/// hostname.
pub async fn dns_records(
    resolver: &TokioAsyncResolver,
    host: &str,
) -> BTreeMap<String, Vec<String>> {
    let mut records = BTreeMap::new();
    for rtype in FORWARD_RECORD_TYPES {
        match timeout(PROBE_TIMEOUT, resolver.lookup(host, *rtype)).await {
            Ok(Ok(response)) => {
                let values: Vec<String> = response.iter().map(|r| r.to_string()).collect();
                if !values.is_empty() {
                    records.insert(rtype.to_string(), values);
                }
            }
            Ok(Err(e)) => debug!(host, %rtype, error = %e, "Forward DNS lookup failed."),
            Err(_) => debug!(host, %rtype, "Forward DNS lookup timed out."),
        }
    }
    info!(host, types = records.len(), "Forward DNS lookups finished.");
    records
}
