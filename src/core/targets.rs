// src/core/targets.rs

use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;
use tracing::debug;

use crate::core::error::TargetParseError;

/// Expands a raw target specification into a flat ordered list of
/// addressable targets.
///
/// Comma-separated entries are split and each expanded recursively; the
/// results are concatenated in input order with no deduplication, so a
/// literal address that also falls inside a CIDR block in the same spec is
/// scanned twice. CIDR notation expands to every usable host address in the
/// block (network and broadcast excluded). A valid IP literal expands to
/// itself; anything else is treated as an opaque hostname whose resolution is
/// deferred to the pipeline stages.
///
/// Fails with `InvalidTarget` when CIDR or IP syntax cannot be parsed, which
/// happens before any pipeline is scheduled.
pub fn expand_targets(target: &str) -> Result<Vec<String>, TargetParseError> {
    let target = target.trim();
    if target.is_empty() {
        return Ok(Vec::new());
    }

    if target.contains(',') {
        let mut expanded = Vec::new();
        for part in target.split(',') {
            expanded.extend(expand_targets(part.trim())?);
        }
        return Ok(expanded);
    }

    if target.contains('/') {
        let net = IpNet::from_str(target).map_err(|e| TargetParseError::InvalidTarget {
            spec: target.to_string(),
            detail: e.to_string(),
        })?;
        let hosts: Vec<String> = net.hosts().map(|ip| ip.to_string()).collect();
        debug!(spec = %target, count = hosts.len(), "Expanded CIDR block.");
        return Ok(hosts);
    }

    if IpAddr::from_str(target).is_ok() {
        return Ok(vec![target.to_string()]);
    }

    // Not an IP literal: treat as an opaque hostname and let the pipeline
    // resolve it.
    Ok(vec![target.to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_list_expands_in_order_without_dedup() {
        let out = expand_targets("10.0.0.1,example.com,10.0.0.1").unwrap();
        assert_eq!(out, vec!["10.0.0.1", "example.com", "10.0.0.1"]);
    }

    #[test]
    fn cidr_excludes_network_and_broadcast() {
        let out = expand_targets("192.0.2.0/30").unwrap();
        assert_eq!(out, vec!["192.0.2.1", "192.0.2.2"]);
    }

    #[test]
    fn mixed_spec_concatenates_expansions() {
        let out = expand_targets("127.0.0.1, 192.0.2.0/30").unwrap();
        assert_eq!(out, vec!["127.0.0.1", "192.0.2.1", "192.0.2.2"]);
    }

    #[test]
    fn overlapping_cidr_and_literal_keeps_duplicates() {
        let out = expand_targets("192.0.2.1,192.0.2.0/30").unwrap();
        assert_eq!(out, vec!["192.0.2.1", "192.0.2.1", "192.0.2.2"]);
    }

    #[test]
    fn bare_ip_expands_to_itself() {
        assert_eq!(expand_targets("8.8.8.8").unwrap(), vec!["8.8.8.8"]);
    }

    #[test]
    fn hostname_passes_through_opaque() {
        assert_eq!(
            expand_targets("scanme.nmap.org").unwrap(),
            vec!["scanme.nmap.org"]
        );
    }

    #[test]
    fn empty_entries_are_dropped() {
        assert!(expand_targets("").unwrap().is_empty());
        assert_eq!(expand_targets("10.0.0.1,,").unwrap(), vec!["10.0.0.1"]);
    }

    #[test]
    fn malformed_cidr_is_rejected() {
        assert!(expand_targets("192.0.2.0/99").is_err());
        assert!(expand_targets("not an ip/24").is_err());
    }
}
