// src/core/adapters/nmap.rs

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, info};

use crate::core::adapters::{ToolError, ToolOutput, ToolRunner};
use crate::core::models::{PortProbe, PortState};

/// Hard timeout for one port-scan invocation.
pub const PORT_SCAN_TIMEOUT: Duration = Duration::from_secs(60);

/// Scan profile chosen by address class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanProfile {
    /// Low-latency profile for loopback and private lab networks.
    Aggressive,
    /// Conservative profile with service detection for everything else.
    Conservative,
}

/// Picks the profile for a target. Private and loopback addresses get the
/// aggressive profile; public addresses and unresolved hostnames get the
/// conservative one.
pub fn profile_for(target: &str) -> ScanProfile {
    match IpAddr::from_str(target) {
        Ok(IpAddr::V4(v4)) if v4.is_loopback() || v4.is_private() => ScanProfile::Aggressive,
        Ok(IpAddr::V6(v6)) if v6.is_loopback() => ScanProfile::Aggressive,
        _ => ScanProfile::Conservative,
    }
}

/// Builds the nmap argument list for a target, requesting grepable output on
/// stdout so no artifact file is needed.
pub fn command_args(target: &str, profile: ScanProfile) -> Vec<String> {
    let base: &[&str] = match profile {
        ScanProfile::Aggressive => &[
            "-sS", "-T4", "-Pn", "--max-retries", "1", "--host-timeout", "30s",
        ],
        ScanProfile::Conservative => &[
            "-sV", "-T3", "-Pn", "--max-retries", "2", "--host-timeout", "60s",
        ],
    };
    let mut args: Vec<String> = base.iter().map(|s| s.to_string()).collect();
    args.extend(["-oG".to_string(), "-".to_string(), target.to_string()]);
    args
}

/// Invokes the port scanner against one target. A timeout comes back as a
/// nonzero exit with explanatory stderr; a missing binary stays a distinct
/// error for the pipeline to mark.
pub async fn run(runner: &dyn ToolRunner, target: &str) -> Result<ToolOutput, ToolError> {
    let profile = profile_for(target);
    info!(target, ?profile, "Starting port scan.");
    let args = command_args(target, profile);
    runner.invoke_lenient("nmap", &args, PORT_SCAN_TIMEOUT).await
}

/// Parses nmap grepable (`-oG`) output into typed port probes. Malformed
/// lines and entries are skipped, never fatal; a scan that produced nothing
/// useful simply yields an empty set.
pub fn parse_grepable(output: &str) -> Vec<PortProbe> {
    let mut probes = Vec::new();
    for line in output.lines() {
        if !line.starts_with("Host:") {
            continue;
        }
        let Some(ports_field) = line
            .split('\t')
            .find_map(|field| field.trim().strip_prefix("Ports: "))
        else {
            continue;
        };
        for entry in ports_field.split(", ") {
            match parse_port_entry(entry.trim()) {
                Some(probe) => probes.push(probe),
                None => debug!(entry, "Skipping malformed port entry."),
            }
        }
    }
    probes
}

/// One grepable port entry:
/// `port/state/protocol/owner/service/rpcinfo/version info/`.
fn parse_port_entry(entry: &str) -> Option<PortProbe> {
    let fields: Vec<&str> = entry.split('/').collect();
    if fields.len() < 3 {
        return None;
    }
    let port: u16 = fields[0].trim().parse().ok()?;
    let state = PortState::normalize(fields[1]);
    let proto = fields[2].trim().to_string();
    let service = fields
        .get(4)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let (product, version) = split_version_info(fields.get(6).map(|s| s.trim()).unwrap_or(""));
    Some(PortProbe {
        port,
        proto,
        state,
        service,
        product,
        version,
    })
}

/// Splits nmap's free-form version info into product and version. The last
/// whitespace-separated token is treated as the version when it leads with a
/// digit (e.g. "nginx 1.18.0"); otherwise the whole string is the product.
fn split_version_info(info: &str) -> (Option<String>, Option<String>) {
    if info.is_empty() {
        return (None, None);
    }
    if let Some((product, last)) = info.rsplit_once(' ') {
        if last.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            return (Some(product.to_string()), Some(last.to_string()));
        }
    }
    (Some(info.to_string()), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_and_private_addresses_use_aggressive_profile() {
        assert_eq!(profile_for("127.0.0.1"), ScanProfile::Aggressive);
        assert_eq!(profile_for("192.168.1.10"), ScanProfile::Aggressive);
        assert_eq!(profile_for("10.0.0.5"), ScanProfile::Aggressive);
    }

    #[test]
    fn public_addresses_and_hostnames_use_conservative_profile() {
        assert_eq!(profile_for("8.8.8.8"), ScanProfile::Conservative);
        assert_eq!(profile_for("scanme.nmap.org"), ScanProfile::Conservative);
    }

    #[test]
    fn grepable_output_parses_states_services_and_versions() {
        let output = "# Nmap 7.94 scan initiated\n\
            Host: 127.0.0.1 (localhost)\tStatus: Up\n\
            Host: 127.0.0.1 (localhost)\tPorts: 22/open/tcp//ssh//OpenSSH 8.9p1/, \
            80/open/tcp//http//nginx 1.18.0/, 443/filtered/tcp//https///\t\
            Ignored State: closed (997)\n";

        let probes = parse_grepable(output);
        assert_eq!(probes.len(), 3);

        assert_eq!(probes[0].port, 22);
        assert_eq!(probes[0].state, PortState::Open);
        assert_eq!(probes[0].service.as_deref(), Some("ssh"));
        assert_eq!(probes[0].product.as_deref(), Some("OpenSSH"));
        assert_eq!(probes[0].version.as_deref(), Some("8.9p1"));

        assert_eq!(probes[1].service.as_deref(), Some("http"));
        assert_eq!(probes[1].product.as_deref(), Some("nginx"));
        assert_eq!(probes[1].version.as_deref(), Some("1.18.0"));

        assert_eq!(probes[2].state, PortState::Filtered);
        assert_eq!(probes[2].product, None);
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let output = "Host: 10.0.0.1 ()\tPorts: garbage, 8080/open/tcp//http///\n";
        let probes = parse_grepable(output);
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].port, 8080);
    }

    #[test]
    fn empty_output_yields_empty_port_set() {
        assert!(parse_grepable("").is_empty());
        assert!(parse_grepable("Host: 10.0.0.1 ()\tStatus: Down\n").is_empty());
    }
}
