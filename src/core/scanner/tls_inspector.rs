// src/core/scanner/tls_inspector.rs

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use chrono::{DateTime, Utc};
use native_tls::{Protocol, TlsConnector};
use tokio::task::spawn_blocking;
use tokio::time::timeout;
use tracing::{debug, error, info};
use x509_parser::prelude::*;

use crate::core::models::{CertificateSummary, TlsInspection};

/// Timeout for the raw connect probe. Deliberately short so unreachable
/// hosts fail fast before the heavier handshake analysis runs.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket timeout for the blocking handshake work.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const PROTOCOL_PROBES: &[(Protocol, &str)] = &[
    (Protocol::Tlsv10, "TLSv1.0"),
    (Protocol::Tlsv11, "TLSv1.1"),
    (Protocol::Tlsv12, "TLSv1.2"),
];

/// Runs the protocol/certificate inspector against one HTTPS port of a host.
///
/// A short raw TCP connect probe runs first; if it fails, the inspection
/// short-circuits with the specific unreachability reason and the heavier
/// handshake analysis never starts. Probe failures are recorded in
/// `probe_error`, distinct from analysis failures in `error`.
pub async fn inspect(host: &str, port: u16) -> TlsInspection {
    info!(host, port, "Starting TLS inspection.");

    match timeout(PROBE_TIMEOUT, tokio::net::TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => debug!(host, port, "Connect probe succeeded."),
        Ok(Err(e)) => {
            info!(host, port, error = %e, "Port not accessible, skipping TLS inspection.");
            return TlsInspection {
                reachable: false,
                probe_error: Some(format!("port {} not accessible: {}", port, e)),
                ..Default::default()
            };
        }
        Err(_) => {
            info!(host, port, "Connect probe timed out, skipping TLS inspection.");
            return TlsInspection {
                reachable: false,
                probe_error: Some("connection probe timed out".to_string()),
                ..Default::default()
            };
        }
    }

    let host_owned = host.to_string();
    debug!(host, port, "Spawning blocking task for TLS handshakes.");
    spawn_blocking(move || inspect_blocking(&host_owned, port))
        .await
        .unwrap_or_else(|e| {
            error!(panic = %e, "Blocking TLS inspection task panicked.");
            TlsInspection {
                reachable: true,
                error: Some(format!("inspection task panicked: {}", e)),
                ..Default::default()
            }
        })
}

fn inspect_blocking(host: &str, port: u16) -> TlsInspection {
    let mut inspection = TlsInspection {
        reachable: true,
        ..Default::default()
    };

    match fetch_certificate(host, port) {
        Ok(cert) => inspection.certificate = cert,
        Err(e) => inspection.error = Some(e),
    }
    inspection.supported_protocols = probe_protocols(host, port);
    inspection
}

/// Performs one handshake and extracts the peer certificate. Invalid
/// certificates are accepted here; validity is judged from the parsed
/// validity window instead of failing the handshake.
fn fetch_certificate(host: &str, port: u16) -> Result<Option<CertificateSummary>, String> {
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| format!("TlsConnector error: {}", e))?;

    let stream = connect_tcp(host, port)?;
    let stream = connector
        .connect(host, stream)
        .map_err(|e| format!("TLS handshake error: {}", e))?;

    let cert = match stream.peer_certificate() {
        Ok(Some(c)) => c,
        Ok(None) => {
            debug!(host, "TLS connection succeeded but no peer certificate provided.");
            return Ok(None);
        }
        Err(e) => return Err(format!("could not get peer certificate: {}", e)),
    };

    let cert_der = cert
        .to_der()
        .map_err(|e| format!("could not convert certificate to DER: {}", e))?;
    let (_, x509) = parse_x509_certificate(&cert_der)
        .map_err(|e| format!("X.509 parse error: {}", e))?;

    let validity = x509.validity();
    let not_before = asn1_time_to_chrono_utc(&validity.not_before);
    let not_after = asn1_time_to_chrono_utc(&validity.not_after);
    let now = Utc::now();

    info!(host, subject = %x509.subject(), "Parsed peer certificate.");
    Ok(Some(CertificateSummary {
        subject_name: x509.subject().to_string(),
        issuer_name: x509.issuer().to_string(),
        not_before,
        not_after,
        days_until_expiry: not_after.signed_duration_since(now).num_days(),
        is_valid: now > not_before && now < not_after,
    }))
}

/// Probes which TLS protocol versions the server accepts by attempting one
/// pinned handshake per version. A failed handshake just means the version
/// is not offered.
fn probe_protocols(host: &str, port: u16) -> Vec<String> {
    let mut supported = Vec::new();
    for (protocol, label) in PROTOCOL_PROBES {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .min_protocol_version(Some(*protocol))
            .max_protocol_version(Some(*protocol))
            .build();
        let Ok(connector) = connector else { continue };
        let Ok(stream) = connect_tcp(host, port) else { continue };
        if connector.connect(host, stream).is_ok() {
            debug!(host, label, "Protocol version accepted.");
            supported.push(label.to_string());
        }
    }
    supported
}

fn connect_tcp(host: &str, port: u16) -> Result<TcpStream, String> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("address resolution error: {}", e))?
        .next()
        .ok_or_else(|| format!("no address for {}", host))?;
    let stream = TcpStream::connect_timeout(&addr, HANDSHAKE_TIMEOUT)
        .map_err(|e| format!("TCP connection error: {}", e))?;
    stream
        .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
        .and_then(|_| stream.set_write_timeout(Some(HANDSHAKE_TIMEOUT)))
        .map_err(|e| format!("socket configuration error: {}", e))?;
    Ok(stream)
}

fn asn1_time_to_chrono_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}
