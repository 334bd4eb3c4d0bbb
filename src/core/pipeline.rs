// src/core/pipeline.rs

use std::path::PathBuf;
use std::sync::Arc;

use hickory_resolver::TokioAsyncResolver;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::core::adapters::{self, ToolError, ToolRunner, ToolVerdict};
use crate::core::error::TargetError;
use crate::core::models::{HttpsPort, PortProbe, PortState, TlsInspection};
use crate::core::scanner::{recon, tls_inspector};
use crate::core::store::Store;

/// Everything a target pipeline needs, owned by the caller and shared across
/// the pool. No hidden globals; two batches with different contexts are
/// fully isolated.
#[derive(Clone)]
pub struct ScanContext {
    pub store: Arc<dyn Store>,
    pub runner: Arc<dyn ToolRunner>,
    pub resolver: Arc<TokioAsyncResolver>,
    pub http: reqwest::Client,
    pub artifacts_dir: PathBuf,
    pub safe_mode: bool,
    /// RDAP base URL for the WHOIS lookup. `None` disables the lookup.
    pub rdap_endpoint: Option<String>,
}

/// Observable outcome of one stage. `Skipped` (gate not met) is distinct
/// from `Degraded` (attempted, failed gracefully); neither is fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Skipped,
    Degraded { reason: String },
}

impl StageStatus {
    fn degraded(reason: impl Into<String>) -> Self {
        StageStatus::Degraded {
            reason: reason.into(),
        }
    }
}

/// Per-target result handed back to the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct TargetOutcome {
    pub target: String,
    pub host_id: i64,
    pub port_scan: StageStatus,
    pub recon: StageStatus,
    pub web_fingerprint: StageStatus,
    pub tls_analysis: StageStatus,
    pub vuln_scan: StageStatus,
    pub open_ports: usize,
    pub findings: usize,
}

/// Drives one target through the full stage sequence. Every stage persists
/// its partial result before the next one starts; only persistence failures
/// escape as errors, to be caught at the pool task boundary.
pub async fn run_target(
    ctx: &ScanContext,
    scan_id: &str,
    target: &str,
) -> Result<TargetOutcome, TargetError> {
    info!(target, scan_id, "Starting target pipeline.");

    // --- Stage: PortScan ---
    let (probes, port_scan_status) = port_scan_stage(ctx, target).await;

    // --- Stage: Recon ---
    let (rdns, whois_blob, recon_status) = recon_stage(ctx, target).await;

    // The host row exists from here on, whatever the port scan produced.
    let whois_json = serde_json::to_string(&whois_blob)?;
    let host = ctx
        .store
        .create_host(scan_id, target, rdns.as_deref(), Some(&whois_json))?;

    for probe in &probes {
        ctx.store.add_port(host.id, probe)?;
    }

    // --- Stage: WebFingerprint ---
    let web_ports: Vec<&PortProbe> = probes.iter().filter(|p| p.is_open_web()).collect();
    let web_status = if web_ports.is_empty() {
        info!(target, "No open web ports, skipping fingerprint stage.");
        StageStatus::Skipped
    } else {
        let mut degradations = Vec::new();
        for probe in &web_ports {
            let url = format!("{}://{}:{}", probe.url_scheme(), target, probe.port);
            let fp = adapters::whatweb::fingerprint_url(ctx.runner.as_ref(), &ctx.http, &url).await;
            let fp_json = serde_json::to_string(&fp.fingerprint)?;
            ctx.store.add_web_target(host.id, &url, Some(&fp_json))?;
            if let Some(reason) = fp.degraded {
                degradations.push(reason);
            }
        }
        if degradations.is_empty() {
            StageStatus::Completed
        } else {
            StageStatus::degraded(degradations.join("; "))
        }
    };

    // --- Stage: TlsAnalysis ---
    let https_ports: Vec<HttpsPort> = probes
        .iter()
        .filter(|p| p.is_open_https())
        .map(|p| HttpsPort {
            port: p.port,
            service: p.service.clone(),
        })
        .collect();
    let tls_status = if https_ports.is_empty() {
        info!(target, "No open HTTPS ports, skipping TLS stage.");
        StageStatus::Skipped
    } else {
        tls_stage(ctx, host.id, target, &https_ports).await?
    };

    // --- Stage: VulnScan ---
    let (finding_count, vuln_status) = vuln_scan_stage(ctx, host.id, target).await?;

    info!(
        target,
        host_id = host.id,
        ports = probes.len(),
        findings = finding_count,
        "Target pipeline done."
    );

    Ok(TargetOutcome {
        target: target.to_string(),
        host_id: host.id,
        port_scan: port_scan_status,
        recon: recon_status,
        web_fingerprint: web_status,
        tls_analysis: tls_status,
        vuln_scan: vuln_status,
        open_ports: probes.iter().filter(|p| p.state == PortState::Open).count(),
        findings: finding_count,
    })
}

/// Port scan with graceful degradation: every failure mode yields an empty
/// port set plus a distinct status, never an error.
async fn port_scan_stage(ctx: &ScanContext, target: &str) -> (Vec<PortProbe>, StageStatus) {
    match adapters::nmap::run(ctx.runner.as_ref(), target).await {
        Ok(out) if out.exit_code == 0 => {
            let probes = adapters::nmap::parse_grepable(&out.stdout);
            (probes, StageStatus::Completed)
        }
        Ok(out) => {
            warn!(target, exit_code = out.exit_code, stderr = %out.stderr.trim(), "Port scan failed, continuing with empty port set.");
            let reason = if out.stderr.contains("timed out") {
                "port scan timed out".to_string()
            } else {
                format!("port scan exited with code {}", out.exit_code)
            };
            (Vec::new(), StageStatus::degraded(reason))
        }
        Err(ToolError::NotFound(_)) => {
            warn!(target, "nmap not installed, continuing with empty port set.");
            (Vec::new(), StageStatus::degraded("port scanner not installed"))
        }
        Err(e) => {
            warn!(target, error = %e, "Port scan invocation failed, continuing with empty port set.");
            (Vec::new(), StageStatus::degraded(e.to_string()))
        }
    }
}

/// Best-effort recon. Forward DNS runs only when reverse DNS produced a
/// name; its results are folded into the WHOIS blob.
async fn recon_stage(
    ctx: &ScanContext,
    target: &str,
) -> (Option<String>, serde_json::Value, StageStatus) {
    let rdns = recon::reverse_dns(&ctx.resolver, target).await;
    let mut whois = recon::whois_ip(&ctx.http, ctx.rdap_endpoint.as_deref(), target).await;

    if let Some(name) = &rdns {
        let records = recon::dns_records(&ctx.resolver, name).await;
        if !records.is_empty() {
            if let Some(obj) = whois.as_object_mut() {
                obj.insert("dns_records".to_string(), json!(records));
            }
        }
    }

    let status = if rdns.is_none() && whois.as_object().is_some_and(|o| o.is_empty()) {
        StageStatus::degraded("no reverse DNS, no WHOIS data")
    } else {
        StageStatus::Completed
    };
    (rdns, whois, status)
}

/// TLS analysis: the configuration-dump tool and the built-in inspector run
/// as independent analyzers, merged into one record written exactly once.
async fn tls_stage(
    ctx: &ScanContext,
    host_id: i64,
    target: &str,
    https_ports: &[HttpsPort],
) -> Result<StageStatus, TargetError> {
    let dump = adapters::testssl::run(ctx.runner.as_ref(), target, &ctx.artifacts_dir).await;
    // Inspect 443 when it is among the open HTTPS ports, else the first one.
    let inspect_port = https_ports
        .iter()
        .find(|p| p.port == 443)
        .or_else(|| https_ports.first())
        .map_or(443, |p| p.port);
    let inspection = tls_inspector::inspect(target, inspect_port).await;

    let status = tls_stage_status(&dump, &inspection);
    let record = json!({
        "open_ports": https_ports,
        "testssl": dump,
        "inspection": inspection,
    });
    ctx.store
        .set_host_tls(host_id, &serde_json::to_string(&record)?)?;
    Ok(status)
}

fn tls_stage_status(
    dump: &ToolVerdict<serde_json::Value>,
    inspection: &TlsInspection,
) -> StageStatus {
    let inspector_ok = inspection.reachable && inspection.error.is_none();
    if dump.is_ok() && inspector_ok {
        return StageStatus::Completed;
    }
    let mut reasons = Vec::new();
    match dump {
        ToolVerdict::Ok { .. } => {}
        ToolVerdict::NotInstalled => reasons.push("testssl.sh not installed".to_string()),
        ToolVerdict::TimedOut { seconds } => {
            reasons.push(format!("configuration dump timed out after {}s", seconds))
        }
        ToolVerdict::Failed { detail } => {
            reasons.push(format!("configuration dump failed: {}", detail))
        }
    }
    if let Some(probe_error) = &inspection.probe_error {
        reasons.push(probe_error.clone());
    }
    if let Some(error) = &inspection.error {
        reasons.push(error.clone());
    }
    if reasons.is_empty() {
        StageStatus::Completed
    } else {
        StageStatus::degraded(reasons.join("; "))
    }
}

/// Vulnerability scan under the fixed safe-mode tag policy. Each output line
/// maps independently to one finding; only store writes can fail here.
async fn vuln_scan_stage(
    ctx: &ScanContext,
    host_id: i64,
    target: &str,
) -> Result<(usize, StageStatus), TargetError> {
    match adapters::nuclei::run(ctx.runner.as_ref(), target).await {
        Ok(out) => {
            let events = adapters::nuclei::parse_line_json(&out.stdout);
            let mut count = 0;
            for event in &events {
                let finding = adapters::nuclei::event_to_finding(event);
                ctx.store.add_finding(host_id, &finding)?;
                count += 1;
            }
            let status = if out.exit_code == 0 {
                StageStatus::Completed
            } else if out.stderr.contains("timed out") {
                StageStatus::degraded("vulnerability scan timed out")
            } else {
                StageStatus::degraded(format!(
                    "vulnerability scanner exited with code {}",
                    out.exit_code
                ))
            };
            Ok((count, status))
        }
        Err(ToolError::NotFound(_)) => {
            info!(target, "nuclei not installed, skipping vulnerability scan.");
            Ok((0, StageStatus::degraded("vulnerability scanner not installed")))
        }
        Err(e) => {
            warn!(target, error = %e, "Vulnerability scan invocation failed.");
            Ok((0, StageStatus::degraded(e.to_string())))
        }
    }
}
