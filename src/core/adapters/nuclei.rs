// src/core/adapters/nuclei.rs

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::core::adapters::{ToolError, ToolOutput, ToolRunner};
use crate::core::models::{NewFinding, Severity};

/// Template categories allowed in safe mode. Together with `EXCLUDE_TAGS`
/// this fixed split *is* the safe-mode contract; callers cannot tune it.
pub const SAFE_TAGS: &str = "exposure,cve,misconfiguration,weak-password,default-cred";

/// Intrusive template categories always denied.
pub const EXCLUDE_TAGS: &str = "takeover,bruteforce,osint,exploit";

/// Per-template timeout passed to the scanner itself.
const TEMPLATE_TIMEOUT_SECS: u64 = 10;

/// Hard timeout for the whole invocation.
pub const VULN_SCAN_TIMEOUT: Duration = Duration::from_secs(30);

/// One line of the scanner's line-delimited JSON output, reduced to the
/// fields the finding mapping reasons about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NucleiEvent {
    #[serde(rename = "template-id")]
    pub template_id: Option<String>,
    #[serde(default)]
    pub info: NucleiInfo,
    #[serde(rename = "matched-at")]
    pub matched_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NucleiInfo {
    pub name: Option<String>,
    pub severity: Option<String>,
    #[serde(default)]
    pub classification: Option<NucleiClassification>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NucleiClassification {
    #[serde(rename = "cvss-score")]
    pub cvss_score: Option<Value>,
}

/// Invokes the vulnerability-template scanner against one target under the
/// fixed safe-mode tag policy, emitting line-delimited JSON on stdout.
pub async fn run(runner: &dyn ToolRunner, target: &str) -> Result<ToolOutput, ToolError> {
    info!(target, allow = SAFE_TAGS, deny = EXCLUDE_TAGS, "Starting vulnerability scan.");
    let timeout_arg = TEMPLATE_TIMEOUT_SECS.to_string();
    let args: Vec<String> = [
        "-u",
        target,
        "-as",
        "-tags",
        SAFE_TAGS,
        "-etags",
        EXCLUDE_TAGS,
        "-j",
        "-silent",
        "-timeout",
        timeout_arg.as_str(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    runner.invoke_lenient("nuclei", &args, VULN_SCAN_TIMEOUT).await
}

/// Parses line-delimited JSON output. Each line maps independently to one
/// event; malformed lines are skipped, never fatal.
pub fn parse_line_json(output: &str) -> Vec<NucleiEvent> {
    let mut events = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<NucleiEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => debug!(error = %e, "Skipping malformed scanner output line."),
        }
    }
    events
}

/// Maps one scanner event to the finding fields we persist. Severity is
/// normalized into the closed set; the CVSS score is accepted as either a
/// JSON number or a numeric string.
pub fn event_to_finding(event: &NucleiEvent) -> NewFinding {
    let name = event
        .info
        .name
        .clone()
        .or_else(|| event.template_id.clone())
        .unwrap_or_else(|| "unnamed".to_string());

    let severity = Severity::normalize(event.info.severity.as_deref().unwrap_or("info"));

    let cvss = event
        .info
        .classification
        .as_ref()
        .and_then(|c| c.cvss_score.as_ref())
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        });

    NewFinding {
        source: "nuclei".to_string(),
        name,
        severity,
        cvss,
        evidence: event.matched_at.clone(),
        remediation: Some("Review vendor guidance / patch / disable exposure.".to_string()),
    }
}
