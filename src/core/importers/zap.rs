// src/core/importers/zap.rs

use crate::core::importers::{truncate_text, ImportError, ParsedFinding};
use crate::core::models::Severity;

// --- Report Shapes ---
// ZAP's traditional JSON report: sites at the top, alerts per site. The risk
// level lives in "riskdesc" as "High (Medium)" style text.

#[derive(Debug, serde::Deserialize)]
struct ZapReport {
    #[serde(default)]
    site: Vec<ZapSite>,
}

#[derive(Debug, serde::Deserialize)]
struct ZapSite {
    #[serde(default)]
    alerts: Vec<ZapAlert>,
}

#[derive(Debug, serde::Deserialize)]
struct ZapAlert {
    name: String,
    #[serde(default)]
    riskdesc: Option<String>,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    solution: Option<String>,
}

/// Maps the first word of a riskdesc value. ZAP emits Informational, Low,
/// Medium and High; everything else buckets to `Info`.
fn severity_from_riskdesc(riskdesc: Option<&str>) -> Severity {
    let word = riskdesc
        .unwrap_or("Info")
        .split_whitespace()
        .next()
        .unwrap_or("Info")
        .to_ascii_lowercase();
    match word.as_str() {
        "low" => Severity::Low,
        "medium" => Severity::Medium,
        "high" => Severity::High,
        _ => Severity::Info,
    }
}

/// Parses a ZAP traditional JSON report into normalized findings. ZAP reports
/// carry no address usable as a scan host key, so `host` is left empty and
/// the caller supplies the target host.
pub fn parse_zap(json: &str) -> Result<Vec<ParsedFinding>, ImportError> {
    let report: ZapReport =
        serde_json::from_str(json).map_err(|e| ImportError::Parse(e.to_string()))?;

    let mut out = Vec::new();
    for site in report.site {
        for alert in site.alerts {
            out.push(ParsedFinding {
                host: None,
                name: alert.name,
                severity: severity_from_riskdesc(alert.riskdesc.as_deref()),
                cvss: None,
                evidence: truncate_text(alert.desc.as_deref()),
                remediation: truncate_text(alert.solution.as_deref()),
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
      "site": [
        {
          "@name": "https://example.test",
          "alerts": [
            {
              "name": "X-Content-Type-Options Header Missing",
              "riskdesc": "Low (Medium)",
              "desc": "The header was not set.",
              "solution": "Set the header."
            },
            {
              "name": "SQL Injection",
              "riskdesc": "High (High)",
              "desc": "Injection point found."
            },
            {
              "name": "Odd Risk",
              "riskdesc": "Critical (High)"
            }
          ]
        }
      ]
    }"#;

    #[test]
    fn maps_riskdesc_first_word_to_severity() {
        let items = parse_zap(SAMPLE).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].severity, Severity::Low);
        assert_eq!(items[0].evidence.as_deref(), Some("The header was not set."));
        assert_eq!(items[1].severity, Severity::High);
        assert_eq!(items[1].remediation, None);
    }

    #[test]
    fn unrecognized_risk_words_bucket_to_info() {
        let items = parse_zap(SAMPLE).unwrap();
        assert_eq!(items[2].severity, Severity::Info);
        assert_eq!(severity_from_riskdesc(None), Severity::Info);
        assert_eq!(severity_from_riskdesc(Some("Informational (Low)")), Severity::Info);
    }

    #[test]
    fn report_without_sites_yields_no_findings() {
        assert!(parse_zap("{}").unwrap().is_empty());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = parse_zap("{\"site\": [").unwrap_err();
        assert!(matches!(err, ImportError::Parse(_)));
    }
}
