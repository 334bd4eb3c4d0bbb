// src/core/importers/nessus.rs

use quick_xml::de::from_str;

use crate::core::importers::{truncate_text, ImportError, ParsedFinding};
use crate::core::models::Severity;

// --- Report Shapes ---
// Mirrors the .nessus v2 layout: attributes carry the plugin metadata,
// description/solution come as child elements.

#[derive(Debug, serde::Deserialize)]
struct NessusClientData {
    #[serde(rename = "Report")]
    report: Option<Report>,
}

#[derive(Debug, serde::Deserialize)]
struct Report {
    #[serde(rename = "ReportHost", default)]
    hosts: Vec<ReportHost>,
}

#[derive(Debug, serde::Deserialize)]
struct ReportHost {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "ReportItem", default)]
    items: Vec<ReportItem>,
}

#[derive(Debug, serde::Deserialize)]
struct ReportItem {
    #[serde(rename = "@pluginName")]
    plugin_name: String,
    #[serde(rename = "@severity", default)]
    severity: Option<String>,
    #[serde(rename = "@cvssBaseScore", default)]
    cvss_base_score: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    solution: Option<String>,
}

/// Maps the Nessus 0-4 severity digit to the normalized set. Anything else
/// buckets to `Info`.
fn severity_from_digit(digit: Option<&str>) -> Severity {
    match digit.unwrap_or("0") {
        "1" => Severity::Low,
        "2" => Severity::Medium,
        "3" => Severity::High,
        "4" => Severity::Critical,
        _ => Severity::Info,
    }
}

/// Parses a .nessus XML report into normalized findings, keyed by the
/// `ReportHost` name. A missing or malformed cvssBaseScore becomes 0.0.
pub fn parse_nessus(xml: &str) -> Result<Vec<ParsedFinding>, ImportError> {
    let data: NessusClientData =
        from_str(xml).map_err(|e| ImportError::Parse(e.to_string()))?;

    let mut out = Vec::new();
    let Some(report) = data.report else {
        return Ok(out);
    };
    for host in report.hosts {
        for item in host.items {
            let cvss = item
                .cvss_base_score
                .as_deref()
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.0);
            out.push(ParsedFinding {
                host: Some(host.name.clone()),
                name: item.plugin_name,
                severity: severity_from_digit(item.severity.as_deref()),
                cvss: Some(cvss),
                evidence: truncate_text(item.description.as_deref()),
                remediation: truncate_text(item.solution.as_deref()),
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<NessusClientData_v2>
  <Report name="demo">
    <ReportHost name="10.0.0.5">
      <ReportItem pluginName="SSL Certificate Expiry" severity="3" cvssBaseScore="7.5">
        <description>The remote certificate has expired.</description>
        <solution>Renew the certificate.</solution>
      </ReportItem>
      <ReportItem pluginName="Service Detection" severity="0">
        <description>A service was identified.</description>
      </ReportItem>
      <ReportItem pluginName="Broken Score" severity="9" cvssBaseScore="not-a-number"/>
    </ReportHost>
  </Report>
</NessusClientData_v2>"#;

    #[test]
    fn parses_hosts_items_and_severity_digits() {
        let items = parse_nessus(SAMPLE).unwrap();
        assert_eq!(items.len(), 3);

        assert_eq!(items[0].host.as_deref(), Some("10.0.0.5"));
        assert_eq!(items[0].name, "SSL Certificate Expiry");
        assert_eq!(items[0].severity, Severity::High);
        assert_eq!(items[0].cvss, Some(7.5));
        assert_eq!(
            items[0].evidence.as_deref(),
            Some("The remote certificate has expired.")
        );
        assert_eq!(items[0].remediation.as_deref(), Some("Renew the certificate."));

        assert_eq!(items[1].severity, Severity::Info);
        assert_eq!(items[1].cvss, Some(0.0));
        assert_eq!(items[1].remediation, None);
    }

    #[test]
    fn unknown_digit_and_bad_score_fall_back() {
        let items = parse_nessus(SAMPLE).unwrap();
        assert_eq!(items[2].severity, Severity::Info);
        assert_eq!(items[2].cvss, Some(0.0));
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let err = parse_nessus("<NessusClientData_v2><Report>").unwrap_err();
        assert!(matches!(err, ImportError::Parse(_)));
    }

    #[test]
    fn long_description_is_truncated() {
        let long = "x".repeat(600);
        let xml = format!(
            r#"<NessusClientData_v2><Report><ReportHost name="h">
               <ReportItem pluginName="p" severity="1"><description>{long}</description></ReportItem>
               </ReportHost></Report></NessusClientData_v2>"#
        );
        let items = parse_nessus(&xml).unwrap();
        assert_eq!(items[0].evidence.as_ref().map(|s| s.len()), Some(400));
    }
}
