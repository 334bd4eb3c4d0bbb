// src/core/adapters/whatweb.rs

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::adapters::{ToolError, ToolRunner};
use crate::core::models::Fingerprint;

/// Hard timeout for one whatweb invocation.
pub const WHATWEB_TIMEOUT: Duration = Duration::from_secs(20);

// Signature regexes for the fallback fingerprinter. Each either detects a
// technology marker or captures its version.
static RE_NGINX: Lazy<Regex> = Lazy::new(|| Regex::new(r"nginx/([\d\.]+)").unwrap());
static RE_APACHE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Apache/([\d\.]+)").unwrap());
static RE_CLOUDFLARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)cloudflare").unwrap());
static RE_WORDPRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"WordPress ?([\d\.]*)").unwrap());
static RE_WP_PATHS: Lazy<Regex> = Lazy::new(|| Regex::new(r"/wp-content/|/wp-includes/").unwrap());
static RE_PHP: Lazy<Regex> = Lazy::new(|| Regex::new(r"PHP/([\d\.]+)").unwrap());
static RE_ASPNET: Lazy<Regex> = Lazy::new(|| Regex::new(r"ASP\.NET").unwrap());

/// One fingerprinted URL: the fingerprint itself plus the degradation
/// reason when the tool misbehaved. `degraded` is `None` for a clean run
/// and for the built-in fallback, whose own failure markers live in the
/// fingerprint.
#[derive(Debug, Clone)]
pub struct UrlFingerprint {
    pub fingerprint: Fingerprint,
    pub degraded: Option<String>,
}

impl UrlFingerprint {
    fn clean(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            degraded: None,
        }
    }

    fn degraded(marker: &str, reason: String) -> Self {
        Self {
            fingerprint: Fingerprint {
                plugins: vec![marker.to_string()],
            },
            degraded: Some(reason),
        }
    }
}

/// Fingerprints one URL. The external fingerprinting tool is tried first;
/// when its binary is missing, a built-in HTTP fallback runs instead. Never
/// fatal; a timeout, nonzero exit or unparseable output each yield a
/// distinct marker plugin and a degradation reason so "tool failed" never
/// looks like "tool ran and found nothing".
pub async fn fingerprint_url(
    runner: &dyn ToolRunner,
    http: &reqwest::Client,
    url: &str,
) -> UrlFingerprint {
    info!(url, "Starting web fingerprint.");
    let args: Vec<String> = ["-a", "1", "-q", url, "--log-json=-"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    match runner.invoke("whatweb", &args, WHATWEB_TIMEOUT).await {
        Ok(out) if out.exit_code == 0 => match parse_whatweb_json(&out.stdout) {
            Some(fp) => UrlFingerprint::clean(fp),
            None => {
                warn!(url, "Fingerprinting tool produced unparseable output.");
                UrlFingerprint::degraded(
                    "unparseable_output",
                    format!("fingerprint of {} produced unparseable output", url),
                )
            }
        },
        Ok(out) => {
            warn!(url, exit_code = out.exit_code, "Fingerprinting tool failed.");
            UrlFingerprint::degraded(
                "fingerprint_failed",
                format!("fingerprint of {} exited with code {}", url, out.exit_code),
            )
        }
        Err(ToolError::NotFound(_)) => {
            info!(url, "whatweb not installed, using basic HTTP fingerprinting.");
            UrlFingerprint::clean(basic_http_fingerprint(http, url).await)
        }
        Err(ToolError::TimedOut(seconds)) => {
            warn!(url, seconds, "Fingerprinting tool timed out.");
            UrlFingerprint::degraded(
                "fingerprint_timed_out",
                format!("fingerprint of {} timed out after {}s", url, seconds),
            )
        }
        Err(e) => {
            warn!(url, error = %e, "Fingerprinting invocation failed.");
            UrlFingerprint::degraded("fingerprint_failed", format!("fingerprint of {}: {}", url, e))
        }
    }
}

/// Extracts plugin names from whatweb's JSON log format (an array whose first
/// element carries a `plugins` object).
pub fn parse_whatweb_json(stdout: &str) -> Option<Fingerprint> {
    let value: Value = serde_json::from_str(stdout.trim()).ok()?;
    let first = value.as_array()?.first()?;
    let plugins = first
        .get("plugins")?
        .as_object()?
        .keys()
        .cloned()
        .collect();
    Some(Fingerprint { plugins })
}

/// Built-in fallback: one short HTTP request, with header, body and meta-tag
/// signature checks. Connection failures degrade to distinct marker plugins
/// so "port filtered" never looks like "service slow".
pub async fn basic_http_fingerprint(http: &reqwest::Client, url: &str) -> Fingerprint {
    let response = match http.get(url).send().await {
        Ok(res) => res,
        Err(e) => {
            let marker = if e.is_connect() {
                if e.is_timeout() {
                    "connection_timeout"
                } else {
                    "connection_refused"
                }
            } else if e.is_timeout() {
                "read_timeout"
            } else {
                "unknown_web_server"
            };
            debug!(url, error = %e, marker, "Fallback HTTP request failed.");
            return Fingerprint {
                plugins: vec![marker.to_string()],
            };
        }
    };

    let mut plugins = Vec::new();
    if response.status().is_success() {
        plugins.push("http_server".to_string());
    }

    let server = response
        .headers()
        .get("server")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let powered_by = response
        .headers()
        .get("x-powered-by")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let Some(server) = &server {
        plugins.push(format!(
            "server_{}",
            server.to_lowercase().replace(' ', "_")
        ));
    }
    if let Some(ct) = &content_type {
        if ct.contains("text/html") {
            plugins.push("html_content".to_string());
        }
        if ct.contains("text/plain") {
            plugins.push("plain_text".to_string());
        }
    }

    let body = response.text().await.unwrap_or_default();
    apply_signatures(
        &mut plugins,
        server.as_deref(),
        powered_by.as_deref(),
        &body,
    );

    debug!(url, count = plugins.len(), "Fallback fingerprint finished.");
    Fingerprint { plugins }
}

/// Applies the static signature table to the response pieces, appending one
/// marker per matched technology (with a version suffix when captured).
fn apply_signatures(
    plugins: &mut Vec<String>,
    server: Option<&str>,
    powered_by: Option<&str>,
    body: &str,
) {
    let mut push = |name: &str, version: Option<String>| {
        let marker = match version.filter(|v| !v.is_empty()) {
            Some(v) => format!("{}_{}", name, v),
            None => name.to_string(),
        };
        if !plugins.contains(&marker) {
            plugins.push(marker);
        }
    };

    if let Some(server) = server {
        if let Some(caps) = RE_NGINX.captures(server) {
            push("nginx", caps.get(1).map(|m| m.as_str().to_string()));
        }
        if let Some(caps) = RE_APACHE.captures(server) {
            push("apache", caps.get(1).map(|m| m.as_str().to_string()));
        }
        if RE_CLOUDFLARE.is_match(server) {
            push("cloudflare", None);
        }
    }
    if let Some(powered_by) = powered_by {
        if let Some(caps) = RE_PHP.captures(powered_by) {
            push("php", caps.get(1).map(|m| m.as_str().to_string()));
        }
        if RE_ASPNET.is_match(powered_by) {
            push("aspnet", None);
        }
    }
    if RE_WP_PATHS.is_match(body) {
        push("wordpress", None);
    }
    if let Some(generator) = meta_generator(body) {
        if let Some(caps) = RE_WORDPRESS.captures(&generator) {
            push("wordpress", caps.get(1).map(|m| m.as_str().to_string()));
        }
    }
}

/// Pulls the content of the `generator` meta tag out of an HTML body.
fn meta_generator(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("meta[name='generator']").ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::adapters::ToolOutput;
    use async_trait::async_trait;

    struct FixedRunner(Result<ToolOutput, ToolError>);

    #[async_trait]
    impl ToolRunner for FixedRunner {
        async fn invoke(
            &self,
            _program: &str,
            _args: &[String],
            _timeout: Duration,
        ) -> Result<ToolOutput, ToolError> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn tool_timeout_yields_distinct_marker_and_reason() {
        let runner = FixedRunner(Err(ToolError::TimedOut(20)));
        let http = reqwest::Client::new();
        let fp = fingerprint_url(&runner, &http, "http://10.0.0.1:80").await;
        assert_eq!(fp.fingerprint.plugins, vec!["fingerprint_timed_out"]);
        assert!(fp.degraded.as_deref().unwrap().contains("timed out after 20s"));
    }

    #[tokio::test]
    async fn nonzero_exit_and_unparseable_output_stay_distinct() {
        let http = reqwest::Client::new();

        let failed = FixedRunner(Ok(ToolOutput {
            exit_code: 2,
            stdout: String::new(),
            stderr: "boom".to_string(),
        }));
        let fp = fingerprint_url(&failed, &http, "http://10.0.0.1:80").await;
        assert_eq!(fp.fingerprint.plugins, vec!["fingerprint_failed"]);
        assert!(fp.degraded.as_deref().unwrap().contains("exited with code 2"));

        let garbled = FixedRunner(Ok(ToolOutput {
            exit_code: 0,
            stdout: "not json".to_string(),
            stderr: String::new(),
        }));
        let fp = fingerprint_url(&garbled, &http, "http://10.0.0.1:80").await;
        assert_eq!(fp.fingerprint.plugins, vec!["unparseable_output"]);
        assert!(fp.degraded.is_some());
    }

    #[test]
    fn whatweb_json_yields_plugin_names() {
        let stdout = r#"[{"target":"http://10.0.0.1:80","plugins":{"Apache":{},"HTTPServer":{},"Title":{}}}]"#;
        let fp = parse_whatweb_json(stdout).unwrap();
        assert_eq!(fp.plugins.len(), 3);
        assert!(fp.plugins.contains(&"Apache".to_string()));
    }

    #[test]
    fn unparseable_whatweb_output_is_none() {
        assert!(parse_whatweb_json("whatweb: command error").is_none());
        assert!(parse_whatweb_json("[]").is_none());
    }

    #[test]
    fn signatures_capture_server_versions_and_meta_generator() {
        let mut plugins = Vec::new();
        let body = r#"<html><head><meta name="generator" content="WordPress 6.4"></head>
            <body><script src="/wp-content/t.js"></script></body></html>"#;
        apply_signatures(&mut plugins, Some("nginx/1.18.0"), Some("PHP/8.1.2"), body);
        assert!(plugins.contains(&"nginx_1.18.0".to_string()));
        assert!(plugins.contains(&"php_8.1.2".to_string()));
        assert!(plugins.contains(&"wordpress".to_string()));
        assert!(plugins.contains(&"wordpress_6.4".to_string()));
    }
}
