// src/core/adapters/testssl.rs

use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::core::adapters::{ToolError, ToolRunner, ToolVerdict};

/// Hard timeout for one configuration-dump invocation.
pub const TESTSSL_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs the TLS configuration-dump tool against a host, collecting its JSON
/// report from a file under the artifacts directory. Every failure mode
/// degrades to a distinct marker; this stage is never fatal to a target.
pub async fn run(runner: &dyn ToolRunner, host: &str, outdir: &Path) -> ToolVerdict<Value> {
    let out_path = outdir.join(format!("testssl_{}.json", host));
    let out_str = out_path.to_string_lossy().into_owned();
    info!(host, out = %out_str, "Starting TLS configuration dump.");

    let args: Vec<String> = ["--jsonfile", out_str.as_str(), "--quiet", host]
        .iter()
        .map(|s| s.to_string())
        .collect();

    match runner.invoke("testssl.sh", &args, TESTSSL_TIMEOUT).await {
        Ok(_) => match std::fs::read_to_string(&out_path) {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(data) => ToolVerdict::Ok { data },
                Err(e) => {
                    warn!(host, error = %e, "Configuration dump produced unparseable JSON.");
                    ToolVerdict::Failed {
                        detail: format!("unparseable report: {}", e),
                    }
                }
            },
            Err(_) => {
                warn!(host, "Configuration dump produced no report file.");
                ToolVerdict::Failed {
                    detail: "no report file produced".to_string(),
                }
            }
        },
        Err(ToolError::NotFound(_)) => {
            info!(host, "testssl.sh not installed, skipping configuration dump.");
            ToolVerdict::NotInstalled
        }
        Err(ToolError::TimedOut(seconds)) => {
            warn!(host, seconds, "Configuration dump timed out.");
            ToolVerdict::TimedOut { seconds }
        }
        Err(ToolError::Spawn { detail, .. }) => ToolVerdict::Failed { detail },
    }
}
