// src/core/adapters/mod.rs

// Uniform wrappers around the external tools the pipeline drives. Every tool
// is an opaque black box behind the `ToolRunner` contract; the adapter
// modules own command construction and lenient output parsing.

pub mod nmap;
pub mod nuclei;
pub mod testssl;
pub mod whatweb;

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured output of one external tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Invocation failures that never become unhandled errors inside a pipeline;
/// each maps to a distinct degradation marker.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("tool binary not found: {0}")]
    NotFound(String),
    #[error("command timed out after {0} seconds")]
    TimedOut(u64),
    #[error("failed to spawn {tool}: {detail}")]
    Spawn { tool: String, detail: String },
}

/// Contract every external tool is invoked through:
/// `invoke(args, timeout) -> (exit code, stdout, stderr)`.
///
/// Implementations must block (asynchronously) until process exit or timeout
/// and must never propagate a tool's own failure as anything other than a
/// `ToolError` or a nonzero exit code.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn invoke(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError>;

    /// Like `invoke`, but folds a timeout into a distinguished nonzero exit
    /// with explanatory stderr text, so callers that only care about "did it
    /// produce output" handle one shape.
    async fn invoke_lenient(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        match self.invoke(program, args, timeout).await {
            Err(ToolError::TimedOut(secs)) => Ok(ToolOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("Command timed out after {} seconds", secs),
            }),
            other => other,
        }
    }
}

/// Production runner backed by `tokio::process`. The child is killed when the
/// timeout elapses.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

#[async_trait]
impl ToolRunner for SystemRunner {
    async fn invoke(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        debug!(program, ?args, timeout_secs = timeout.as_secs(), "Invoking external tool.");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(program, "Tool binary not found.");
                return Err(ToolError::NotFound(program.to_string()));
            }
            Err(e) => {
                return Err(ToolError::Spawn {
                    tool: program.to_string(),
                    detail: e.to_string(),
                });
            }
        };

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                return Err(ToolError::Spawn {
                    tool: program.to_string(),
                    detail: e.to_string(),
                });
            }
            Err(_) => {
                warn!(program, timeout_secs = timeout.as_secs(), "Tool timed out, killing process.");
                return Err(ToolError::TimedOut(timeout.as_secs()));
            }
        };

        Ok(ToolOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Structured outcome attached to the opaque blobs we persist: a successful
/// parse carries the tool's data, every failure mode keeps its own marker so
/// "tool binary missing" never looks like "timed out" or "analysis failed".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolVerdict<T> {
    Ok { data: T },
    NotInstalled,
    TimedOut { seconds: u64 },
    Failed { detail: String },
}

impl<T> ToolVerdict<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, ToolVerdict::Ok { .. })
    }

    pub fn from_error(err: ToolError) -> Self {
        match err {
            ToolError::NotFound(_) => ToolVerdict::NotInstalled,
            ToolError::TimedOut(seconds) => ToolVerdict::TimedOut { seconds },
            ToolError::Spawn { detail, .. } => ToolVerdict::Failed { detail },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_a_distinct_error() {
        let runner = SystemRunner;
        let err = runner
            .invoke("definitely-not-a-real-tool-9321", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn lenient_invoke_folds_timeout_into_nonzero_exit() {
        struct SleepyRunner;

        #[async_trait]
        impl ToolRunner for SleepyRunner {
            async fn invoke(
                &self,
                _program: &str,
                _args: &[String],
                timeout: Duration,
            ) -> Result<ToolOutput, ToolError> {
                Err(ToolError::TimedOut(timeout.as_secs()))
            }
        }

        let out = SleepyRunner
            .invoke_lenient("slow-tool", &[], Duration::from_secs(7))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 1);
        assert!(out.stderr.contains("timed out after 7 seconds"));
    }

    #[test]
    fn verdict_markers_stay_distinct_when_serialized() {
        let missing: ToolVerdict<serde_json::Value> = ToolVerdict::NotInstalled;
        let timed: ToolVerdict<serde_json::Value> = ToolVerdict::TimedOut { seconds: 30 };
        let m = serde_json::to_value(&missing).unwrap();
        let t = serde_json::to_value(&timed).unwrap();
        assert_eq!(m["status"], "not_installed");
        assert_eq!(t["status"], "timed_out");
    }
}
