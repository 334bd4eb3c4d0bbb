// src/core/scheduler.rs

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::core::aggregate;
use crate::core::error::{BatchError, TargetError};
use crate::core::models::{BatchManifest, BatchStatus, ScanRecord, SeverityTotals};
use crate::core::pipeline::{self, ScanContext, TargetOutcome};
use crate::core::progress::{self, ProgressRegistry, ProgressRenderer};

/// Hard bounds on the worker pool size.
pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 32;

/// Runs one batch to completion: validates, schedules one pipeline per
/// target under the bounded pool, joins, aggregates once, and returns the
/// manifest.
///
/// Invalid configuration is rejected with `BatchError` before any side
/// effect. After scheduling starts the call always returns a manifest;
/// orchestration-level failures surface as `status: error` in it, and a
/// single failed target never does.
pub async fn run_batch(
    ctx: ScanContext,
    registry: &ProgressRegistry,
    scan_id: &str,
    target_spec: &str,
    targets: Vec<String>,
    max_workers: usize,
) -> Result<BatchManifest, BatchError> {
    if !(MIN_WORKERS..=MAX_WORKERS).contains(&max_workers) {
        return Err(BatchError::InvalidWorkerCount(max_workers));
    }
    if targets.is_empty() {
        return Err(BatchError::EmptyTargetList);
    }

    let started = Utc::now();
    let concurrent = targets.len() > 1;
    let mut manifest = BatchManifest {
        scan_id: scan_id.to_string(),
        targets: targets.clone(),
        started,
        safe_mode: ctx.safe_mode,
        concurrent,
        max_workers,
        status: BatchStatus::Completed,
        error: None,
    };

    info!(
        scan_id,
        target_spec,
        targets = targets.len(),
        max_workers,
        concurrent,
        "Starting batch."
    );

    if let Err(e) = ctx.store.create_scan(&ScanRecord {
        id: scan_id.to_string(),
        target: target_spec.to_string(),
        safe_mode: ctx.safe_mode,
        started,
        finished: None,
        summary: SeverityTotals::default(),
    }) {
        error!(scan_id, error = %e, "Failed to create scan record.");
        manifest.status = BatchStatus::Error;
        manifest.error = Some(e.to_string());
        return Ok(manifest);
    }

    let progress = registry.create(scan_id, targets.len(), max_workers);

    if concurrent {
        let renderer = ProgressRenderer::spawn(Arc::clone(&progress));
        run_pool(&ctx, scan_id, &targets, max_workers, registry).await;
        renderer.finish().await;
    } else {
        // One target runs inline on the caller's task; no pool, no renderer.
        let target = &targets[0];
        progress.target_started();
        match pipeline::run_target(&ctx, scan_id, target).await {
            Ok(_) => progress.target_completed(),
            Err(e) => {
                error!(target, error = %e, "Target pipeline failed.");
                progress.target_failed();
            }
        }
    }

    progress::log_summary(scan_id, &progress.summary());

    // Aggregation and scan closure run exactly once, after the join barrier.
    // Their failure is the one thing that flips the batch status.
    if let Err(e) = aggregate::update_scan_totals(ctx.store.as_ref(), scan_id)
        .and_then(|_| ctx.store.finish_scan(scan_id, Utc::now()))
    {
        error!(scan_id, error = %e, "Batch aggregation failed.");
        manifest.status = BatchStatus::Error;
        manifest.error = Some(e.to_string());
    }

    aggregate::write_manifest(&ctx.artifacts_dir, &manifest);
    registry.remove(scan_id);
    info!(scan_id, status = %manifest.status, "Batch done.");
    Ok(manifest)
}

/// Schedules one task per target under a semaphore-bounded pool and joins
/// them all. Task failures and panics are absorbed here and recorded as
/// target failures; siblings are unaffected.
async fn run_pool(
    ctx: &ScanContext,
    scan_id: &str,
    targets: &[String],
    max_workers: usize,
    registry: &ProgressRegistry,
) {
    let semaphore = Arc::new(Semaphore::new(max_workers));
    let mut tasks: Vec<(String, JoinHandle<Result<TargetOutcome, TargetError>>)> =
        Vec::with_capacity(targets.len());

    for target in targets {
        let ctx = ctx.clone();
        let semaphore = Arc::clone(&semaphore);
        let scan_id = scan_id.to_string();
        let target_owned = target.clone();
        let progress = registry.get(&scan_id);

        let handle = tokio::spawn(async move {
            // Closed only at shutdown, which never happens mid-batch.
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|_| TargetError::Store(crate::core::error::StoreError::Database(
                    "worker pool closed".to_string(),
                )))?;
            if let Some(p) = &progress {
                p.target_started();
            }
            let outcome = pipeline::run_target(&ctx, &scan_id, &target_owned).await?;
            if let Some(p) = &progress {
                p.target_completed();
            }
            Ok(outcome)
        });
        tasks.push((target.clone(), handle));
    }

    let progress = registry.get(scan_id);
    for (target, handle) in tasks {
        match handle.await {
            Ok(Ok(outcome)) => {
                info!(
                    target,
                    host_id = outcome.host_id,
                    open_ports = outcome.open_ports,
                    findings = outcome.findings,
                    "Target finished."
                );
            }
            Ok(Err(e)) => {
                error!(target, error = %e, "Target pipeline failed.");
                if let Some(p) = &progress {
                    p.target_failed();
                }
            }
            Err(join_err) => {
                error!(target, error = %join_err, "Target task panicked.");
                if let Some(p) = &progress {
                    p.target_failed();
                }
            }
        }
    }
}
