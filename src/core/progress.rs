// src/core/progress.rs

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const BAR_WIDTH: usize = 30;
const RENDER_INTERVAL: Duration = Duration::from_secs(2);
const RENDERER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// --- Counters ---

#[derive(Debug, Default)]
struct Counters {
    total: usize,
    completed: usize,
    failed: usize,
    active: usize,
}

/// Point-in-time view of a batch. `eta` is a rendered duration string, or
/// "calculating..." until at least one target has finished.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub percent: f64,
    pub completed: usize,
    pub total: usize,
    pub active: usize,
    pub max_workers: usize,
    pub failed: usize,
    pub eta: String,
}

/// Final batch numbers, logged once after the renderer stops.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub total_time: String,
    pub avg_time_per_target: String,
}

/// Shared progress state for one batch. Workers call the `target_*` methods;
/// a single renderer task reads snapshots. A failed target still counts as
/// completed so the bar always reaches 100%.
pub struct BatchProgress {
    counters: Mutex<Counters>,
    max_workers: usize,
    started_at: Instant,
}

impl BatchProgress {
    pub fn new(total: usize, max_workers: usize) -> Self {
        Self {
            counters: Mutex::new(Counters {
                total,
                ..Counters::default()
            }),
            max_workers,
            started_at: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn target_started(&self) {
        self.lock().active += 1;
    }

    pub fn target_completed(&self) {
        let mut c = self.lock();
        c.completed += 1;
        c.active = c.active.saturating_sub(1);
    }

    pub fn target_failed(&self) {
        let mut c = self.lock();
        c.failed += 1;
        c.completed += 1;
        c.active = c.active.saturating_sub(1);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let c = self.lock();
        let percent = if c.total == 0 {
            100.0
        } else {
            c.completed as f64 / c.total as f64 * 100.0
        };
        let eta = if c.completed == 0 {
            "calculating...".to_string()
        } else {
            let elapsed = self.started_at.elapsed().as_secs_f64();
            let per_target = elapsed / c.completed as f64;
            let remaining = c.total.saturating_sub(c.completed) as f64;
            format_duration(Duration::from_secs_f64(per_target * remaining))
        };
        ProgressSnapshot {
            percent,
            completed: c.completed,
            total: c.total,
            active: c.active,
            max_workers: self.max_workers,
            failed: c.failed,
            eta,
        }
    }

    /// Final batch numbers. Rates and the per-target average divide by the
    /// batch total, not by what has completed so far, so a summary read
    /// mid-batch understates rather than inflates.
    pub fn summary(&self) -> BatchSummary {
        let c = self.lock();
        let elapsed = self.started_at.elapsed();
        let succeeded = c.completed.saturating_sub(c.failed);
        let success_rate = if c.total == 0 {
            0.0
        } else {
            succeeded as f64 / c.total as f64 * 100.0
        };
        let avg = if c.total == 0 {
            Duration::ZERO
        } else {
            elapsed / c.total as u32
        };
        BatchSummary {
            total: c.total,
            completed: c.completed,
            failed: c.failed,
            success_rate,
            total_time: format_duration(elapsed),
            avg_time_per_target: format_duration(avg),
        }
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn render_line(s: &ProgressSnapshot) -> String {
    let filled = ((s.percent / 100.0) * BAR_WIDTH as f64).round() as usize;
    let filled = filled.min(BAR_WIDTH);
    let bar: String = "█".repeat(filled) + &"░".repeat(BAR_WIDTH - filled);
    format!(
        "[{bar}] {:.1}% ({}/{}) | active: {}/{} | failed: {} | eta: {}",
        s.percent, s.completed, s.total, s.active, s.max_workers, s.failed, s.eta
    )
}

// --- Renderer ---

/// Periodic progress bar on stderr. Dropping the handle is not enough to
/// stop it; call `finish` so the final 100% line lands before the summary.
pub struct ProgressRenderer {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProgressRenderer {
    pub fn spawn(progress: Arc<BatchProgress>) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(RENDER_INTERVAL);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let line = render_line(&progress.snapshot());
                        let mut err = std::io::stderr().lock();
                        let _ = write!(err, "\r{line}");
                        let _ = err.flush();
                    }
                    _ = stopped.changed() => {
                        let line = render_line(&progress.snapshot());
                        let mut err = std::io::stderr().lock();
                        let _ = writeln!(err, "\r{line}");
                        let _ = err.flush();
                        return;
                    }
                }
            }
        });
        Self { stop, task }
    }

    /// Stops the renderer and waits for its final line, bounded so a wedged
    /// stderr cannot stall batch completion.
    pub async fn finish(self) {
        let _ = self.stop.send(true);
        if tokio::time::timeout(RENDERER_SHUTDOWN_TIMEOUT, self.task)
            .await
            .is_err()
        {
            warn!("Progress renderer did not stop in time; abandoning it.");
        }
    }
}

/// Logs the end-of-batch summary through tracing rather than the bar line.
pub fn log_summary(scan_id: &str, summary: &BatchSummary) {
    info!(
        scan_id,
        total = summary.total,
        completed = summary.completed,
        failed = summary.failed,
        success_rate = format!("{:.1}%", summary.success_rate),
        total_time = %summary.total_time,
        avg_time_per_target = %summary.avg_time_per_target,
        "Batch finished."
    );
}

// --- Registry ---

/// Process-wide map from scan id to its progress tracker, so callers can
/// poll a running batch they did not start.
#[derive(Default)]
pub struct ProgressRegistry {
    inner: Mutex<HashMap<String, Arc<BatchProgress>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<BatchProgress>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create(&self, scan_id: &str, total: usize, max_workers: usize) -> Arc<BatchProgress> {
        let progress = Arc::new(BatchProgress::new(total, max_workers));
        self.lock().insert(scan_id.to_string(), Arc::clone(&progress));
        progress
    }

    pub fn get(&self, scan_id: &str) -> Option<Arc<BatchProgress>> {
        self.lock().get(scan_id).cloned()
    }

    pub fn remove(&self, scan_id: &str) {
        self.lock().remove(scan_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_targets_still_advance_completion() {
        let p = BatchProgress::new(4, 2);
        p.target_started();
        p.target_started();
        p.target_completed();
        p.target_failed();
        let s = p.snapshot();
        assert_eq!(s.completed, 2);
        assert_eq!(s.failed, 1);
        assert_eq!(s.active, 0);
        assert_eq!(s.percent, 50.0);
    }

    #[test]
    fn eta_is_calculating_until_first_completion() {
        let p = BatchProgress::new(10, 4);
        p.target_started();
        assert_eq!(p.snapshot().eta, "calculating...");
        p.target_completed();
        assert_ne!(p.snapshot().eta, "calculating...");
    }

    #[test]
    fn summary_rates_divide_by_the_batch_total() {
        let p = BatchProgress::new(3, 2);
        for _ in 0..3 {
            p.target_started();
        }
        p.target_completed();
        p.target_completed();
        p.target_failed();
        let s = p.summary();
        assert_eq!(s.completed, 3);
        assert_eq!(s.failed, 1);
        assert!((s.success_rate - 66.6).abs() < 1.0);

        // Read mid-batch the rate understates: 1 success out of 4 planned.
        let partial = BatchProgress::new(4, 2);
        partial.target_started();
        partial.target_completed();
        assert!((partial.summary().success_rate - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn durations_render_as_h_mm_ss() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00:00");
        assert_eq!(format_duration(Duration::from_secs(61)), "0:01:01");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn bar_fills_proportionally() {
        let p = BatchProgress::new(2, 1);
        p.target_started();
        p.target_completed();
        let line = render_line(&p.snapshot());
        assert!(line.contains("50.0%"));
        assert_eq!(line.matches('█').count(), 15);
        assert_eq!(line.matches('░').count(), 15);
    }

    #[test]
    fn registry_tracks_batches_by_scan_id() {
        let reg = ProgressRegistry::new();
        let p = reg.create("scan-1", 5, 2);
        p.target_started();
        let seen = reg.get("scan-1").unwrap();
        assert_eq!(seen.snapshot().active, 1);
        reg.remove("scan-1");
        assert!(reg.get("scan-1").is_none());
    }
}
