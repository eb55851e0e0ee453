//! Per-tick run metrics, session aggregation, and local file retention
//! (spec §4.10).
//!
//! [`SessionAccounting`] collects one [`RunMetrics`] sample per scheduler
//! tick; [`SessionAccounting::summary`] folds the run into a
//! [`SessionSummary`] flushed on the same cadence as logs (spec §4.9 tick
//! step 4). [`apply_retention`] prunes stale asset/log files from the SDK
//! home directory as part of that same flush.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// RunMetrics / SessionSummary
// ---------------------------------------------------------------------------

/// One scheduler tick's counters (spec §4.9 step 3 / §4.10).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunMetrics {
    /// Jobs run() this pass (across priority and normal queues).
    pub jobs_run: u64,
    /// Bytes written to disk by any `AssetDownloadJob` this pass.
    pub bytes_downloaded: u64,
    /// Wall-clock duration of the pass.
    pub pass_duration_ms: u64,
    /// Jobs whose `process()` returned `Err` this pass.
    pub errors: u64,
}

/// Aggregated view over a session's recorded [`RunMetrics`] (spec §4.10).
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    /// Number of ticks contributing to this summary.
    pub ticks: usize,
    /// Mean pass duration across all ticks.
    pub mean_pass_duration_ms: f64,
    /// 99th percentile pass duration.
    pub p99_pass_duration_ms: f64,
    /// Sum of jobs run across all ticks.
    pub total_jobs_run: u64,
    /// Sum of bytes downloaded across all ticks.
    pub total_bytes_downloaded: u64,
    /// Sum of job errors across all ticks.
    pub total_errors: u64,
}

/// Linear-interpolation percentile over an already-sorted slice. `pct` is in
/// `[0, 100]`. Returns `0.0` for an empty slice.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower] as f64;
    }
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

/// Collects per-tick [`RunMetrics`] samples behind a mutex and folds them
/// into a [`SessionSummary`] on demand.
#[derive(Default)]
pub struct SessionAccounting {
    samples: Mutex<Vec<RunMetrics>>,
}

impl SessionAccounting {
    /// Empty accounting, ready to record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one tick's sample.
    pub fn record(&self, sample: RunMetrics) {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sample);
    }

    /// Number of ticks recorded so far.
    pub fn len(&self) -> usize {
        self.samples.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True if no tick has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fold every recorded sample into a [`SessionSummary`].
    pub fn summary(&self) -> SessionSummary {
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let ticks = samples.len();
        if ticks == 0 {
            return SessionSummary {
                ticks: 0,
                mean_pass_duration_ms: 0.0,
                p99_pass_duration_ms: 0.0,
                total_jobs_run: 0,
                total_bytes_downloaded: 0,
                total_errors: 0,
            };
        }
        let mut durations: Vec<u64> = samples.iter().map(|s| s.pass_duration_ms).collect();
        durations.sort_unstable();
        let mean = durations.iter().sum::<u64>() as f64 / ticks as f64;
        SessionSummary {
            ticks,
            mean_pass_duration_ms: mean,
            p99_pass_duration_ms: percentile(&durations, 99.0),
            total_jobs_run: samples.iter().map(|s| s.jobs_run).sum(),
            total_bytes_downloaded: samples.iter().map(|s| s.bytes_downloaded).sum(),
            total_errors: samples.iter().map(|s| s.errors).sum(),
        }
    }

    /// Discard every recorded sample, e.g. right after a flush.
    pub fn clear(&self) {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

// ---------------------------------------------------------------------------
// Flush
// ---------------------------------------------------------------------------

/// Collaborator that persists a [`SessionSummary`], invoked on the same
/// cadence as log flushing (spec §4.9 tick step 4).
pub trait TelemetrySink: Send + Sync {
    /// Persist `summary`.
    fn flush(&self, summary: &SessionSummary);
}

/// Emits the summary as a structured `tracing` event; the default sink for
/// the CLI entry point (spec §4.0: "structured via a tracing-style
/// facade").
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn flush(&self, summary: &SessionSummary) {
        info!(
            ticks = summary.ticks,
            mean_pass_duration_ms = summary.mean_pass_duration_ms,
            p99_pass_duration_ms = summary.p99_pass_duration_ms,
            total_jobs_run = summary.total_jobs_run,
            total_bytes_downloaded = summary.total_bytes_downloaded,
            total_errors = summary.total_errors,
            "session telemetry flush"
        );
    }
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// Bounds on how many stale files to keep, by age and by count (spec
/// §4.10).
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Files older than this are removed regardless of count.
    pub max_age: Duration,
    /// At most this many files (the most recent, by mtime) are kept even
    /// if none have aged out.
    pub max_count: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            max_count: 64,
        }
    }
}

/// What [`apply_retention`] did, for logging/testing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    /// Files removed for exceeding `max_age`.
    pub removed_for_age: usize,
    /// Files removed for exceeding `max_count` after the age pass.
    pub removed_for_count: usize,
}

/// Delete files directly under `dir` whose name matches `matches` and that
/// are stale per `policy`. Errors reading individual files are logged and
/// skipped rather than aborting the whole pass — one unreadable entry
/// should not block retention for the rest.
pub fn apply_retention(
    dir: &Path,
    matches: impl Fn(&str) -> bool,
    policy: &RetentionPolicy,
) -> RetentionReport {
    let mut report = RetentionReport::default();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "retention scan failed");
            return report;
        }
    };

    let now = SystemTime::now();
    let mut candidates = Vec::new();
    for entry in entries.flatten() {
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if !matches(&name) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        candidates.push((entry.path(), modified));
    }

    candidates.retain(|(path, modified)| {
        let age = now.duration_since(*modified).unwrap_or(Duration::ZERO);
        if age > policy.max_age {
            if fs::remove_file(path).is_ok() {
                report.removed_for_age += 1;
            }
            false
        } else {
            true
        }
    });

    candidates.sort_by_key(|(_, modified)| std::cmp::Reverse(*modified));
    for (path, _) in candidates.into_iter().skip(policy.max_count) {
        if fs::remove_file(&path).is_ok() {
            report.removed_for_count += 1;
        }
    }

    report
}
