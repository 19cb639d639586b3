//! Pipeline metrics
//!
//! Counters are atomics, timings go into fixed-capacity sample rings with
//! percentile readout, and everything is snapshot-able at any time for the
//! control API without stopping the loop.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

const RING_CAPACITY: usize = 512;

/// Fixed-capacity ring of timing samples
struct SampleRing {
    samples: Vec<f64>,
    pos: usize,
    count: usize,
}

impl SampleRing {
    fn new() -> Self {
        Self {
            samples: vec![0.0; RING_CAPACITY],
            pos: 0,
            count: 0,
        }
    }

    fn push(&mut self, value: f64) {
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % RING_CAPACITY;
        if self.count < RING_CAPACITY {
            self.count += 1;
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples[..self.count].to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((p / 100.0) * (self.count as f64 - 1.0)).round() as usize;
        sorted[idx.min(self.count - 1)]
    }
}

/// Percentile summary for one timing series
#[derive(Debug, Clone, Serialize)]
pub struct TimingSummary {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub count: usize,
}

/// Well-known timing names
pub mod timing {
    pub const TICK: &str = "tick";
    pub const CAPTURE: &str = "capture";
    pub const OCR: &str = "ocr";
    pub const TRANSLATE: &str = "translate";
    pub const RENDER: &str = "render";
}

/// All pipeline counters and timings
#[derive(Default)]
pub struct MetricsRegistry {
    pub ticks: AtomicU64,
    pub frames_captured: AtomicU64,
    pub frames_skipped: AtomicU64,
    pub frames_skipped_late: AtomicU64,
    pub ocr_runs: AtomicU64,
    pub ocr_cache_hits: AtomicU64,
    pub blocks_recognized: AtomicU64,
    pub translations: AtomicU64,
    pub translation_fallbacks: AtomicU64,
    pub renders: AtomicU64,
    pub stage_errors: AtomicU64,
    pub stage_timeouts: AtomicU64,
    pub worker_restarts: AtomicU64,
    stage_failures: Mutex<HashMap<String, u64>>,
    timings: Mutex<HashMap<&'static str, SampleRing>>,
    status: Mutex<Option<String>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stage failure by name
    pub fn record_stage_failure(&self, stage: &str) {
        self.stage_errors.fetch_add(1, Ordering::Relaxed);
        let mut failures = lock(&self.stage_failures);
        *failures.entry(stage.to_string()).or_insert(0) += 1;
    }

    /// Record a timing sample in milliseconds
    pub fn record_timing(&self, name: &'static str, start: Instant) {
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        lock(&self.timings)
            .entry(name)
            .or_insert_with(SampleRing::new)
            .push(elapsed_ms);
    }

    /// Set or clear the user-visible status line
    pub fn set_status(&self, status: Option<String>) {
        if let Some(message) = status.as_deref() {
            tracing::warn!("Pipeline status: {}", message);
        }
        *lock(&self.status) = status;
    }

    /// Current user-visible status
    pub fn status(&self) -> Option<String> {
        lock(&self.status).clone()
    }

    /// Point-in-time snapshot for the control API
    pub fn snapshot(&self) -> MetricsSnapshot {
        let timings = lock(&self.timings)
            .iter()
            .map(|(&name, ring)| {
                (
                    name.to_string(),
                    TimingSummary {
                        p50_ms: ring.percentile(50.0),
                        p95_ms: ring.percentile(95.0),
                        p99_ms: ring.percentile(99.0),
                        count: ring.count,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            frames_skipped_late: self.frames_skipped_late.load(Ordering::Relaxed),
            ocr_runs: self.ocr_runs.load(Ordering::Relaxed),
            ocr_cache_hits: self.ocr_cache_hits.load(Ordering::Relaxed),
            blocks_recognized: self.blocks_recognized.load(Ordering::Relaxed),
            translations: self.translations.load(Ordering::Relaxed),
            translation_fallbacks: self.translation_fallbacks.load(Ordering::Relaxed),
            renders: self.renders.load(Ordering::Relaxed),
            stage_errors: self.stage_errors.load(Ordering::Relaxed),
            stage_timeouts: self.stage_timeouts.load(Ordering::Relaxed),
            worker_restarts: self.worker_restarts.load(Ordering::Relaxed),
            stage_failures: lock(&self.stage_failures).clone(),
            timings,
            status: self.status(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serializable snapshot of everything the registry tracks
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub frames_captured: u64,
    pub frames_skipped: u64,
    pub frames_skipped_late: u64,
    pub ocr_runs: u64,
    pub ocr_cache_hits: u64,
    pub blocks_recognized: u64,
    pub translations: u64,
    pub translation_fallbacks: u64,
    pub renders: u64,
    pub stage_errors: u64,
    pub stage_timeouts: u64,
    pub worker_restarts: u64,
    pub stage_failures: HashMap<String, u64>,
    pub timings: HashMap<String, TimingSummary>,
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_snapshot() {
        let metrics = MetricsRegistry::new();
        metrics.ticks.fetch_add(3, Ordering::Relaxed);
        metrics.frames_skipped.fetch_add(1, Ordering::Relaxed);
        metrics.record_stage_failure("ocr");
        metrics.record_stage_failure("ocr");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.ticks, 3);
        assert_eq!(snapshot.frames_skipped, 1);
        assert_eq!(snapshot.stage_errors, 2);
        assert_eq!(snapshot.stage_failures.get("ocr"), Some(&2));
    }

    #[test]
    fn test_timing_percentiles() {
        let metrics = MetricsRegistry::new();
        let earlier = Instant::now() - std::time::Duration::from_millis(10);
        metrics.record_timing(timing::TICK, earlier);

        let snapshot = metrics.snapshot();
        let tick = snapshot.timings.get("tick").expect("tick timing");
        assert_eq!(tick.count, 1);
        assert!(tick.p50_ms >= 10.0);
    }

    #[test]
    fn test_status_round_trip() {
        let metrics = MetricsRegistry::new();
        assert_eq!(metrics.status(), None);
        metrics.set_status(Some("ocr stage disabled".into()));
        assert_eq!(metrics.snapshot().status.as_deref(), Some("ocr stage disabled"));
        metrics.set_status(None);
        assert_eq!(metrics.status(), None);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = MetricsRegistry::new();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert!(json.get("ticks").is_some());
    }
}
