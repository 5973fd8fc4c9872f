//! Lock-free progress tracking for an indexing run.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

use crate::models::FileTier;

pub struct SyncProgress {
    pub active: AtomicBool,
    pub files_total: AtomicUsize,
    pub files_scanned: AtomicUsize,
    pub files_parsed: AtomicUsize,
    pub chunks_embedded: AtomicUsize,
    pub files_written: AtomicUsize,
    pub memory_rss_bytes: AtomicUsize,
    current_tier: Mutex<Option<FileTier>>,
    started_at: Mutex<Option<Instant>>,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            files_total: AtomicUsize::new(0),
            files_scanned: AtomicUsize::new(0),
            files_parsed: AtomicUsize::new(0),
            chunks_embedded: AtomicUsize::new(0),
            files_written: AtomicUsize::new(0),
            memory_rss_bytes: AtomicUsize::new(0),
            current_tier: Mutex::new(None),
            started_at: Mutex::new(None),
        }
    }

    pub fn reset(&self) {
        self.active.store(true, Ordering::Relaxed);
        self.files_total.store(0, Ordering::Relaxed);
        self.files_scanned.store(0, Ordering::Relaxed);
        self.files_parsed.store(0, Ordering::Relaxed);
        self.chunks_embedded.store(0, Ordering::Relaxed);
        self.files_written.store(0, Ordering::Relaxed);
        if let Ok(mut started) = self.started_at.lock() {
            *started = Some(Instant::now());
        }
    }

    pub fn finish(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    pub fn set_tier(&self, tier: FileTier) {
        if let Ok(mut current) = self.current_tier.lock() {
            *current = Some(tier);
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let scanned = self.files_scanned.load(Ordering::Relaxed);
        let total = self.files_total.load(Ordering::Relaxed);
        let elapsed = self
            .started_at
            .lock()
            .ok()
            .and_then(|s| *s)
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let files_per_second = if elapsed > 0.0 {
            scanned as f64 / elapsed
        } else {
            0.0
        };
        let eta_seconds = if files_per_second > 0.0 && total > scanned {
            (total - scanned) as f64 / files_per_second
        } else {
            0.0
        };
        ProgressSnapshot {
            active: self.active.load(Ordering::Relaxed),
            files_total: total,
            files_scanned: scanned,
            files_parsed: self.files_parsed.load(Ordering::Relaxed),
            chunks_embedded: self.chunks_embedded.load(Ordering::Relaxed),
            files_written: self.files_written.load(Ordering::Relaxed),
            memory_rss_bytes: self.memory_rss_bytes.load(Ordering::Relaxed),
            current_tier: self
                .current_tier
                .lock()
                .ok()
                .and_then(|t| *t)
                .map(|t| t.as_str()),
            files_per_second,
            eta_seconds,
        }
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub active: bool,
    pub files_total: usize,
    pub files_scanned: usize,
    pub files_parsed: usize,
    pub chunks_embedded: usize,
    pub files_written: usize,
    pub memory_rss_bytes: usize,
    pub current_tier: Option<&'static str>,
    pub files_per_second: f64,
    pub eta_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let progress = SyncProgress::new();
        progress.reset();
        progress.files_total.store(10, Ordering::Relaxed);
        progress.files_scanned.store(4, Ordering::Relaxed);
        progress.set_tier(FileTier::Deep);

        let snap = progress.snapshot();
        assert!(snap.active);
        assert_eq!(snap.files_total, 10);
        assert_eq!(snap.files_scanned, 4);
        assert_eq!(snap.current_tier, Some("deep"));

        progress.finish();
        assert!(!progress.snapshot().active);
    }
}
