use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::core::transfer::{TaskStatus, TransferEvent, TransferObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Scanning,
    Fetching,
    Finished,
}

impl Phase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Phase::Scanning,
            2 => Phase::Fetching,
            3 => Phase::Finished,
            _ => Phase::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::Scanning => 1,
            Phase::Fetching => 2,
            Phase::Finished => 3,
        }
    }
}

/// Aggregate counters for the fetch phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionTotals {
    pub total_bytes_expected: u64,
    pub bytes_transferred: u64,
    pub files_expected: u64,
    pub files_completed: u64,
}

/// Per-file view, addressed by manifest path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileProgress {
    /// Bytes counted toward the session total (clamped to `bytes_total`).
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub status: TaskStatus,
}

/// Payload handed to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub file: Option<String>,
    pub file_bytes_done: u64,
    pub file_bytes_total: u64,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub files_done: u64,
    pub files_total: u64,
}

/// Folds orchestrator events into totals readable from any thread.
///
/// Writers serialize on the per-file map; readers only load atomics.
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    phase: AtomicU8,
    scan_done: AtomicU64,
    scan_total: AtomicU64,
    total_bytes_expected: AtomicU64,
    bytes_transferred: AtomicU64,
    files_expected: AtomicU64,
    files_completed: AtomicU64,
    files: Mutex<HashMap<String, FileProgress>>,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.store(phase.as_u8(), Ordering::Release);
    }

    // ── Scanning ────────────────────────────────────────

    pub fn begin_scan(&self, files_total: u64) {
        self.scan_done.store(0, Ordering::Relaxed);
        self.scan_total.store(files_total, Ordering::Relaxed);
        self.set_phase(Phase::Scanning);
    }

    pub fn record_scanned(&self, _path: &str) {
        self.scan_done.fetch_add(1, Ordering::Relaxed);
    }

    /// `(scanned, total)` for the scanning phase.
    pub fn scan_counts(&self) -> (u64, u64) {
        (
            self.scan_done.load(Ordering::Relaxed),
            self.scan_total.load(Ordering::Relaxed),
        )
    }

    // ── Fetching ────────────────────────────────────────

    pub fn apply(&self, event: &TransferEvent) {
        match event {
            TransferEvent::SessionStarted { files, bytes } => {
                let mut map = self.lock_files();
                map.clear();
                self.total_bytes_expected.store(*bytes, Ordering::Relaxed);
                self.bytes_transferred.store(0, Ordering::Relaxed);
                self.files_expected.store(*files, Ordering::Relaxed);
                self.files_completed.store(0, Ordering::Relaxed);
                self.set_phase(Phase::Fetching);
            }
            TransferEvent::Started {
                path, total_bytes, ..
            } => {
                let mut map = self.lock_files();
                let entry = map.entry(path.clone()).or_insert(FileProgress {
                    bytes_done: 0,
                    bytes_total: *total_bytes,
                    status: TaskStatus::Pending,
                });
                self.recredit(entry.bytes_done, 0);
                entry.bytes_done = 0;
                entry.bytes_total = *total_bytes;
                entry.status = TaskStatus::Fetching;
            }
            TransferEvent::Chunk {
                path, bytes_done, ..
            } => {
                let mut map = self.lock_files();
                if let Some(entry) = map.get_mut(path).filter(|e| !e.status.is_terminal()) {
                    let credited = (*bytes_done).min(entry.bytes_total);
                    self.recredit(entry.bytes_done, credited);
                    entry.bytes_done = credited;
                }
            }
            TransferEvent::Verifying { path } => {
                if let Some(entry) = self.lock_files().get_mut(path) {
                    entry.status = TaskStatus::Verifying;
                }
            }
            TransferEvent::Committed { path, size } => {
                let mut map = self.lock_files();
                let entry = map.entry(path.clone()).or_insert(FileProgress {
                    bytes_done: 0,
                    bytes_total: *size,
                    status: TaskStatus::Pending,
                });
                self.recredit(entry.bytes_done, entry.bytes_total);
                entry.bytes_done = entry.bytes_total;
                entry.status = TaskStatus::Committed;
                self.files_completed.fetch_add(1, Ordering::Relaxed);
            }
            TransferEvent::Failed {
                path,
                kind,
                will_retry,
                ..
            } => {
                let mut map = self.lock_files();
                if let Some(entry) = map.get_mut(path) {
                    self.recredit(entry.bytes_done, 0);
                    entry.bytes_done = 0;
                    entry.status = if *will_retry {
                        TaskStatus::Pending
                    } else {
                        TaskStatus::Failed(*kind)
                    };
                }
            }
            TransferEvent::SessionFinished { .. } => self.set_phase(Phase::Finished),
        }
    }

    /// Move a file's credit from `from` to `to`. Caller holds the files lock.
    fn recredit(&self, from: u64, to: u64) {
        if to > from {
            self.bytes_transferred.fetch_add(to - from, Ordering::Relaxed);
        } else if from > to {
            self.bytes_transferred.fetch_sub(from - to, Ordering::Relaxed);
        }
    }

    fn lock_files(&self) -> MutexGuard<'_, HashMap<String, FileProgress>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Reads ───────────────────────────────────────────

    pub fn snapshot(&self) -> SessionTotals {
        let total_bytes_expected = self.total_bytes_expected.load(Ordering::Relaxed);
        SessionTotals {
            total_bytes_expected,
            bytes_transferred: self
                .bytes_transferred
                .load(Ordering::Relaxed)
                .min(total_bytes_expected),
            files_expected: self.files_expected.load(Ordering::Relaxed),
            files_completed: self.files_completed.load(Ordering::Relaxed),
        }
    }

    pub fn file(&self, path: &str) -> Option<FileProgress> {
        self.lock_files().get(path).copied()
    }

    /// Snapshot shaped for the UI, optionally focused on one file.
    pub fn progress_event(&self, file: Option<&str>) -> ProgressEvent {
        let phase = self.phase();
        let totals = self.snapshot();
        let focused = file.and_then(|path| self.file(path));

        let (files_done, files_total) = match phase {
            Phase::Scanning => self.scan_counts(),
            _ => (totals.files_completed, totals.files_expected),
        };

        ProgressEvent {
            phase,
            file: file.map(str::to_string),
            file_bytes_done: focused.map(|f| f.bytes_done).unwrap_or(0),
            file_bytes_total: focused.map(|f| f.bytes_total).unwrap_or(0),
            bytes_done: totals.bytes_transferred,
            bytes_total: totals.total_bytes_expected,
            files_done,
            files_total,
        }
    }
}

impl TransferObserver for ProgressAggregator {
    fn on_event(&self, event: &TransferEvent) {
        self.apply(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transfer::FailureKind;

    fn started(path: &str, total: u64) -> TransferEvent {
        TransferEvent::Started {
            path: path.into(),
            total_bytes: total,
            attempt: 1,
        }
    }

    fn chunk(path: &str, done: u64, total: u64) -> TransferEvent {
        TransferEvent::Chunk {
            path: path.into(),
            bytes_done: done,
            total_bytes: total,
        }
    }

    #[test]
    fn accumulates_out_of_order_completions() {
        let agg = ProgressAggregator::new();
        agg.apply(&TransferEvent::SessionStarted { files: 2, bytes: 300 });
        agg.apply(&started("a", 100));
        agg.apply(&started("b", 200));
        agg.apply(&chunk("b", 150, 200));
        agg.apply(&chunk("a", 100, 100));
        agg.apply(&TransferEvent::Committed { path: "a".into(), size: 100 });

        let totals = agg.snapshot();
        assert_eq!(totals.bytes_transferred, 250);
        assert_eq!(totals.files_completed, 1);
        assert_eq!(agg.file("b").unwrap().status, TaskStatus::Fetching);

        agg.apply(&chunk("b", 200, 200));
        agg.apply(&TransferEvent::Committed { path: "b".into(), size: 200 });
        assert_eq!(
            agg.snapshot(),
            SessionTotals {
                total_bytes_expected: 300,
                bytes_transferred: 300,
                files_expected: 2,
                files_completed: 2,
            }
        );
    }

    #[test]
    fn oversized_chunks_are_clamped() {
        let agg = ProgressAggregator::new();
        agg.apply(&TransferEvent::SessionStarted { files: 1, bytes: 100 });
        agg.apply(&started("a", 100));
        agg.apply(&chunk("a", 4096, 100));

        assert_eq!(agg.snapshot().bytes_transferred, 100);
        assert_eq!(agg.file("a").unwrap().bytes_done, 100);
    }

    #[test]
    fn retry_resets_file_credit() {
        let agg = ProgressAggregator::new();
        agg.apply(&TransferEvent::SessionStarted { files: 1, bytes: 100 });
        agg.apply(&started("a", 100));
        agg.apply(&chunk("a", 60, 100));
        agg.apply(&TransferEvent::Failed {
            path: "a".into(),
            kind: FailureKind::HashMismatch,
            detail: String::new(),
            will_retry: true,
        });
        assert_eq!(agg.snapshot().bytes_transferred, 0);
        assert_eq!(agg.file("a").unwrap().status, TaskStatus::Pending);

        agg.apply(&started("a", 100));
        agg.apply(&chunk("a", 40, 100));
        agg.apply(&TransferEvent::Failed {
            path: "a".into(),
            kind: FailureKind::SourceUnavailable,
            detail: String::new(),
            will_retry: false,
        });
        assert_eq!(agg.snapshot().bytes_transferred, 0);
        assert_eq!(
            agg.file("a").unwrap().status,
            TaskStatus::Failed(FailureKind::SourceUnavailable)
        );
    }

    #[test]
    fn phases_and_ui_payload() {
        let agg = ProgressAggregator::new();
        assert_eq!(agg.phase(), Phase::Idle);

        agg.begin_scan(3);
        agg.record_scanned("a");
        let event = agg.progress_event(None);
        assert_eq!(event.phase, Phase::Scanning);
        assert_eq!((event.files_done, event.files_total), (1, 3));

        agg.apply(&TransferEvent::SessionStarted { files: 1, bytes: 10 });
        agg.apply(&started("a", 10));
        agg.apply(&chunk("a", 4, 10));
        let event = agg.progress_event(Some("a"));
        assert_eq!(event.phase, Phase::Fetching);
        assert_eq!(event.file.as_deref(), Some("a"));
        assert_eq!((event.file_bytes_done, event.file_bytes_total), (4, 10));
        assert_eq!((event.bytes_done, event.bytes_total), (4, 10));

        agg.apply(&TransferEvent::SessionFinished {
            status: crate::core::transfer::SessionStatus::Completed,
        });
        assert_eq!(agg.phase(), Phase::Finished);
    }

    #[test]
    fn concurrent_writers_never_exceed_total() {
        let agg = std::sync::Arc::new(ProgressAggregator::new());
        agg.apply(&TransferEvent::SessionStarted {
            files: 8,
            bytes: 8 * 1000,
        });

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    let path = format!("f{i}");
                    agg.apply(&started(&path, 1000));
                    for done in (100..=1200).step_by(100) {
                        agg.apply(&chunk(&path, done, 1000));
                        let totals = agg.snapshot();
                        assert!(totals.bytes_transferred <= totals.total_bytes_expected);
                    }
                    agg.apply(&TransferEvent::Committed { path, size: 1000 });
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let totals = agg.snapshot();
        assert_eq!(totals.bytes_transferred, 8000);
        assert_eq!(totals.files_completed, 8);
    }
}
