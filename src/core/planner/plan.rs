// ─── Sync Planner ───
// Diffs the local tree against the manifest. Read-only; never mutates disk.

use std::path::Path;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info};

use crate::core::fingerprint::fingerprint;
use crate::core::manifest::{FileRecord, Manifest};
use crate::core::progress::ProgressAggregator;

/// Why a file has to be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchReason {
    Missing,
    Mismatch,
    ReadError,
}

/// Decision for one manifest record.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    Skip(FileRecord),
    Fetch {
        record: FileRecord,
        reason: FetchReason,
    },
}

impl SyncAction {
    pub fn record(&self) -> &FileRecord {
        match self {
            SyncAction::Skip(record) | SyncAction::Fetch { record, .. } => record,
        }
    }

    pub fn is_fetch(&self) -> bool {
        matches!(self, SyncAction::Fetch { .. })
    }
}

/// One action per manifest record, in manifest order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    actions: Vec<SyncAction>,
}

impl SyncPlan {
    pub fn new(actions: Vec<SyncAction>) -> Self {
        Self { actions }
    }

    pub fn actions(&self) -> &[SyncAction] {
        &self.actions
    }

    pub fn fetches(&self) -> impl Iterator<Item = &FileRecord> {
        self.actions
            .iter()
            .filter(|a| a.is_fetch())
            .map(SyncAction::record)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches().count()
    }

    pub fn fetch_bytes(&self) -> u64 {
        self.fetches().map(|r| r.size).sum()
    }

    pub fn skip_count(&self) -> usize {
        self.actions.len() - self.fetch_count()
    }

    pub fn is_up_to_date(&self) -> bool {
        self.fetch_count() == 0
    }
}

/// Decide what to do with a single record. Blocking.
pub fn classify(record: &FileRecord, root: &Path) -> SyncAction {
    let local = record.local_path(root);

    let reason = match std::fs::metadata(&local) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Some(FetchReason::Missing),
        _ => match fingerprint(&local) {
            Ok(fp) if fp == record.fingerprint => None,
            Ok(_) => Some(FetchReason::Mismatch),
            Err(e) => {
                debug!("{}", e);
                Some(FetchReason::ReadError)
            }
        },
    };

    match reason {
        None => SyncAction::Skip(record.clone()),
        Some(reason) => SyncAction::Fetch {
            record: record.clone(),
            reason,
        },
    }
}

/// Sequential scan in manifest order.
pub fn plan(manifest: &Manifest, root: &Path) -> SyncPlan {
    let actions = manifest
        .records()
        .iter()
        .map(|record| classify(record, root))
        .collect();
    SyncPlan::new(actions)
}

/// Scan with up to `concurrency` fingerprints in flight on the blocking pool.
///
/// Results land in index-addressed slots, so the plan keeps manifest order
/// regardless of completion order.
pub async fn plan_concurrent(
    manifest: &Manifest,
    root: &Path,
    concurrency: usize,
    progress: Option<&ProgressAggregator>,
) -> SyncPlan {
    let total = manifest.file_count();
    if let Some(progress) = progress {
        progress.begin_scan(total as u64);
    }

    let mut slots: Vec<Option<SyncAction>> = (0..total).map(|_| None).collect();
    let mut scans = stream::iter(manifest.records().iter().cloned().enumerate())
        .map(|(index, record)| {
            let root = root.to_path_buf();
            async move {
                let fallback = record.clone();
                let action = tokio::task::spawn_blocking(move || classify(&record, &root))
                    .await
                    .unwrap_or(SyncAction::Fetch {
                        record: fallback,
                        reason: FetchReason::ReadError,
                    });
                (index, action)
            }
        })
        .buffer_unordered(concurrency.max(1));

    while let Some((index, action)) = scans.next().await {
        if let Some(progress) = progress {
            progress.record_scanned(&action.record().path);
        }
        slots[index] = Some(action);
    }

    let plan = SyncPlan::new(slots.into_iter().flatten().collect());
    info!(
        "Plan ready: {} to fetch ({} bytes), {} up to date",
        plan.fetch_count(),
        plan.fetch_bytes(),
        plan.skip_count()
    );
    plan
}
