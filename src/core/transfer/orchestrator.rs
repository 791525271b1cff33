use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use reqwest::Client;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::event::{FailureKind, TaskStatus, TransferEvent, TransferObserver};
use super::source::{SourceLocator, SourceResolver};
use super::task::{verify_and_commit, AttemptError, SourceStream, TempFile, TransferTask};
use crate::core::error::{SyncError, SyncResult};
use crate::core::http::build_http_client;
use crate::core::planner::{SyncAction, SyncPlan};

/// Knobs for one transfer session.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Worker pool size.
    pub concurrency: usize,
    /// Attempts per file, first try included.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further one.
    pub retry_backoff: Duration,
    /// Read size for local sources.
    pub chunk_size: usize,
    /// Longest wait for the next chunk (or the response head) before giving up on an attempt.
    pub stall_timeout: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            chunk_size: 1024 * 1024,
            stall_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedFile {
    pub path: String,
    pub kind: FailureKind,
    pub detail: String,
}

/// Final outcome of a session. Lists are in plan order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionReport {
    pub status: SessionStatus,
    pub fetched: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedFile>,
    /// Fetches abandoned because of cancellation.
    pub cancelled: Vec<String>,
}

impl SessionReport {
    /// True iff the session ran to completion with no failed file.
    pub fn is_success(&self) -> bool {
        self.status == SessionStatus::Completed && self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} fetched, {} skipped, {} failed",
            self.fetched.len(),
            self.skipped.len(),
            self.failed.len()
        );
        if self.status == SessionStatus::Cancelled {
            line.push_str(&format!(", cancelled ({} not fetched)", self.cancelled.len()));
        }
        line
    }
}

enum TaskOutcome {
    Committed,
    Failed { kind: FailureKind, detail: String },
    Cancelled,
}

/// Executes a sync plan with a bounded pool of concurrent transfers.
///
/// Each fetch streams into a temporary sibling file, is fingerprinted, and
/// only then renamed over the destination. Per-file failures are retried
/// with backoff and finally reported; they never abort the session.
pub struct TransferOrchestrator {
    client: Client,
    options: TransferOptions,
    cancel: CancellationToken,
    observers: Vec<Arc<dyn TransferObserver>>,
}

impl TransferOrchestrator {
    pub fn new(options: TransferOptions) -> SyncResult<Self> {
        let client = build_http_client(options.stall_timeout)?;
        Ok(Self::with_client(client, options))
    }

    pub fn with_client(client: Client, options: TransferOptions) -> Self {
        Self {
            client,
            options,
            cancel: CancellationToken::new(),
            observers: Vec::new(),
        }
    }

    /// Register an observer; it sees every event synchronously.
    pub fn observe(mut self, observer: Arc<dyn TransferObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Event stream for an asynchronous consumer.
    pub fn event_stream(&mut self) -> mpsc::UnboundedReceiver<TransferEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(Arc::new(tx));
        rx
    }

    /// Use `token` for this session, e.g. a child of an application-wide one.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the session cooperatively when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    fn emit(&self, event: TransferEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }

    // ── Session ─────────────────────────────────────────

    /// Run every `Fetch` in `plan` into `destination_root`.
    ///
    /// Only an unwritable destination root fails the whole call.
    pub async fn execute(
        &self,
        plan: &SyncPlan,
        destination_root: &Path,
        resolver: &dyn SourceResolver,
    ) -> SyncResult<SessionReport> {
        ensure_writable_root(destination_root).await?;

        let mut report = SessionReport::default();
        let mut tasks = Vec::new();

        for action in plan.actions() {
            match action {
                SyncAction::Skip(record) => report.skipped.push(record.path.clone()),
                SyncAction::Fetch { record, reason } => {
                    debug!("Queueing {} ({:?})", record.path, reason);
                    tasks.push(TransferTask::new(
                        record.clone(),
                        resolver.resolve(record),
                        record.local_path(destination_root),
                    ));
                }
            }
        }

        let total_bytes: u64 = tasks.iter().map(TransferTask::expected_size).sum();
        self.emit(TransferEvent::SessionStarted {
            files: tasks.len() as u64,
            bytes: total_bytes,
        });
        info!(
            "Starting transfer: {} files, {} bytes, concurrency={}",
            tasks.len(),
            total_bytes,
            self.options.concurrency
        );

        let mut outcomes: Vec<(usize, String, TaskOutcome)> =
            stream::iter(tasks.into_iter().enumerate())
                .map(|(index, task)| async move {
                    let path = task.record.path.clone();
                    (index, path, self.run_task(task).await)
                })
                .buffer_unordered(self.options.concurrency.max(1))
                .collect()
                .await;
        outcomes.sort_by_key(|(index, _, _)| *index);

        for (_, path, outcome) in outcomes {
            match outcome {
                TaskOutcome::Committed => report.fetched.push(path),
                TaskOutcome::Failed { kind, detail } => {
                    report.failed.push(FailedFile { path, kind, detail })
                }
                TaskOutcome::Cancelled => report.cancelled.push(path),
            }
        }

        if !report.cancelled.is_empty() {
            report.status = SessionStatus::Cancelled;
        }
        self.emit(TransferEvent::SessionFinished {
            status: report.status,
        });

        if report.failed.is_empty() {
            info!("Transfer finished: {}", report.summary());
        } else {
            warn!("Transfer finished: {}", report.summary());
        }
        Ok(report)
    }

    // ── Task ────────────────────────────────────────────

    async fn run_task(&self, mut task: TransferTask) -> TaskOutcome {
        let max_attempts = self.options.max_attempts.max(1);

        // Remote bodies carry no mtime, so the stamp must come from the record.
        if task.record.modified.is_none() && matches!(task.source, SourceLocator::Remote(_)) {
            let kind = FailureKind::HashMismatch;
            let detail =
                "record has no modified time; a remote copy cannot be verified".to_string();
            warn!("{} skipped: {}", task.path(), detail);
            task.status = TaskStatus::Failed(kind);
            self.emit(TransferEvent::Failed {
                path: task.record.path.clone(),
                kind,
                detail: detail.clone(),
                will_retry: false,
            });
            return TaskOutcome::Failed { kind, detail };
        }

        loop {
            if self.cancel.is_cancelled() {
                return TaskOutcome::Cancelled;
            }
            task.attempts += 1;

            let (kind, detail) = match self.attempt(&mut task).await {
                Ok(()) => {
                    task.status = TaskStatus::Committed;
                    debug!("Committed {} -> {:?}", task.path(), task.destination);
                    self.emit(TransferEvent::Committed {
                        path: task.record.path.clone(),
                        size: task.expected_size(),
                    });
                    return TaskOutcome::Committed;
                }
                Err(AttemptError::Cancelled) => return TaskOutcome::Cancelled,
                Err(AttemptError::Failed { kind, detail }) => (kind, detail),
            };

            task.status = TaskStatus::Failed(kind);
            let will_retry = task.attempts < max_attempts;
            warn!(
                "{} failed (attempt {}/{}): {}: {}",
                task.path(),
                task.attempts,
                max_attempts,
                kind,
                detail
            );
            self.emit(TransferEvent::Failed {
                path: task.record.path.clone(),
                kind,
                detail: detail.clone(),
                will_retry,
            });

            if !will_retry {
                return TaskOutcome::Failed { kind, detail };
            }

            let delay = self.options.retry_backoff * 2u32.pow((task.attempts - 1).min(10));
            tokio::select! {
                _ = self.cancel.cancelled() => return TaskOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One fetch → verify → commit pass.
    async fn attempt(&self, task: &mut TransferTask) -> Result<(), AttemptError> {
        task.status = TaskStatus::Fetching;
        self.emit(TransferEvent::Started {
            path: task.record.path.clone(),
            total_bytes: task.expected_size(),
            attempt: task.attempts,
        });

        if let Some(parent) = task.destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AttemptError::failed(FailureKind::WriteError, format!("{}: {e}", parent.display()))
            })?;
        }

        let (mut source, source_mtime) = self
            .stall_guard(SourceStream::open(
                &task.source,
                &self.client,
                self.options.chunk_size,
            ))
            .await?;

        let temp = TempFile::beside(&task.destination);
        let mut file = tokio::fs::File::create(temp.path()).await.map_err(|e| {
            AttemptError::failed(FailureKind::WriteError, format!("{}: {e}", temp.path().display()))
        })?;

        let write_error = |e: std::io::Error| AttemptError::failed(FailureKind::WriteError, e);
        let mut bytes_done = 0u64;

        let expected_size = task.expected_size();
        while let Some(chunk) = self.stall_guard(source.next_chunk()).await? {
            if bytes_done + chunk.len() as u64 > expected_size {
                return Err(AttemptError::failed(
                    FailureKind::HashMismatch,
                    format!("source exceeds the expected {expected_size} bytes"),
                ));
            }
            file.write_all(&chunk).await.map_err(write_error)?;
            bytes_done += chunk.len() as u64;
            self.emit(TransferEvent::Chunk {
                path: task.record.path.clone(),
                bytes_done,
                total_bytes: expected_size,
            });
        }

        file.flush().await.map_err(write_error)?;
        file.sync_all().await.map_err(write_error)?;
        drop(file);

        if self.cancel.is_cancelled() {
            return Err(AttemptError::Cancelled);
        }

        task.status = TaskStatus::Verifying;
        self.emit(TransferEvent::Verifying {
            path: task.record.path.clone(),
        });

        let stamp = task.record.modified.or(source_mtime);
        verify_and_commit(temp, &task.destination, task.expected_fingerprint(), stamp).await
    }

    /// Race `step` against cancellation and the stall timeout.
    async fn stall_guard<T>(
        &self,
        step: impl std::future::Future<Output = Result<T, AttemptError>>,
    ) -> Result<T, AttemptError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AttemptError::Cancelled),
            result = tokio::time::timeout(self.options.stall_timeout, step) => match result {
                Ok(inner) => inner,
                Err(_) => Err(AttemptError::failed(
                    FailureKind::SourceUnavailable,
                    format!("stalled for {:?}", self.options.stall_timeout),
                )),
            },
        }
    }
}

/// Create the destination root and prove it accepts new files.
async fn ensure_writable_root(root: &Path) -> SyncResult<()> {
    let unwritable = |source| SyncError::DestinationUnwritable {
        path: root.to_path_buf(),
        source,
    };

    tokio::fs::create_dir_all(root).await.map_err(unwritable)?;

    let probe = root.join(format!(".launcher-sync-probe-{}", Uuid::new_v4().simple()));
    tokio::fs::write(&probe, b"").await.map_err(unwritable)?;
    tokio::fs::remove_file(&probe).await.map_err(unwritable)?;
    Ok(())
}
