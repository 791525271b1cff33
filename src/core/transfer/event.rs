use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;

use super::orchestrator::SessionStatus;

/// Why a single file transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Local I/O failure reading the source or the fetched file.
    ReadError,
    /// Fetched bytes did not fingerprint to the manifest value.
    HashMismatch,
    /// Source missing, unreachable, non-success status, or stalled.
    SourceUnavailable,
    /// Destination directory, temporary file or final rename failed.
    WriteError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::ReadError => "read error",
            FailureKind::HashMismatch => "hash mismatch",
            FailureKind::SourceUnavailable => "source unavailable",
            FailureKind::WriteError => "write error",
        };
        f.write_str(label)
    }
}

/// Lifecycle of one transfer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Fetching,
    Verifying,
    Committed,
    Failed(FailureKind),
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Committed | TaskStatus::Failed(_))
    }
}

/// Emitted by the orchestrator; completion events may arrive out of plan order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransferEvent {
    SessionStarted {
        files: u64,
        bytes: u64,
    },
    Started {
        path: String,
        total_bytes: u64,
        attempt: u32,
    },
    Chunk {
        path: String,
        bytes_done: u64,
        total_bytes: u64,
    },
    Verifying {
        path: String,
    },
    Committed {
        path: String,
        size: u64,
    },
    Failed {
        path: String,
        kind: FailureKind,
        detail: String,
        will_retry: bool,
    },
    SessionFinished {
        status: SessionStatus,
    },
}

impl TransferEvent {
    pub fn path(&self) -> Option<&str> {
        match self {
            TransferEvent::Started { path, .. }
            | TransferEvent::Chunk { path, .. }
            | TransferEvent::Verifying { path }
            | TransferEvent::Committed { path, .. }
            | TransferEvent::Failed { path, .. } => Some(path),
            TransferEvent::SessionStarted { .. } | TransferEvent::SessionFinished { .. } => None,
        }
    }
}

/// Receives orchestrator events synchronously, in emission order per task.
pub trait TransferObserver: Send + Sync {
    fn on_event(&self, event: &TransferEvent);
}

impl TransferObserver for mpsc::UnboundedSender<TransferEvent> {
    fn on_event(&self, event: &TransferEvent) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.send(event.clone());
    }
}
