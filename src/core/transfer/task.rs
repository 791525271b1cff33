use std::path::{Path, PathBuf};
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use super::event::{FailureKind, TaskStatus};
use super::source::SourceLocator;
use crate::core::fingerprint::{filetime_from_mtime, fingerprint, mtime_seconds, Fingerprint};
use crate::core::manifest::FileRecord;

/// One file's fetch, verify and commit lifecycle.
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub record: FileRecord,
    pub source: SourceLocator,
    pub destination: PathBuf,
    pub status: TaskStatus,
    pub attempts: u32,
}

impl TransferTask {
    pub fn new(record: FileRecord, source: SourceLocator, destination: PathBuf) -> Self {
        Self {
            record,
            source,
            destination,
            status: TaskStatus::Pending,
            attempts: 0,
        }
    }

    pub fn path(&self) -> &str {
        &self.record.path
    }

    pub fn expected_fingerprint(&self) -> Fingerprint {
        self.record.fingerprint
    }

    pub fn expected_size(&self) -> u64 {
        self.record.size
    }
}

/// Why one attempt stopped short of a commit.
#[derive(Debug)]
pub(crate) enum AttemptError {
    Failed { kind: FailureKind, detail: String },
    Cancelled,
}

impl AttemptError {
    pub(crate) fn failed(kind: FailureKind, detail: impl ToString) -> Self {
        AttemptError::Failed {
            kind,
            detail: detail.to_string(),
        }
    }
}

// ── Temporary file ──────────────────────────────────────

/// Sibling `.part` file; removed on drop unless committed.
///
/// Living in the destination directory keeps the final rename on one filesystem.
pub(crate) struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl TempFile {
    pub(crate) fn beside(destination: &Path) -> Self {
        let name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_name = format!(".{}.{}.part", name, Uuid::new_v4().simple());
        let path = match destination.parent() {
            Some(parent) => parent.join(temp_name),
            None => PathBuf::from(temp_name),
        };
        Self { path, armed: true }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically move into place, replacing any previous file.
    async fn commit(mut self, destination: &Path) -> std::io::Result<()> {
        tokio::fs::rename(&self.path, destination).await?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

// ── Source stream ───────────────────────────────────────

type RemoteBody = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Chunked byte source over a local file or an HTTP response body.
pub(crate) enum SourceStream {
    Local {
        file: tokio::fs::File,
        buffer: Vec<u8>,
    },
    Remote(RemoteBody),
}

impl SourceStream {
    /// Opens the source. Local sources also report their mtime.
    pub(crate) async fn open(
        locator: &SourceLocator,
        client: &Client,
        chunk_size: usize,
    ) -> Result<(Self, Option<f64>), AttemptError> {
        match locator {
            SourceLocator::Local(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    let kind = if e.kind() == std::io::ErrorKind::NotFound {
                        FailureKind::SourceUnavailable
                    } else {
                        FailureKind::ReadError
                    };
                    AttemptError::failed(kind, format!("{}: {e}", path.display()))
                })?;
                let mtime = file
                    .metadata()
                    .await
                    .ok()
                    .and_then(|meta| mtime_seconds(&meta).ok());
                let stream = SourceStream::Local {
                    file,
                    buffer: vec![0u8; chunk_size.max(1)],
                };
                Ok((stream, mtime))
            }
            SourceLocator::Remote(url) => {
                let response = client.get(url.clone()).send().await.map_err(|e| {
                    AttemptError::failed(FailureKind::SourceUnavailable, format!("{url}: {e}"))
                })?;

                let status = response.status();
                if !status.is_success() {
                    return Err(AttemptError::failed(
                        FailureKind::SourceUnavailable,
                        format!("{url}: HTTP {}", status.as_u16()),
                    ));
                }

                Ok((SourceStream::Remote(Box::pin(response.bytes_stream())), None))
            }
        }
    }

    /// Next chunk, or `None` at end of stream.
    pub(crate) async fn next_chunk(&mut self) -> Result<Option<Bytes>, AttemptError> {
        match self {
            SourceStream::Local { file, buffer } => {
                let n = file
                    .read(buffer)
                    .await
                    .map_err(|e| AttemptError::failed(FailureKind::ReadError, e))?;
                Ok((n > 0).then(|| Bytes::copy_from_slice(&buffer[..n])))
            }
            SourceStream::Remote(body) => match body.next().await {
                None => Ok(None),
                Some(Ok(chunk)) => Ok(Some(chunk)),
                Some(Err(e)) => Err(AttemptError::failed(FailureKind::SourceUnavailable, e)),
            },
        }
    }
}

// ── Verify + commit ─────────────────────────────────────

/// Fingerprint the finished temporary file and rename it into place.
///
/// `stamp` is applied as the temporary file's mtime first, since the
/// fingerprint covers mtime. Nothing reaches `destination` unless the
/// fingerprint matches; on any error the temporary file is removed.
pub(crate) async fn verify_and_commit(
    temp: TempFile,
    destination: &Path,
    expected: Fingerprint,
    stamp: Option<f64>,
) -> Result<(), AttemptError> {
    let temp_path = temp.path().to_path_buf();

    let verified = tokio::task::spawn_blocking(move || -> Result<Fingerprint, AttemptError> {
        if let Some(mtime) = stamp {
            filetime::set_file_mtime(&temp_path, filetime_from_mtime(mtime))
                .map_err(|e| AttemptError::failed(FailureKind::WriteError, e))?;
        }
        fingerprint(&temp_path).map_err(|e| AttemptError::failed(FailureKind::ReadError, e))
    })
    .await
    .map_err(|e| AttemptError::failed(FailureKind::ReadError, e))?;

    let actual = verified?;
    if actual != expected {
        return Err(AttemptError::failed(
            FailureKind::HashMismatch,
            format!("expected {expected}, got {actual}"),
        ));
    }

    temp.commit(destination).await.map_err(|e| {
        AttemptError::failed(
            FailureKind::WriteError,
            format!("rename into {}: {e}", destination.display()),
        )
    })
}
