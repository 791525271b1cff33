use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the sync engine.
/// Only session-fatal conditions travel as `SyncError`; per-file failures
/// are reported as [`FailureKind`](crate::core::transfer::FailureKind).
#[derive(Debug, Error)]
pub enum SyncError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Destination root {path:?} is not writable: {source}")]
    DestinationUnwritable {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid source URL: {0}")]
    InvalidSourceUrl(String),

    // ── Manifest ────────────────────────────────────────
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Config ──────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Manifest failures are fatal to the session: no partial manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Malformed manifest: {0}")]
    Malformed(String),

    #[error("Manifest aggregate mismatch: declared {declared}, computed {computed}")]
    AggregateMismatch { declared: String, computed: String },
}

/// Convenience alias used throughout the crate.
pub type SyncResult<T> = Result<T, SyncError>;

impl From<std::io::Error> for SyncError {
    fn from(source: std::io::Error) -> Self {
        SyncError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| SyncError::Io { path, source }
    }
}
