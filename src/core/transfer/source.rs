use std::fmt;
use std::path::PathBuf;

use reqwest::Url;

use crate::core::error::{SyncError, SyncResult};
use crate::core::manifest::FileRecord;

/// Where the bytes for one record come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    Local(PathBuf),
    Remote(Url),
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::Local(path) => write!(f, "{}", path.display()),
            SourceLocator::Remote(url) => write!(f, "{url}"),
        }
    }
}

/// Maps a manifest record to its source. Supplied by the configuration layer.
pub trait SourceResolver: Send + Sync {
    fn resolve(&self, record: &FileRecord) -> SourceLocator;
}

/// A local directory laid out like the destination (test/dev mirror).
#[derive(Debug, Clone)]
pub struct LocalMirror {
    root: PathBuf,
}

impl LocalMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceResolver for LocalMirror {
    fn resolve(&self, record: &FileRecord) -> SourceLocator {
        SourceLocator::Local(record.local_path(&self.root))
    }
}

/// A remote base URL; each record path becomes percent-encoded URL segments.
#[derive(Debug, Clone)]
pub struct RemoteMirror {
    base: Url,
}

impl RemoteMirror {
    pub fn new(base_url: &str) -> SyncResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| SyncError::InvalidSourceUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(SyncError::InvalidSourceUrl(format!(
                "{base_url}: expected an http(s) base URL"
            )));
        }
        Ok(Self { base })
    }

    pub fn url_for(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(path.split('/'));
        }
        url
    }
}

impl SourceResolver for RemoteMirror {
    fn resolve(&self, record: &FileRecord) -> SourceLocator {
        SourceLocator::Remote(self.url_for(&record.path))
    }
}
