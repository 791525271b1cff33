use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::core::error::{SyncError, SyncResult};
use crate::core::manifest::AggregatePolicy;
use crate::core::transfer::{LocalMirror, RemoteMirror, SourceResolver, TransferOptions};

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// `[game]` section of the launcher config. Unknown keys are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct GameSection {
    /// Manifest JSON describing the reference tree.
    pub files_manifest: PathBuf,
    #[serde(default)]
    pub base_url: String,
    pub test_source_folder: PathBuf,
    /// Destination root for installed files.
    pub test_download_folder: PathBuf,
    /// Read sources from `test_source_folder` instead of `base_url`.
    #[serde(default = "default_test_mode")]
    pub test_mode: bool,
}

fn default_test_mode() -> bool {
    true
}

/// Optional `[sync]` section; every key falls back to the engine default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub chunk_size: usize,
    pub stall_timeout_secs: u64,
    pub aggregate_policy: AggregatePolicy,
}

impl Default for SyncSection {
    fn default() -> Self {
        let options = TransferOptions::default();
        Self {
            concurrency: options.concurrency,
            max_attempts: options.max_attempts,
            retry_backoff_ms: options.retry_backoff.as_millis() as u64,
            chunk_size: options.chunk_size,
            stall_timeout_secs: options.stall_timeout.as_secs(),
            aggregate_policy: AggregatePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    game: GameSection,
    #[serde(default)]
    sync: SyncSection,
}

/// Validated sync settings with paths resolved against the config file's directory.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub game: GameSection,
    pub sync: SyncSection,
}

impl SyncSettings {
    pub fn load(path: &Path) -> SyncResult<Self> {
        let text = std::fs::read_to_string(path).map_err(SyncError::io(path))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        let settings = Self::from_toml(&text, base_dir)?;
        debug!("Loaded sync settings from {:?}", path);
        Ok(settings)
    }

    /// Parse and validate; relative paths are joined onto `base_dir`.
    pub fn from_toml(text: &str, base_dir: &Path) -> SyncResult<Self> {
        let ConfigFile { mut game, sync } = toml::from_str(text)?;

        game.files_manifest = base_dir.join(&game.files_manifest);
        game.test_source_folder = base_dir.join(&game.test_source_folder);
        game.test_download_folder = base_dir.join(&game.test_download_folder);

        let settings = Self { game, sync };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> SyncResult<()> {
        if self.sync.concurrency == 0 {
            return Err(SyncError::Config("sync.concurrency must be at least 1".into()));
        }
        if self.sync.max_attempts == 0 {
            return Err(SyncError::Config("sync.max_attempts must be at least 1".into()));
        }
        if self.sync.chunk_size == 0 {
            return Err(SyncError::Config("sync.chunk_size must be at least 1".into()));
        }
        if !self.game.test_mode {
            RemoteMirror::new(&self.game.base_url)?;
        }
        Ok(())
    }

    /// Command-line override of `sync.concurrency`.
    pub fn override_concurrency(&mut self, concurrency: usize) -> SyncResult<()> {
        self.sync.concurrency = concurrency;
        self.validate()
    }

    pub fn manifest_path(&self) -> &Path {
        &self.game.files_manifest
    }

    pub fn destination_root(&self) -> &Path {
        &self.game.test_download_folder
    }

    pub fn aggregate_policy(&self) -> AggregatePolicy {
        self.sync.aggregate_policy
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            concurrency: self.sync.concurrency,
            max_attempts: self.sync.max_attempts,
            retry_backoff: Duration::from_millis(self.sync.retry_backoff_ms),
            chunk_size: self.sync.chunk_size,
            stall_timeout: Duration::from_secs(self.sync.stall_timeout_secs),
        }
    }

    /// Local mirror in test mode, the remote base URL otherwise.
    pub fn resolver(&self) -> SyncResult<Arc<dyn SourceResolver>> {
        if self.game.test_mode {
            Ok(Arc::new(LocalMirror::new(&self.game.test_source_folder)))
        } else {
            Ok(Arc::new(RemoteMirror::new(&self.game.base_url)?))
        }
    }
}
