// ─── Manifest Report ───
// Publisher-side scan: walks a reference installation and writes the
// manifest document the sync engine consumes.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::model::{AggregateHasher, ManifestDocument, ManifestStatistics, RawFileRecord};
use crate::core::error::{SyncError, SyncResult};
use crate::core::fingerprint::{fingerprint, mtime_seconds};

const PROGRESS_EVERY: usize = 100;

/// Fingerprint every file under `root` into a manifest document.
///
/// Files are visited in sorted order so repeated scans of the same tree
/// produce the same document. Unreadable files are logged and left out.
pub fn scan_directory(root: &Path) -> SyncResult<ManifestDocument> {
    let started = Instant::now();

    if !root.is_dir() {
        return Err(SyncError::Other(format!("{root:?} is not a directory")));
    }

    let mut files = Vec::new();
    let mut aggregate = AggregateHasher::default();
    let mut total_size = 0u64;

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {:?}: {}", root, e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let Some(relative) = relative_slash_path(root, entry.path()) else {
            warn!("Skipping non UTF-8 path {:?}", entry.path());
            continue;
        };

        let (size, modified) = match entry.metadata() {
            Ok(meta) => match mtime_seconds(&meta) {
                Ok(mtime) => (meta.len(), mtime),
                Err(e) => {
                    warn!("Cannot stat {:?}: {}", entry.path(), e);
                    continue;
                }
            },
            Err(e) => {
                warn!("Cannot stat {:?}: {}", entry.path(), e);
                continue;
            }
        };

        let hash = match fingerprint(entry.path()) {
            Ok(fp) => fp.to_hex(),
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };

        aggregate.push(&hash, &relative);
        total_size += size;
        files.push(RawFileRecord {
            path: relative,
            size,
            hash,
            modified: Some(modified),
        });

        if files.len() % PROGRESS_EVERY == 0 {
            debug!("Scanned {} files", files.len());
        }
    }

    let elapsed = started.elapsed().as_secs_f64();
    let statistics = ManifestStatistics {
        total_files: files.len() as u64,
        total_size,
        overall_hash: aggregate.finish().map(|fp| fp.to_hex()).unwrap_or_default(),
        scan_duration: (elapsed * 100.0).round() / 100.0,
    };

    info!(
        "Scanned {:?}: {} files, {:.2} MB, overall hash {}",
        root,
        statistics.total_files,
        total_size as f64 / 1024.0 / 1024.0,
        statistics.overall_hash
    );

    Ok(ManifestDocument {
        files,
        statistics: Some(statistics),
    })
}

impl ManifestDocument {
    /// Write the document as pretty JSON.
    pub async fn write_to(&self, path: &Path) -> SyncResult<()> {
        let json = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(SyncError::io(parent))?;
        }

        tokio::fs::write(path, json)
            .await
            .map_err(SyncError::io(path))?;
        Ok(())
    }
}

fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::{AggregatePolicy, Manifest};

    #[test]
    fn scan_produces_a_self_consistent_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("data/maps")).unwrap();
        std::fs::write(dir.path().join("game.exe"), b"binary").unwrap();
        std::fs::write(dir.path().join("data/maps/a.pak"), vec![1u8; 200_000]).unwrap();

        let document = scan_directory(dir.path()).unwrap();
        let paths: Vec<_> = document.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["data/maps/a.pak", "game.exe"]);

        let stats = document.statistics.clone().unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_size, 200_006);

        let bytes = serde_json::to_vec(&document).unwrap();
        let manifest = Manifest::parse_with_policy(&bytes, AggregatePolicy::Reject).unwrap();
        assert_eq!(
            manifest.aggregate_fingerprint().unwrap().to_hex(),
            stats.overall_hash
        );
    }

    #[test]
    fn scanned_hashes_match_the_fingerprint_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin");
        std::fs::write(&path, b"content").unwrap();

        let document = scan_directory(dir.path()).unwrap();
        assert_eq!(document.files[0].hash, fingerprint(&path).unwrap().to_hex());
    }

    #[test]
    fn empty_tree_has_empty_overall_hash() {
        let dir = tempfile::tempdir().unwrap();
        let document = scan_directory(dir.path()).unwrap();
        assert!(document.files.is_empty());
        assert_eq!(document.statistics.unwrap().overall_hash, "");
    }

    #[test]
    fn scanning_a_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, b"x").unwrap();
        assert!(scan_directory(&path).is_err());
    }

    #[tokio::test]
    async fn written_report_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        let document = scan_directory(dir.path()).unwrap();

        let out = dir.path().join("out").join("report.json");
        document.write_to(&out).await.unwrap();

        let manifest = Manifest::load(&out, AggregatePolicy::Reject).await.unwrap();
        assert_eq!(manifest.file_count(), 1);
        assert_eq!(manifest.records()[0].path, "a.txt");
    }
}
