// ─── Manifest Model ───
// The declared set of files a correct installation must contain.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use blake2::Digest;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::error::{ManifestError, SyncError, SyncResult};
use crate::core::fingerprint::Fingerprint;

/// One manifest entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    /// Relative, `/`-separated path.
    pub path: String,
    pub size: u64,
    pub fingerprint: Fingerprint,
    /// Source-side mtime in float seconds. Informational; never compared.
    pub modified: Option<f64>,
}

impl FileRecord {
    /// Destination path of this record under `root`.
    pub fn local_path(&self, root: &Path) -> PathBuf {
        self.path
            .split('/')
            .fold(root.to_path_buf(), |acc, segment| acc.join(segment))
    }
}

/// Declared `statistics` block, as written by the scanner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestStatistics {
    #[serde(default)]
    pub total_files: u64,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub overall_hash: String,
    #[serde(default)]
    pub scan_duration: f64,
}

/// What to do when the declared `overall_hash` disagrees with the records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatePolicy {
    Ignore,
    #[default]
    Warn,
    Reject,
}

/// Wire shape of a manifest entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFileRecord {
    pub path: String,
    pub size: u64,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<f64>,
}

/// Wire shape of the whole manifest document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDocument {
    pub files: Vec<RawFileRecord>,
    #[serde(default)]
    pub statistics: Option<ManifestStatistics>,
}

/// Validated, immutable manifest for one sync session.
#[derive(Debug, Clone)]
pub struct Manifest {
    records: Vec<FileRecord>,
    aggregate: Option<Fingerprint>,
    total_size: u64,
    declared: Option<ManifestStatistics>,
}

impl Manifest {
    /// Parse and validate a manifest document.
    pub fn parse(bytes: &[u8]) -> Result<Self, ManifestError> {
        let document: ManifestDocument = serde_json::from_slice(bytes)
            .map_err(|e| ManifestError::Malformed(e.to_string()))?;
        Self::from_document(document)
    }

    /// Parse, then apply the aggregate integrity policy.
    pub fn parse_with_policy(bytes: &[u8], policy: AggregatePolicy) -> Result<Self, ManifestError> {
        let manifest = Self::parse(bytes)?;
        manifest.check_aggregate(policy)?;
        Ok(manifest)
    }

    /// Read a manifest file from disk.
    pub async fn load(path: &Path, policy: AggregatePolicy) -> SyncResult<Self> {
        let bytes = tokio::fs::read(path).await.map_err(SyncError::io(path))?;
        let manifest = Self::parse_with_policy(&bytes, policy)?;
        debug!(
            "Loaded manifest {:?}: {} files, {} bytes",
            path,
            manifest.file_count(),
            manifest.total_size()
        );
        Ok(manifest)
    }

    pub fn from_document(document: ManifestDocument) -> Result<Self, ManifestError> {
        let mut seen = HashSet::with_capacity(document.files.len());
        let mut records = Vec::with_capacity(document.files.len());
        let mut aggregate = AggregateHasher::default();
        let mut total_size = 0u64;

        for (index, raw) in document.files.into_iter().enumerate() {
            let malformed = |reason: String| {
                ManifestError::Malformed(format!("files[{index}] ({:?}): {reason}", raw.path))
            };

            let path = normalize_path(&raw.path).map_err(malformed)?;
            let fingerprint: Fingerprint = raw.hash.parse().map_err(malformed)?;

            if !seen.insert(path.clone()) {
                return Err(malformed("duplicate path".into()));
            }

            aggregate.push(&raw.hash, &raw.path);
            total_size = total_size.saturating_add(raw.size);
            records.push(FileRecord {
                path,
                size: raw.size,
                fingerprint,
                modified: raw.modified,
            });
        }

        Ok(Self {
            aggregate: aggregate.finish(),
            records,
            total_size,
            declared: document.statistics,
        })
    }

    /// Compare the declared `overall_hash` against the recomputed aggregate.
    pub fn check_aggregate(&self, policy: AggregatePolicy) -> Result<(), ManifestError> {
        if policy == AggregatePolicy::Ignore {
            return Ok(());
        }
        let Some(declared) = self.declared_overall_hash() else {
            return Ok(());
        };
        let computed = self
            .aggregate
            .map(|fp| fp.to_hex())
            .unwrap_or_default();
        if declared.eq_ignore_ascii_case(&computed) {
            return Ok(());
        }

        match policy {
            AggregatePolicy::Reject => Err(ManifestError::AggregateMismatch {
                declared: declared.to_string(),
                computed,
            }),
            _ => {
                warn!(
                    "Manifest overall_hash {} does not match records ({})",
                    declared, computed
                );
                Ok(())
            }
        }
    }

    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.records.iter().find(|r| r.path == path)
    }

    pub fn file_count(&self) -> usize {
        self.records.len()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Digest over every record's hash and declared path, in manifest order.
    pub fn aggregate_fingerprint(&self) -> Option<Fingerprint> {
        self.aggregate
    }

    pub fn declared_statistics(&self) -> Option<&ManifestStatistics> {
        self.declared.as_ref()
    }

    fn declared_overall_hash(&self) -> Option<&str> {
        self.declared
            .as_ref()
            .map(|s| s.overall_hash.as_str())
            .filter(|h| !h.is_empty())
    }
}

/// Running aggregate: `hash` then `path` for each record.
#[derive(Default)]
pub(crate) struct AggregateHasher {
    hasher: crate::core::fingerprint::Blake2b256,
    entries: usize,
}

impl AggregateHasher {
    pub(crate) fn push(&mut self, hash: &str, path: &str) {
        self.hasher.update(hash.as_bytes());
        self.hasher.update(path.as_bytes());
        self.entries += 1;
    }

    pub(crate) fn finish(self) -> Option<Fingerprint> {
        (self.entries > 0).then(|| Fingerprint::from_hasher(self.hasher))
    }
}

/// Slash-normalize a declared path and refuse anything that escapes the root.
fn normalize_path(raw: &str) -> Result<String, String> {
    if raw.is_empty() {
        return Err("empty path".into());
    }
    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') || unified.contains(':') {
        return Err("path must be relative".into());
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." | ".." => return Err(format!("invalid path segment {segment:?}")),
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH_A: &str = "0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8";
    const HASH_B: &str = "b4d0dd411858909854563af438c3c61236934a1b33da42ffb8c111bade1a0add";

    fn doc(files: &str, statistics: &str) -> Vec<u8> {
        format!(r#"{{"files": [{files}], "statistics": {statistics}}}"#).into_bytes()
    }

    #[test]
    fn parses_records_in_order() {
        let json = doc(
            &format!(
                r#"{{"path": "data\\maps\\a.pak", "size": 10, "hash": "{HASH_A}", "modified": 1700000000.5}},
                   {{"path": "game.exe", "size": 32, "hash": "{HASH_B}", "modified": 1.0}}"#
            ),
            r#"{"total_files": 2, "total_size": 42, "overall_hash": "", "scan_duration": 0.1}"#,
        );
        let manifest = Manifest::parse(&json).unwrap();

        assert_eq!(manifest.file_count(), 2);
        assert_eq!(manifest.total_size(), 42);
        assert_eq!(manifest.records()[0].path, "data/maps/a.pak");
        assert_eq!(manifest.records()[0].modified, Some(1_700_000_000.5));
        assert_eq!(manifest.records()[1].path, "game.exe");
        assert!(manifest.get("game.exe").is_some());
        assert!(manifest.aggregate_fingerprint().is_some());
    }

    #[test]
    fn missing_files_key_is_malformed() {
        let err = Manifest::parse(br#"{"statistics": {}}"#).unwrap_err();
        assert!(matches!(err, ManifestError::Malformed(_)));
    }

    #[test]
    fn files_must_be_a_sequence() {
        let err = Manifest::parse(br#"{"files": {"a": 1}}"#).unwrap_err();
        assert!(matches!(err, ManifestError::Malformed(_)));
    }

    #[test]
    fn rejects_bad_records() {
        let cases = [
            format!(r#"{{"path": "", "size": 1, "hash": "{HASH_A}"}}"#),
            format!(r#"{{"path": "a", "size": -1, "hash": "{HASH_A}"}}"#),
            r#"{"path": "a", "size": 1, "hash": "abc123"}"#.to_string(),
            format!(r#"{{"path": "../escape", "size": 1, "hash": "{HASH_A}"}}"#),
            format!(r#"{{"path": "/etc/passwd", "size": 1, "hash": "{HASH_A}"}}"#),
            format!(r#"{{"path": "C:\\Windows\\x", "size": 1, "hash": "{HASH_A}"}}"#),
        ];
        for case in cases {
            let err = Manifest::parse(&doc(&case, "null")).unwrap_err();
            assert!(matches!(err, ManifestError::Malformed(_)), "{case}");
        }
    }

    #[test]
    fn duplicate_paths_are_malformed() {
        let files = format!(
            r#"{{"path": "a/b", "size": 1, "hash": "{HASH_A}"}},
               {{"path": "a\\b", "size": 1, "hash": "{HASH_B}"}}"#
        );
        let err = Manifest::parse(&doc(&files, "null")).unwrap_err();
        assert!(matches!(err, ManifestError::Malformed(_)));
    }

    #[test]
    fn empty_manifest_has_no_aggregate() {
        let manifest = Manifest::parse(br#"{"files": []}"#).unwrap();
        assert_eq!(manifest.file_count(), 0);
        assert!(manifest.aggregate_fingerprint().is_none());
    }

    #[test]
    fn aggregate_covers_hash_then_path() {
        let files = format!(r#"{{"path": "a.txt", "size": 1, "hash": "{HASH_A}"}}"#);
        let manifest = Manifest::parse(&doc(&files, "null")).unwrap();
        let expected = Fingerprint::of_bytes(format!("{HASH_A}a.txt").as_bytes());
        assert_eq!(manifest.aggregate_fingerprint(), Some(expected));
    }

    #[test]
    fn aggregate_policy_controls_mismatch() {
        let files = format!(r#"{{"path": "a.txt", "size": 1, "hash": "{HASH_A}"}}"#);
        let json = doc(&files, &format!(r#"{{"overall_hash": "{HASH_B}"}}"#));

        assert!(Manifest::parse_with_policy(&json, AggregatePolicy::Ignore).is_ok());
        assert!(Manifest::parse_with_policy(&json, AggregatePolicy::Warn).is_ok());
        let err = Manifest::parse_with_policy(&json, AggregatePolicy::Reject).unwrap_err();
        assert!(matches!(err, ManifestError::AggregateMismatch { .. }));
    }

    #[test]
    fn local_path_joins_segments() {
        let record = FileRecord {
            path: "data/maps/a.pak".into(),
            size: 0,
            fingerprint: HASH_A.parse().unwrap(),
            modified: None,
        };
        let root = Path::new("/games/rgc");
        assert_eq!(
            record.local_path(root),
            root.join("data").join("maps").join("a.pak")
        );
    }
}
