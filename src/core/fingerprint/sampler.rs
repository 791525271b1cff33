use std::fs::{File, Metadata};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use blake2::Digest;
use filetime::FileTime;
use thiserror::Error;

use super::digest::{Blake2b256, Fingerprint};
use super::{SAMPLE_LEN, TAIL_THRESHOLD};

/// Any local I/O failure while fingerprinting. Callers treat it like a mismatch.
#[derive(Debug, Error)]
#[error("cannot read {path:?}: {source}")]
pub struct ReadError {
    pub path: PathBuf,
    pub source: io::Error,
}

/// Fingerprint a file on disk.
pub fn fingerprint(path: &Path) -> Result<Fingerprint, ReadError> {
    let read_error = |source| ReadError {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(read_error)?;
    let metadata = file.metadata().map_err(read_error)?;
    let mtime = mtime_seconds(&metadata).map_err(read_error)?;

    fingerprint_reader(&mut file, metadata.len(), mtime).map_err(read_error)
}

/// [`fingerprint`] on the blocking pool.
pub async fn fingerprint_async(path: PathBuf) -> Result<Fingerprint, ReadError> {
    let fallback = path.clone();
    tokio::task::spawn_blocking(move || fingerprint(&path))
        .await
        .unwrap_or_else(|join_error| {
            Err(ReadError {
                path: fallback,
                source: io::Error::other(join_error),
            })
        })
}

/// Core sampling routine over any seekable reader.
///
/// Hashes the first [`SAMPLE_LEN`] bytes, the last [`SAMPLE_LEN`] bytes when
/// `size` exceeds [`TAIL_THRESHOLD`], then the decimal size and mtime.
pub fn fingerprint_reader<R: Read + Seek>(
    reader: &mut R,
    size: u64,
    mtime: f64,
) -> io::Result<Fingerprint> {
    let mut hasher = Blake2b256::new();
    let mut sample = Vec::with_capacity(SAMPLE_LEN);

    (&mut *reader)
        .take(SAMPLE_LEN as u64)
        .read_to_end(&mut sample)?;
    hasher.update(&sample);

    if size > TAIL_THRESHOLD {
        sample.clear();
        reader.seek(SeekFrom::Start(size - SAMPLE_LEN as u64))?;
        reader.read_to_end(&mut sample)?;
        hasher.update(&sample);
    }

    hasher.update(size.to_string().as_bytes());
    hasher.update(format_mtime(mtime).as_bytes());

    Ok(Fingerprint::from_hasher(hasher))
}

/// Modification time as float seconds, composed as `secs + nanos * 1e-9`.
pub fn mtime_seconds(metadata: &Metadata) -> io::Result<f64> {
    let modified = metadata.modified()?;
    Ok(system_time_seconds(modified))
}

fn system_time_seconds(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as f64 + f64::from(d.subsec_nanos()) * 1e-9,
        Err(before_epoch) => {
            let d = before_epoch.duration();
            -(d.as_secs() as f64 + f64::from(d.subsec_nanos()) * 1e-9)
        }
    }
}

/// Shortest round-trip decimal, always with a fractional part (`1700000000.0`).
pub fn format_mtime(mtime: f64) -> String {
    let mut rendered = mtime.to_string();
    if mtime.is_finite() && !rendered.contains('.') {
        rendered.push_str(".0");
    }
    rendered
}

/// Inverse of [`mtime_seconds`]: the file time whose float rendering is `mtime`.
pub fn filetime_from_mtime(mtime: f64) -> FileTime {
    let mut secs = mtime.floor();
    let mut nanos = ((mtime - secs) * 1e9).round();
    if nanos >= 1e9 {
        secs += 1.0;
        nanos = 0.0;
    }
    FileTime::from_unix_time(secs as i64, nanos as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Counts bytes handed out by the inner reader.
    struct CountingReader<R> {
        inner: R,
        bytes_read: u64,
    }

    impl<R: Read> Read for CountingReader<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.bytes_read += n as u64;
            Ok(n)
        }
    }

    impl<R: Seek> Seek for CountingReader<R> {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    fn counted(size: usize) -> CountingReader<Cursor<Vec<u8>>> {
        let data = (0..size).map(|i| (i % 251) as u8).collect();
        CountingReader {
            inner: Cursor::new(data),
            bytes_read: 0,
        }
    }

    #[test]
    fn matches_reference_digest() {
        let mut reader = Cursor::new(b"hello".to_vec());
        let fp = fingerprint_reader(&mut reader, 5, 1_700_000_000.25).unwrap();
        assert_eq!(
            fp.to_hex(),
            "b4d0dd411858909854563af438c3c61236934a1b33da42ffb8c111bade1a0add"
        );

        let mut reader = Cursor::new(b"hello".to_vec());
        let fp = fingerprint_reader(&mut reader, 5, 1_700_000_000.0).unwrap();
        assert_eq!(
            fp.to_hex(),
            "7db0c4e5f611af6d4d93fa82e703ee4a6a8548558ea4ea91d85a54a4faac1d3b"
        );
    }

    #[test]
    fn small_file_is_read_whole_once() {
        let mut reader = counted(40_000);
        fingerprint_reader(&mut reader, 40_000, 0.0).unwrap();
        assert_eq!(reader.bytes_read, 40_000);
    }

    #[test]
    fn mid_sized_file_reads_only_the_head() {
        let mut reader = counted(100_000);
        fingerprint_reader(&mut reader, 100_000, 0.0).unwrap();
        assert_eq!(reader.bytes_read, SAMPLE_LEN as u64);
    }

    #[test]
    fn large_file_reads_head_and_tail_only() {
        let size = 4 * 1024 * 1024;
        let mut reader = counted(size);
        fingerprint_reader(&mut reader, size as u64, 0.0).unwrap();
        assert_eq!(reader.bytes_read, 2 * SAMPLE_LEN as u64);
    }

    #[test]
    fn middle_of_large_file_is_not_sampled() {
        let size = 1024 * 1024;
        let original: Vec<u8> = vec![7u8; size];
        let mut mutated = original.clone();
        mutated[size / 2] = 8;

        let a = fingerprint_reader(&mut Cursor::new(original), size as u64, 1.5).unwrap();
        let b = fingerprint_reader(&mut Cursor::new(mutated.clone()), size as u64, 1.5).unwrap();
        assert_eq!(a, b);

        mutated[size - 1] = 9;
        let c = fingerprint_reader(&mut Cursor::new(mutated), size as u64, 1.5).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn mtime_rendering_keeps_a_fraction() {
        assert_eq!(format_mtime(1_700_000_000.0), "1700000000.0");
        assert_eq!(format_mtime(1_700_000_000.25), "1700000000.25");
        assert_eq!(
            format_mtime(1_700_000_000.0 + 123_456_789.0 * 1e-9),
            "1700000000.1234567"
        );
    }

    #[test]
    fn filetime_round_trips_through_float_seconds() {
        let mtime = 1_700_000_000.0 + 123_456_789.0 * 1e-9;
        let ft = filetime_from_mtime(mtime);
        let back = ft.unix_seconds() as f64 + f64::from(ft.nanoseconds()) * 1e-9;
        assert_eq!(back, mtime);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = fingerprint(&dir.path().join("absent.bin")).unwrap_err();
        assert_eq!(err.source.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn on_disk_fingerprint_tracks_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"payload").unwrap();

        filetime::set_file_mtime(&path, filetime_from_mtime(1_600_000_000.5)).unwrap();
        let first = fingerprint(&path).unwrap();
        assert_eq!(fingerprint(&path).unwrap(), first);

        filetime::set_file_mtime(&path, filetime_from_mtime(1_600_000_001.5)).unwrap();
        assert_ne!(fingerprint(&path).unwrap(), first);
    }

    #[tokio::test]
    async fn async_wrapper_matches_blocking_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![3u8; 200_000]).unwrap();

        let blocking = fingerprint(&path).unwrap();
        assert_eq!(fingerprint_async(path).await.unwrap(), blocking);
        assert!(fingerprint_async(dir.path().join("absent.bin")).await.is_err());
    }
}
