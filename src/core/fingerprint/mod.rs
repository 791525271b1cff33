// ─── Fingerprint Engine ───
// Cheap change detection: sampled head/tail content plus size and mtime,
// digested with BLAKE2b-256. Bit-compatible with manifests produced by the
// existing directory scanner, so the sampling layout must not change.

mod digest;
mod sampler;

pub(crate) use digest::Blake2b256;
pub use digest::{Fingerprint, FINGERPRINT_HEX_LEN};
pub use sampler::{
    filetime_from_mtime, fingerprint, fingerprint_async, fingerprint_reader, format_mtime,
    mtime_seconds, ReadError,
};

/// Bytes hashed from the head (and, for large files, the tail) of a file.
pub const SAMPLE_LEN: usize = 64 * 1024;

/// Files strictly larger than this also contribute their last [`SAMPLE_LEN`] bytes.
pub const TAIL_THRESHOLD: u64 = 2 * SAMPLE_LEN as u64;
