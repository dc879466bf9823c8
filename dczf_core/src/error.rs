//! Error types for DCZF operations.
//!
//! Every failure surfaces as a [`DczfError`] variant; nothing is retried
//! internally. Codec-level failures are collected in [`HuffmanError`] and
//! folded into `Corrupt` by the pipelines, which know the chunk index.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for DCZF operations.
pub type Result<T> = std::result::Result<T, DczfError>;

/// The main error type for compression, decompression, and verification.
#[derive(Debug, Error)]
pub enum DczfError {
    /// Filesystem error (open/read/write/flush/sync), tagged with the path.
    #[error("I/O error on {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Input file missing, empty when it shouldn't be, or unreadable.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// The input would need more chunks than the container can index.
    #[error("input would require {required} chunks, above the 2^31 - 1 limit; increase the chunk size")]
    TooManyChunks { required: u64 },

    /// The file does not start with the DCZF magic number.
    #[error("bad magic number {found:#010x}, not a DCZF container")]
    BadMagic { found: u32 },

    /// The container was written by an unknown format revision.
    #[error("unsupported container version {found}")]
    UnsupportedVersion { found: u32 },

    /// Structural damage: truncation mid-chunk, a decoder stuck past its
    /// maximum code length, or code lengths violating the Kraft inequality.
    #[error("corrupt container at chunk {at_chunk}: {reason}")]
    Corrupt { at_chunk: u32, reason: String },

    /// A chunk decoded cleanly but its bytes do not match the stored digest.
    #[error("checksum mismatch in chunk {chunk_index}")]
    ChecksumMismatch { chunk_index: u32 },

    /// The decompressed output does not add up to the recorded original size.
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Cooperative cancellation was signalled between chunks.
    #[error("operation cancelled")]
    Cancelled,

    /// Blocking I/O was interrupted by the host.
    #[error("blocking I/O interrupted")]
    Interrupted,
}

impl DczfError {
    /// Wrap a filesystem error, surfacing host interruption as its own taxon.
    pub fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::Interrupted {
            DczfError::Interrupted
        } else {
            DczfError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    /// Classify a failure to stat or open an input file: missing or
    /// unreadable inputs are invalid input rather than plain I/O errors.
    pub fn input(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                DczfError::InvalidInput {
                    reason: format!("{}: {source}", path.display()),
                }
            }
            _ => DczfError::io(path, source),
        }
    }
}

/// Codec-level errors raised while building code tables or decoding a chunk.
#[derive(Debug, Error)]
pub enum HuffmanError {
    /// A stored code length exceeds the 32-bit decoder limit.
    #[error("code length {length} for symbol {symbol:#04x} exceeds the 32-bit maximum")]
    LengthOutOfRange { symbol: u8, length: u8 },

    /// The code lengths do not describe a prefix code.
    #[error("code lengths violate the Kraft inequality (scaled sum {scaled_sum:#x})")]
    KraftViolation { scaled_sum: u64 },

    /// No codeword matched within the maximum code length.
    #[error("no codeword of length <= {max_length} matched at output position {position}")]
    Stuck { position: usize, max_length: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_io_maps_to_its_own_variant() {
        let err = DczfError::io(
            Path::new("/x"),
            io::Error::new(io::ErrorKind::Interrupted, "signal"),
        );
        assert!(matches!(err, DczfError::Interrupted));
    }

    #[test]
    fn plain_io_keeps_the_path() {
        let err = DczfError::io(
            Path::new("/data/in.bin"),
            io::Error::new(io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.to_string().contains("/data/in.bin"));
    }
}
