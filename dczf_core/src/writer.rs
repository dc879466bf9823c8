//! Two-phase streaming compressor.
//!
//! Phase one encodes each chunk into a sibling spool file while metadata and
//! the global digest accumulate in memory; phase two writes the finalized
//! header to the real output and copies the spooled payload after it. The
//! header names every chunk's compressed offset and the global checksum, both
//! unknowable until all chunks are done — spooling keeps memory flat and
//! guarantees no stale-but-parseable header can ever sit at the output path.
//!
//! Any failure deletes the partial output; the spool file is deleted on every
//! path.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

use crate::checksum::{sha256_of, StreamingSha256};
use crate::codec::encode_chunk;
use crate::error::{DczfError, Result};
use crate::format::{ChunkMetadata, CompressionHeader};
use crate::histogram::histogram;
use crate::huffman::{build_code_lengths, canonical_codes};

/// User-space buffer for sequential file writes; fixed so the working set
/// stays flat on multi-gigabyte inputs.
pub const IO_BUFFER_SIZE: usize = 1024 * 1024;

/// Buffer for the spool-to-output copy in phase two.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Hard ceiling on the chunk count the container can index.
pub const MAX_CHUNKS: u64 = (1 << 31) - 1;

/// Chunks between explicit flushes of the spool buffer.
const FLUSH_INTERVAL: u32 = 10;

/// Reborrow a progress callback with a lifetime tied to the reborrow site
/// rather than the original reference, so it can be passed across a helper
/// call boundary.
fn reborrow_progress<'a, 'b: 'a>(
    progress: &'a mut Option<&'b mut dyn FnMut(f64)>,
) -> Option<&'a mut dyn FnMut(f64)> {
    match progress {
        Some(f) => Some(&mut **f),
        None => None,
    }
}

/// Chunked canonical-Huffman compressor.
pub struct Compressor {
    chunk_size_bytes: u32,
    cancel: Option<Arc<AtomicBool>>,
}

impl Compressor {
    /// Create a compressor that encodes `chunk_size_bytes` per chunk.
    pub fn new(chunk_size_bytes: u32) -> Self {
        assert!(chunk_size_bytes > 0, "chunk size must be positive");
        Self {
            chunk_size_bytes,
            cancel: None,
        }
    }

    /// Attach a cooperative cancellation flag, polled between chunks.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Compress `input_path` into a DCZF container at `output_path`.
    ///
    /// `progress`, when given, receives the completed fraction after every
    /// chunk. On error nothing is left at `output_path`.
    pub fn compress(
        &self,
        input_path: &Path,
        output_path: &Path,
        mut progress: Option<&mut dyn FnMut(f64)>,
    ) -> Result<()> {
        let meta = fs::metadata(input_path).map_err(|e| DczfError::input(input_path, e))?;
        if !meta.is_file() {
            return Err(DczfError::InvalidInput {
                reason: format!("{} is not a regular file", input_path.display()),
            });
        }
        let file_size = meta.len();
        let timestamp_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let num_chunks = file_size.div_ceil(self.chunk_size_bytes as u64);
        if num_chunks > MAX_CHUNKS {
            return Err(DczfError::TooManyChunks {
                required: num_chunks,
            });
        }

        info!(
            "compressing {} ({} bytes) into {} chunks of {} bytes",
            input_path.display(),
            file_size,
            num_chunks,
            self.chunk_size_bytes
        );

        let spool = spool_path(output_path);
        let result = self.run_phases(
            input_path,
            output_path,
            &spool,
            file_size,
            num_chunks as u32,
            timestamp_ms,
            reborrow_progress(&mut progress),
        );
        if result.is_err() {
            remove_quietly(output_path);
        }
        remove_quietly(&spool);
        result?;

        let compressed_size = fs::metadata(output_path)
            .map(|m| m.len())
            .unwrap_or_default();
        if file_size > 0 {
            info!(
                "compression complete: {} -> {} bytes ({:.2}%)",
                file_size,
                compressed_size,
                compressed_size as f64 / file_size as f64 * 100.0
            );
        } else {
            info!("compression complete: empty input, {compressed_size}-byte container");
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn run_phases(
        &self,
        input_path: &Path,
        output_path: &Path,
        spool_path: &Path,
        file_size: u64,
        num_chunks: u32,
        timestamp_ms: u64,
        mut progress: Option<&mut dyn FnMut(f64)>,
    ) -> Result<()> {
        let original_filename = input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        // Phase one: encode every chunk into the spool file.
        let mut input = File::open(input_path).map_err(|e| DczfError::input(input_path, e))?;
        let spool_file = File::create(spool_path).map_err(|e| DczfError::io(spool_path, e))?;
        let mut spool = BufWriter::with_capacity(IO_BUFFER_SIZE, spool_file);

        let mut global = StreamingSha256::new();
        let mut chunks: Vec<ChunkMetadata> = Vec::with_capacity(num_chunks as usize);
        let mut chunk_buf = vec![0u8; self.chunk_size_bytes as usize];
        let mut compressed_offset = 0u64;

        for chunk_index in 0..num_chunks {
            self.check_cancelled()?;

            let original_offset = chunk_index as u64 * self.chunk_size_bytes as u64;
            let want = (file_size - original_offset).min(self.chunk_size_bytes as u64) as usize;
            read_chunk_at(&mut input, &mut chunk_buf[..want], original_offset, input_path)?;
            let data = &chunk_buf[..want];

            let chunk_checksum = sha256_of(data);
            global.update(&chunk_checksum);

            let code_lengths = build_code_lengths(&histogram(data));
            let codes = canonical_codes(&code_lengths);
            let encoded = encode_chunk(data, &codes);

            spool
                .write_all(&encoded)
                .map_err(|e| DczfError::io(spool_path, e))?;
            if chunk_index % FLUSH_INTERVAL == 0 {
                spool.flush().map_err(|e| DczfError::io(spool_path, e))?;
            }

            debug!(
                "chunk {}/{}: {} -> {} bytes ({:.1}%)",
                chunk_index + 1,
                num_chunks,
                want,
                encoded.len(),
                encoded.len() as f64 / want as f64 * 100.0
            );

            chunks.push(ChunkMetadata {
                chunk_index,
                original_offset,
                original_size: want as u32,
                compressed_offset,
                compressed_size: encoded.len() as u32,
                checksum: chunk_checksum,
                code_lengths,
            });
            compressed_offset += encoded.len() as u64;

            if let Some(cb) = progress.as_mut() {
                cb((chunk_index + 1) as f64 / num_chunks as f64);
            }
        }

        spool.flush().map_err(|e| DczfError::io(spool_path, e))?;
        drop(spool);

        let spool_size = fs::metadata(spool_path)
            .map_err(|e| DczfError::io(spool_path, e))?
            .len();
        if spool_size != compressed_offset || (num_chunks > 0 && spool_size == 0) {
            return Err(DczfError::Io {
                path: spool_path.to_path_buf(),
                source: io::Error::other(format!(
                    "spool holds {spool_size} bytes, encoder emitted {compressed_offset}"
                )),
            });
        }
        info!("phase one complete: {num_chunks} chunks, {compressed_offset} payload bytes spooled");

        // Phase two: finalized header, then the spooled payload.
        let header = CompressionHeader {
            original_filename,
            original_file_size: file_size,
            original_timestamp_ms: timestamp_ms,
            chunk_size_bytes: self.chunk_size_bytes,
            global_checksum: global.finalize(),
            chunks,
        };

        let out_file = File::create(output_path).map_err(|e| DczfError::io(output_path, e))?;
        let mut out = BufWriter::with_capacity(IO_BUFFER_SIZE, out_file);
        header
            .write_to(&mut out)
            .map_err(|e| DczfError::io(output_path, e))?;

        let mut spool_in = File::open(spool_path).map_err(|e| DczfError::io(spool_path, e))?;
        let mut copy_buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = spool_in
                .read(&mut copy_buf)
                .map_err(|e| DczfError::io(spool_path, e))?;
            if n == 0 {
                break;
            }
            out.write_all(&copy_buf[..n])
                .map_err(|e| DczfError::io(output_path, e))?;
        }

        out.flush().map_err(|e| DczfError::io(output_path, e))?;
        let out_file = out
            .into_inner()
            .map_err(|e| DczfError::io(output_path, e.into_error()))?;
        out_file
            .sync_all()
            .map_err(|e| DczfError::io(output_path, e))?;
        sync_parent_dir(output_path);

        let final_size = fs::metadata(output_path)
            .map_err(|e| DczfError::io(output_path, e))?
            .len();
        if file_size > 0 && final_size == 0 {
            return Err(DczfError::Io {
                path: output_path.to_path_buf(),
                source: io::Error::other("output file is empty after phase two"),
            });
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(DczfError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Sibling spool path `{output}.tmp.{unix_ms}`, kept next to the output so
/// both live on the same filesystem.
fn spool_path(output: &Path) -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".into());
    output.with_file_name(format!("{name}.tmp.{millis}"))
}

fn read_chunk_at(file: &mut File, buf: &mut [u8], offset: u64, path: &Path) -> Result<()> {
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| DczfError::io(path, e))?;
    file.read_exact(buf).map_err(|e| DczfError::io(path, e))
}

/// Best-effort delete used on cleanup paths; never masks the primary error.
pub(crate) fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("failed to remove {}: {e}", path.display());
        }
    }
}

/// Durability for the rename-free commit: fsync the directory holding the
/// freshly written file where the platform supports opening directories.
#[cfg(unix)]
pub(crate) fn sync_parent_dir(path: &Path) {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match File::open(parent) {
        Ok(dir) => {
            if let Err(e) = dir.sync_all() {
                warn!("failed to sync directory {}: {e}", parent.display());
            }
        }
        Err(e) => warn!("failed to open directory {} for sync: {e}", parent.display()),
    }
}

#[cfg(not(unix))]
pub(crate) fn sync_parent_dir(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spool_path_is_a_sibling() {
        let spool = spool_path(Path::new("/data/out/archive.dczf"));
        assert_eq!(spool.parent(), Some(Path::new("/data/out")));
        let name = spool.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("archive.dczf.tmp."));
    }

    #[test]
    #[should_panic(expected = "chunk size must be positive")]
    fn zero_chunk_size_is_rejected() {
        Compressor::new(0);
    }
}
