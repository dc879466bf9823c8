//! Decompression pipeline and structural verifier.
//!
//! Decompression is strictly sequential: the payload is laid out in chunk
//! order, and each chunk re-derives its code table from the persisted
//! lengths, decodes, and must pass its SHA-256 check before a single byte is
//! written onward. Any failure deletes the partial output.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};

use crate::checksum::{digests_equal, sha256_of};
use crate::codec::decode_chunk;
use crate::error::{DczfError, Result};
use crate::format::CompressionHeader;
use crate::huffman::HuffmanDecoder;
use crate::writer::{remove_quietly, COPY_BUFFER_SIZE, IO_BUFFER_SIZE};

/// Outputs above this size get periodic metadata syncs while chunks stream.
const LARGE_OUTPUT_BYTES: u64 = 5_000_000_000;

/// Chunks between metadata syncs on large outputs.
const SYNC_INTERVAL: u32 = 10;

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

/// Chunked canonical-Huffman decompressor.
#[derive(Default)]
pub struct Decompressor {
    cancel: Option<Arc<AtomicBool>>,
}

impl Decompressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a cooperative cancellation flag, polled between chunks.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Restore the original file from the container at `input_path`.
    ///
    /// `progress`, when given, receives the completed fraction after every
    /// chunk. On error nothing is left at `output_path`.
    pub fn decompress(
        &self,
        input_path: &Path,
        output_path: &Path,
        mut progress: Option<&mut dyn FnMut(f64)>,
    ) -> Result<()> {
        let result = self.decompress_inner(input_path, output_path, reborrow_progress(&mut progress));
        if result.is_err() {
            remove_quietly(output_path);
        }
        result
    }

    fn decompress_inner(
        &self,
        input_path: &Path,
        output_path: &Path,
        mut progress: Option<&mut dyn FnMut(f64)>,
    ) -> Result<()> {
        let input_size = fs::metadata(input_path)
            .map_err(|e| DczfError::input(input_path, e))?
            .len();
        if input_size == 0 {
            return Err(DczfError::InvalidInput {
                reason: format!("{} is empty", input_path.display()),
            });
        }

        let input = File::open(input_path).map_err(|e| DczfError::input(input_path, e))?;
        let mut reader = BufReader::with_capacity(IO_BUFFER_SIZE, input);
        let header = CompressionHeader::read_from(&mut reader, input_size, input_path)?;
        header.validate()?;

        let num_chunks = header.num_chunks();
        info!(
            "decompressing {num_chunks} chunks, original size {} bytes",
            header.original_file_size
        );

        let mut output = File::create(output_path).map_err(|e| DczfError::io(output_path, e))?;
        if num_chunks == 0 {
            // An empty original: nothing follows the header.
            output
                .sync_all()
                .map_err(|e| DczfError::io(output_path, e))?;
            info!("decompression complete: empty file restored");
            return Ok(());
        }

        let large_output = header.original_file_size > LARGE_OUTPUT_BYTES;
        let mut compressed_buf = Vec::new();
        let mut total_written = 0u64;

        for chunk in &header.chunks {
            self.check_cancelled()?;
            let index = chunk.chunk_index;

            compressed_buf.resize(chunk.compressed_size as usize, 0);
            reader.read_exact(&mut compressed_buf).map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    DczfError::Corrupt {
                        at_chunk: index,
                        reason: "unexpected end of file inside chunk payload".into(),
                    }
                } else {
                    DczfError::io(input_path, e)
                }
            })?;

            let decoder =
                HuffmanDecoder::from_lengths(&chunk.code_lengths).map_err(|e| DczfError::Corrupt {
                    at_chunk: index,
                    reason: e.to_string(),
                })?;
            let decoded = decode_chunk(&compressed_buf, chunk.original_size as usize, &decoder)
                .map_err(|e| DczfError::Corrupt {
                    at_chunk: index,
                    reason: e.to_string(),
                })?;

            if !digests_equal(&sha256_of(&decoded), &chunk.checksum) {
                return Err(DczfError::ChecksumMismatch { chunk_index: index });
            }

            output
                .write_all(&decoded)
                .map_err(|e| DczfError::io(output_path, e))?;
            total_written += decoded.len() as u64;

            if large_output && index % SYNC_INTERVAL == 0 {
                output
                    .sync_data()
                    .map_err(|e| DczfError::io(output_path, e))?;
            }

            debug!(
                "chunk {}/{num_chunks}: {} bytes restored, checksum ok",
                index + 1,
                decoded.len()
            );
            if let Some(cb) = progress.as_mut() {
                cb((index + 1) as f64 / num_chunks as f64);
            }
        }

        output
            .sync_all()
            .map_err(|e| DczfError::io(output_path, e))?;

        let output_size = fs::metadata(output_path)
            .map_err(|e| DczfError::io(output_path, e))?
            .len();
        if total_written != header.original_file_size || output_size != header.original_file_size {
            return Err(DczfError::SizeMismatch {
                expected: header.original_file_size,
                actual: output_size,
            });
        }

        info!("decompression complete: {total_written} bytes restored from {num_chunks} chunks");
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(DczfError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Check the container's structural integrity without decoding any chunk.
///
/// Parses and validates the header, confirms every chunk's code lengths
/// describe a prefix code, and walks the payload to prove every chunk's
/// compressed bytes are actually present.
pub fn verify(input_path: &Path) -> Result<()> {
    let input_size = fs::metadata(input_path)
        .map_err(|e| DczfError::input(input_path, e))?
        .len();
    if input_size == 0 {
        return Err(DczfError::InvalidInput {
            reason: format!("{} is empty", input_path.display()),
        });
    }

    let input = File::open(input_path).map_err(|e| DczfError::input(input_path, e))?;
    let mut reader = BufReader::with_capacity(IO_BUFFER_SIZE, input);
    let header = CompressionHeader::read_from(&mut reader, input_size, input_path)?;
    header.validate()?;

    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    for chunk in &header.chunks {
        HuffmanDecoder::from_lengths(&chunk.code_lengths).map_err(|e| DczfError::Corrupt {
            at_chunk: chunk.chunk_index,
            reason: e.to_string(),
        })?;

        let mut remaining = chunk.compressed_size as u64;
        while remaining > 0 {
            let take = remaining.min(buf.len() as u64) as usize;
            reader.read_exact(&mut buf[..take]).map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    DczfError::Corrupt {
                        at_chunk: chunk.chunk_index,
                        reason: "payload truncated".into(),
                    }
                } else {
                    DczfError::io(input_path, e)
                }
            })?;
            remaining -= take as u64;
        }
    }

    debug!(
        "verified {} ({} chunks, {} payload bytes)",
        input_path.display(),
        header.num_chunks(),
        header.payload_size()
    );
    Ok(())
}

/// Parse just the header of a container, for inspection tools.
pub fn read_header(input_path: &Path) -> Result<CompressionHeader> {
    let input_size = fs::metadata(input_path)
        .map_err(|e| DczfError::input(input_path, e))?
        .len();
    if input_size == 0 {
        return Err(DczfError::InvalidInput {
            reason: format!("{} is empty", input_path.display()),
        });
    }
    let input = File::open(input_path).map_err(|e| DczfError::input(input_path, e))?;
    let mut reader = BufReader::with_capacity(IO_BUFFER_SIZE, input);
    CompressionHeader::read_from(&mut reader, input_size, input_path)
}
