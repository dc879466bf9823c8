//! Binary layout of the DCZF container.
//!
//! All multi-byte scalars are big-endian. The header carries the original
//! file's identity, a global checksum over the per-chunk digests, and one
//! metadata record per chunk; the payload that follows is the concatenation
//! of the independently encoded chunks.
//!
//! ```text
//! u32  magic = 0x44435A46 ("DCZF")
//! u32  version = 1
//! u16  filename_len, then that many UTF-8 bytes
//! u64  original_file_size
//! u64  original_timestamp_ms
//! u32  chunk_size_bytes
//! [u8; 32] global_checksum
//! u32  num_chunks, then num_chunks chunk records
//! payload: encoded chunks back to back
//! ```

use std::io::{self, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::checksum::{digests_equal, StreamingSha256, DIGEST_SIZE};
use crate::error::{DczfError, Result};
use crate::histogram::ALPHABET_SIZE;

/// "DCZF" as a big-endian u32.
pub const MAGIC: u32 = 0x4443_5A46;

/// Current container revision.
pub const FORMAT_VERSION: u32 = 1;

/// Serialized size of one chunk record:
///   index:u32 + original_offset:u64 + original_size:u32
///   + compressed_offset:u64 + compressed_size:u32 + checksum[32]
///   + code_lengths as 256 big-endian u16
pub const CHUNK_RECORD_SIZE: u64 = 4 + 8 + 4 + 8 + 4 + 32 + 512;

/// Header bytes outside the filename and the chunk records.
const FIXED_HEADER_SIZE: u64 = 4 + 4 + 2 + 8 + 8 + 4 + 32 + 4;

/// Metadata for one independently encoded chunk.
#[derive(Debug, Clone)]
pub struct ChunkMetadata {
    /// 0-based position, strictly increasing by one across the container.
    pub chunk_index: u32,
    /// Byte offset of this chunk in the original file.
    pub original_offset: u64,
    /// Bytes the chunk decodes to; the configured chunk size except possibly
    /// for the last chunk.
    pub original_size: u32,
    /// Offset of the encoded bytes within the payload region.
    pub compressed_offset: u64,
    /// Encoded byte count, trailing padding bits included.
    pub compressed_size: u32,
    /// SHA-256 of the original (uncompressed) chunk bytes.
    pub checksum: [u8; DIGEST_SIZE],
    /// Per-symbol canonical code lengths; 0 marks an absent symbol.
    pub code_lengths: [u8; ALPHABET_SIZE],
}

impl ChunkMetadata {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<BigEndian>(self.chunk_index)?;
        w.write_u64::<BigEndian>(self.original_offset)?;
        w.write_u32::<BigEndian>(self.original_size)?;
        w.write_u64::<BigEndian>(self.compressed_offset)?;
        w.write_u32::<BigEndian>(self.compressed_size)?;
        w.write_all(&self.checksum)?;
        // Each length goes out as a u16; the high byte is always zero.
        for &len in self.code_lengths.iter() {
            w.write_u16::<BigEndian>(len as u16)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let chunk_index = r.read_u32::<BigEndian>()?;
        let original_offset = r.read_u64::<BigEndian>()?;
        let original_size = r.read_u32::<BigEndian>()?;
        let compressed_offset = r.read_u64::<BigEndian>()?;
        let compressed_size = r.read_u32::<BigEndian>()?;
        let mut checksum = [0u8; DIGEST_SIZE];
        r.read_exact(&mut checksum)?;
        let mut code_lengths = [0u8; ALPHABET_SIZE];
        for len in code_lengths.iter_mut() {
            // High byte is ignored on read.
            *len = r.read_u16::<BigEndian>()? as u8;
        }
        Ok(Self {
            chunk_index,
            original_offset,
            original_size,
            compressed_offset,
            compressed_size,
            checksum,
            code_lengths,
        })
    }
}

/// Parsed container header.
#[derive(Debug, Clone)]
pub struct CompressionHeader {
    pub original_filename: String,
    pub original_file_size: u64,
    /// Last-modified time of the original, milliseconds since the Unix epoch.
    pub original_timestamp_ms: u64,
    /// Configured chunk size, not the last-chunk remainder.
    pub chunk_size_bytes: u32,
    /// SHA-256 over the per-chunk checksums, in chunk-index order.
    pub global_checksum: [u8; DIGEST_SIZE],
    pub chunks: Vec<ChunkMetadata>,
}

impl CompressionHeader {
    pub fn num_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// Serialized header length in bytes; the payload starts here.
    pub fn encoded_len(&self) -> u64 {
        FIXED_HEADER_SIZE
            + self.original_filename.len() as u64
            + self.chunks.len() as u64 * CHUNK_RECORD_SIZE
    }

    /// Total payload length according to the chunk records.
    pub fn payload_size(&self) -> u64 {
        self.chunks.iter().map(|c| c.compressed_size as u64).sum()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let name = self.original_filename.as_bytes();
        if name.len() > u16::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "original filename exceeds 65535 bytes",
            ));
        }
        w.write_u32::<BigEndian>(MAGIC)?;
        w.write_u32::<BigEndian>(FORMAT_VERSION)?;
        w.write_u16::<BigEndian>(name.len() as u16)?;
        w.write_all(name)?;
        w.write_u64::<BigEndian>(self.original_file_size)?;
        w.write_u64::<BigEndian>(self.original_timestamp_ms)?;
        w.write_u32::<BigEndian>(self.chunk_size_bytes)?;
        w.write_all(&self.global_checksum)?;
        w.write_u32::<BigEndian>(self.chunks.len() as u32)?;
        for chunk in &self.chunks {
            chunk.write_to(w)?;
        }
        Ok(())
    }

    /// Parse a header from `r`.
    ///
    /// `source_len` is the total length of the underlying file and bounds the
    /// plausible chunk count before any records are read; `path` tags I/O
    /// errors. The magic is checked before anything else is read.
    pub fn read_from<R: Read>(r: &mut R, source_len: u64, path: &Path) -> Result<Self> {
        let err = |e: io::Error| header_read_error(path, e);

        let magic = r.read_u32::<BigEndian>().map_err(err)?;
        if magic != MAGIC {
            return Err(DczfError::BadMagic { found: magic });
        }
        let version = r.read_u32::<BigEndian>().map_err(err)?;
        if version != FORMAT_VERSION {
            return Err(DczfError::UnsupportedVersion { found: version });
        }

        let name_len = r.read_u16::<BigEndian>().map_err(err)? as usize;
        let mut name_buf = vec![0u8; name_len];
        r.read_exact(&mut name_buf).map_err(err)?;
        let original_filename = String::from_utf8(name_buf).map_err(|_| DczfError::Corrupt {
            at_chunk: 0,
            reason: "original filename is not valid UTF-8".into(),
        })?;

        let original_file_size = r.read_u64::<BigEndian>().map_err(err)?;
        let original_timestamp_ms = r.read_u64::<BigEndian>().map_err(err)?;
        let chunk_size_bytes = r.read_u32::<BigEndian>().map_err(err)?;
        let mut global_checksum = [0u8; DIGEST_SIZE];
        r.read_exact(&mut global_checksum).map_err(err)?;

        let num_chunks = r.read_u32::<BigEndian>().map_err(err)?;
        let record_space = source_len.saturating_sub(FIXED_HEADER_SIZE + name_len as u64);
        if num_chunks as u64 > record_space / CHUNK_RECORD_SIZE {
            return Err(DczfError::Corrupt {
                at_chunk: 0,
                reason: format!("chunk count {num_chunks} cannot fit in a {source_len}-byte file"),
            });
        }

        let mut chunks = Vec::with_capacity(num_chunks as usize);
        for _ in 0..num_chunks {
            chunks.push(ChunkMetadata::read_from(r).map_err(err)?);
        }

        Ok(Self {
            original_filename,
            original_file_size,
            original_timestamp_ms,
            chunk_size_bytes,
            global_checksum,
            chunks,
        })
    }

    /// Check the structural invariants of the chunk list: indices in order,
    /// offsets contiguous on both sides, sizes adding up, and the global
    /// checksum matching the per-chunk digests.
    pub fn validate(&self) -> Result<()> {
        let corrupt = |at_chunk: u32, reason: String| DczfError::Corrupt { at_chunk, reason };

        let mut original_offset = 0u64;
        let mut compressed_offset = 0u64;
        let last = self.chunks.len().saturating_sub(1);
        for (i, chunk) in self.chunks.iter().enumerate() {
            let at = i as u32;
            if chunk.chunk_index != at {
                return Err(corrupt(
                    at,
                    format!("chunk index {} at position {i}", chunk.chunk_index),
                ));
            }
            if chunk.original_offset != original_offset {
                return Err(corrupt(
                    at,
                    format!(
                        "original offset {} breaks contiguity (expected {original_offset})",
                        chunk.original_offset
                    ),
                ));
            }
            if chunk.compressed_offset != compressed_offset {
                return Err(corrupt(
                    at,
                    format!(
                        "compressed offset {} breaks contiguity (expected {compressed_offset})",
                        chunk.compressed_offset
                    ),
                ));
            }
            if chunk.original_size == 0 || chunk.original_size > self.chunk_size_bytes {
                return Err(corrupt(
                    at,
                    format!("original size {} outside (0, chunk size]", chunk.original_size),
                ));
            }
            if i < last && chunk.original_size != self.chunk_size_bytes {
                return Err(corrupt(
                    at,
                    format!("non-final chunk holds {} bytes", chunk.original_size),
                ));
            }
            original_offset += chunk.original_size as u64;
            compressed_offset += chunk.compressed_size as u64;
        }

        if original_offset != self.original_file_size {
            return Err(corrupt(
                last as u32,
                format!(
                    "chunk sizes sum to {original_offset}, header says {}",
                    self.original_file_size
                ),
            ));
        }

        let mut digest = StreamingSha256::new();
        for chunk in &self.chunks {
            digest.update(&chunk.checksum);
        }
        if !digests_equal(&digest.finalize(), &self.global_checksum) {
            return Err(corrupt(
                0,
                "global checksum does not cover the chunk checksums".into(),
            ));
        }

        Ok(())
    }
}

fn header_read_error(path: &Path, e: io::Error) -> DczfError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        DczfError::Corrupt {
            at_chunk: 0,
            reason: "unexpected end of file inside the header".into(),
        }
    } else {
        DczfError::io(path, e)
    }
}
