//! End-to-end pipeline tests: compress real files, reparse their headers,
//! decompress them back, and drive every corruption path the container is
//! required to detect.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dczf_core::checksum::sha256_of;
use dczf_core::{read_header, verify, Compressor, Decompressor, DczfError};

const MIB: usize = 1024 * 1024;

/// Generate `len` deterministic bytes using a simple LCG.
fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

/// Generate `len` highly compressible bytes (repeating pattern).
fn compressible_bytes(len: usize) -> Vec<u8> {
    let pattern = b"the quick brown fox jumps over the lazy dog. ";
    (0..len).map(|i| pattern[i % pattern.len()]).collect()
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("dczf_test_{name}"))
}

/// Write `data` to a scratch input file and compress it.
/// Returns (input, compressed) paths.
fn compress_fixture(name: &str, data: &[u8], chunk_size: u32) -> (PathBuf, PathBuf) {
    let input = temp_path(&format!("{name}.in"));
    let output = temp_path(&format!("{name}.dczf"));
    fs::write(&input, data).unwrap();
    Compressor::new(chunk_size)
        .compress(&input, &output, None)
        .unwrap();
    (input, output)
}

fn decompress_to(name: &str, compressed: &PathBuf) -> Vec<u8> {
    let restored = temp_path(&format!("{name}.out"));
    Decompressor::new()
        .decompress(compressed, &restored, None)
        .unwrap();
    fs::read(&restored).unwrap()
}

#[test]
fn empty_input_roundtrips() {
    let (_, output) = compress_fixture("empty", &[], MIB as u32);

    let header = read_header(&output).unwrap();
    assert_eq!(header.num_chunks(), 0);
    assert_eq!(header.original_file_size, 0);
    // Zero chunks feed nothing into the global digest.
    assert_eq!(header.global_checksum, sha256_of(b""));
    assert_eq!(fs::metadata(&output).unwrap().len(), header.encoded_len());

    verify(&output).unwrap();
    assert!(decompress_to("empty", &output).is_empty());
}

#[test]
fn single_byte_input() {
    let (_, output) = compress_fixture("single_byte", b"A", MIB as u32);

    let header = read_header(&output).unwrap();
    assert_eq!(header.num_chunks(), 1);
    let chunk = &header.chunks[0];
    assert_eq!(chunk.original_size, 1);
    assert_eq!(chunk.compressed_size, 1);
    assert_eq!(chunk.code_lengths[b'A' as usize], 1);
    assert_eq!(
        chunk.code_lengths.iter().filter(|&&l| l > 0).count(),
        1,
        "only 'A' should carry a code"
    );

    // One symbol, codeword 0 of length 1, left-shifted into the top bit:
    // the whole payload is a single 0x00 byte.
    let bytes = fs::read(&output).unwrap();
    let payload = &bytes[header.encoded_len() as usize..];
    assert_eq!(payload, &[0x00]);

    assert_eq!(decompress_to("single_byte", &output), b"A");
}

#[test]
fn abracadabra_roundtrips_with_consistent_checksums() {
    let data = b"ABRACADABRA";
    let (_, output) = compress_fixture("abracadabra", data, MIB as u32);

    let header = read_header(&output).unwrap();
    assert_eq!(header.num_chunks(), 1);
    assert_eq!(header.chunks[0].checksum, sha256_of(data));
    header.validate().unwrap();

    // Scaled Kraft sum over the persisted lengths must be exactly one.
    let scaled: u64 = header.chunks[0]
        .code_lengths
        .iter()
        .filter(|&&l| l > 0)
        .map(|&l| 1u64 << (32 - l))
        .sum();
    assert_eq!(scaled, 1u64 << 32);

    assert_eq!(decompress_to("abracadabra", &output), data);
}

#[test]
fn multi_chunk_zeros() {
    let data = vec![0u8; 3 * MIB];
    let (_, output) = compress_fixture("zeros_3mib", &data, MIB as u32);

    let header = read_header(&output).unwrap();
    assert_eq!(header.num_chunks(), 3);
    for chunk in &header.chunks {
        assert_eq!(chunk.code_lengths[0], 1);
        // One bit per input byte, so each 1 MiB chunk packs into 128 KiB.
        assert_eq!(chunk.compressed_size, (MIB / 8) as u32);
        assert_eq!(chunk.checksum, header.chunks[0].checksum);
    }

    assert_eq!(decompress_to("zeros_3mib", &output), data);
}

#[test]
fn random_input_roundtrips_and_compression_is_deterministic() {
    let data = pseudo_random_bytes(5 * MIB, 0x5EED_CAFE);
    let input = temp_path("random_5mib.in");
    fs::write(&input, &data).unwrap();

    let output_a = temp_path("random_5mib_a.dczf");
    let output_b = temp_path("random_5mib_b.dczf");
    let compressor = Compressor::new(2 * MIB as u32);
    compressor.compress(&input, &output_a, None).unwrap();
    compressor.compress(&input, &output_b, None).unwrap();

    let header = read_header(&output_a).unwrap();
    assert_eq!(header.num_chunks(), 3);
    let sizes: Vec<u32> = header.chunks.iter().map(|c| c.original_size).collect();
    assert_eq!(sizes, vec![2 * MIB as u32, 2 * MIB as u32, MIB as u32]);

    // Random bytes are incompressible: the container overhead makes the
    // output at least as large as the input.
    assert!(fs::metadata(&output_a).unwrap().len() >= data.len() as u64);

    // Same input, same mtime: byte-identical containers.
    assert_eq!(fs::read(&output_a).unwrap(), fs::read(&output_b).unwrap());

    assert_eq!(decompress_to("random_5mib", &output_a), data);
}

#[test]
fn offsets_are_contiguous_across_chunks() {
    let data = compressible_bytes(5 * MIB + 12345);
    let (_, output) = compress_fixture("contiguity", &data, MIB as u32);

    let header = read_header(&output).unwrap();
    assert_eq!(header.num_chunks(), 6);
    assert_eq!(header.chunks[0].compressed_offset, 0);
    for pair in header.chunks.windows(2) {
        assert_eq!(
            pair[0].compressed_offset + pair[0].compressed_size as u64,
            pair[1].compressed_offset
        );
        assert_eq!(
            pair[0].original_offset + pair[0].original_size as u64,
            pair[1].original_offset
        );
    }
    assert_eq!(
        header.payload_size(),
        fs::metadata(&output).unwrap().len() - header.encoded_len()
    );
}

#[test]
fn payload_corruption_fails_the_damaged_chunk() {
    let data = compressible_bytes(3 * MIB);
    let (_, output) = compress_fixture("corrupt_payload", &data, MIB as u32);

    // Flip one byte inside chunk 1's payload.
    let header = read_header(&output).unwrap();
    let target = header.encoded_len() + header.chunks[1].compressed_offset + 17;
    let mut bytes = fs::read(&output).unwrap();
    bytes[target as usize] ^= 0xFF;
    fs::write(&output, &bytes).unwrap();

    let restored = temp_path("corrupt_payload.out");
    let err = Decompressor::new()
        .decompress(&output, &restored, None)
        .unwrap_err();
    assert!(
        matches!(err, DczfError::ChecksumMismatch { chunk_index: 1 }),
        "unexpected error: {err}"
    );
    assert!(!restored.exists(), "partial output must be deleted");
}

#[test]
fn truncation_is_detected() {
    let data = compressible_bytes(2 * MIB);
    let (_, output) = compress_fixture("truncated", &data, MIB as u32);

    let len = fs::metadata(&output).unwrap().len();
    let file = fs::OpenOptions::new().write(true).open(&output).unwrap();
    file.set_len(len - 1).unwrap();
    drop(file);

    let restored = temp_path("truncated.out");
    let err = Decompressor::new()
        .decompress(&output, &restored, None)
        .unwrap_err();
    assert!(matches!(err, DczfError::Corrupt { .. }), "unexpected error: {err}");
    assert!(!restored.exists());

    let err = verify(&output).unwrap_err();
    assert!(matches!(err, DczfError::Corrupt { .. }));
}

#[test]
fn flipped_magic_is_rejected() {
    let (_, output) = compress_fixture("bad_magic", b"some ordinary data", MIB as u32);

    let mut bytes = fs::read(&output).unwrap();
    bytes[0] ^= 0xFF;
    fs::write(&output, &bytes).unwrap();

    let restored = temp_path("bad_magic.out");
    let err = Decompressor::new()
        .decompress(&output, &restored, None)
        .unwrap_err();
    assert!(matches!(err, DczfError::BadMagic { .. }), "unexpected error: {err}");
    assert!(!restored.exists());
}

#[test]
fn verify_passes_on_intact_containers() {
    let data = compressible_bytes(MIB + 999);
    let (_, output) = compress_fixture("verify_ok", &data, MIB as u32);
    verify(&output).unwrap();
}

#[test]
fn empty_compressed_file_is_invalid_input() {
    let empty = temp_path("zero_len.dczf");
    fs::write(&empty, b"").unwrap();
    let restored = temp_path("zero_len.out");
    let err = Decompressor::new()
        .decompress(&empty, &restored, None)
        .unwrap_err();
    assert!(matches!(err, DczfError::InvalidInput { .. }));
}

#[test]
fn cancellation_aborts_without_leftovers() {
    let input = temp_path("cancelled.in");
    let output = temp_path("cancelled.dczf");
    fs::write(&input, compressible_bytes(2 * MIB)).unwrap();

    let flag = Arc::new(AtomicBool::new(false));
    flag.store(true, Ordering::Relaxed);
    let err = Compressor::new(MIB as u32)
        .with_cancel_flag(flag)
        .compress(&input, &output, None)
        .unwrap_err();
    assert!(matches!(err, DczfError::Cancelled));
    assert!(!output.exists());

    // The sibling spool file must be gone as well.
    let dir = output.parent().unwrap();
    let prefix = format!("{}.tmp.", output.file_name().unwrap().to_string_lossy());
    let leftovers: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        .collect();
    assert!(leftovers.is_empty(), "spool files left behind: {leftovers:?}");
}

#[test]
fn progress_reaches_one() {
    let input = temp_path("progress.in");
    let output = temp_path("progress.dczf");
    fs::write(&input, compressible_bytes(3 * MIB + 7)).unwrap();

    let mut fractions = Vec::new();
    let mut record = |f: f64| fractions.push(f);
    Compressor::new(MIB as u32)
        .compress(&input, &output, Some(&mut record))
        .unwrap();

    assert_eq!(fractions.len(), 4);
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*fractions.last().unwrap(), 1.0);
}

#[test]
fn header_records_the_original_name_and_chunk_size() {
    let data = compressible_bytes(100);
    let input = temp_path("named_input.bin");
    let output = temp_path("named_input.dczf");
    fs::write(&input, &data).unwrap();
    Compressor::new(4 * MIB as u32)
        .compress(&input, &output, None)
        .unwrap();

    let header = read_header(&output).unwrap();
    assert_eq!(header.original_filename, "dczf_test_named_input.bin");
    assert_eq!(header.chunk_size_bytes, 4 * MIB as u32);
    assert_eq!(header.original_file_size, 100);
    assert!(header.original_timestamp_ms > 0);
}
