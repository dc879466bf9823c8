//! Bit-level encode/decode of a single chunk.

use crate::bitio::{BitReader, BitWriter};
use crate::error::HuffmanError;
use crate::histogram::ALPHABET_SIZE;
use crate::huffman::{HuffmanCode, HuffmanDecoder};

/// Encode `data` with the given code table.
///
/// The table must have been built from this exact chunk, so every byte has a
/// code; hitting an absent symbol is a programmer error and panics.
pub fn encode_chunk(data: &[u8], codes: &[HuffmanCode; ALPHABET_SIZE]) -> Vec<u8> {
    let mut out = BitWriter::with_capacity(data.len());
    for &byte in data {
        let code = codes[byte as usize];
        assert!(code.is_present(), "no code for symbol {byte:#04x} in chunk");
        out.write_bits(code.codeword, code.length);
    }
    out.into_bytes()
}

/// Decode exactly `original_size` symbols from `encoded`.
///
/// Bits accumulate one at a time; each prefix is offered to the decoder until
/// a codeword matches. Reading past the buffer yields zero padding, so the
/// final symbol may safely consume up to 7 phantom bits. A prefix that
/// exhausts the decoder's maximum length marks the stream corrupt.
pub fn decode_chunk(
    encoded: &[u8],
    original_size: usize,
    decoder: &HuffmanDecoder,
) -> Result<Vec<u8>, HuffmanError> {
    let mut reader = BitReader::new(encoded);
    let mut out = Vec::with_capacity(original_size);
    'symbols: for position in 0..original_size {
        let mut code = 0u32;
        for length in 1..=decoder.max_length() {
            code = (code << 1) | reader.read_bit();
            if let Some(symbol) = decoder.decode(code, length) {
                out.push(symbol);
                continue 'symbols;
            }
        }
        return Err(HuffmanError::Stuck {
            position,
            max_length: decoder.max_length(),
        });
    }
    Ok(out)
}
