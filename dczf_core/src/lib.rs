pub mod bitio;
pub mod checksum;
pub mod codec;
pub mod error;
pub mod format;
pub mod histogram;
pub mod huffman;
pub mod reader;
pub mod writer;

pub use error::{DczfError, HuffmanError, Result};
pub use format::{ChunkMetadata, CompressionHeader, FORMAT_VERSION, MAGIC};
pub use reader::{read_header, verify, Decompressor};
pub use writer::Compressor;
