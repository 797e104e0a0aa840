use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::MAX_PLAINTEXT_SIZE;
use shroud_types::error::{Result, ShroudError};

const TAG_LZ4: u8 = 0x01;
const TAG_ZSTD: u8 = 0x02;

/// Magic number of a trained zstd dictionary. A delta base starting with it
/// would be loaded as a structured dictionary instead of raw content.
const ZSTD_DICT_MAGIC: [u8; 4] = [0x37, 0xA4, 0x30, 0xEC];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    Lz4,
    Zstd { level: i32 },
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Zstd { level: 3 }
    }
}

impl Compression {
    /// Parse from config string like "zstd" or "lz4".
    pub fn from_config(algorithm: &str, zstd_level: i32) -> Result<Self> {
        match algorithm {
            "lz4" => Ok(Compression::Lz4),
            "zstd" => Ok(Compression::Zstd { level: zstd_level }),
            other => Err(ShroudError::Config(format!(
                "unknown compression algorithm: {other}"
            ))),
        }
    }
}

/// Compress data and prepend a 1-byte tag identifying the codec.
pub fn compress(compression: Compression, data: &[u8]) -> Result<Vec<u8>> {
    match compression {
        Compression::Lz4 => {
            let compressed = lz4_flex::compress_prepend_size(data);
            let mut out = Vec::with_capacity(1 + compressed.len());
            out.push(TAG_LZ4);
            out.extend_from_slice(&compressed);
            Ok(out)
        }
        Compression::Zstd { level } => {
            let compressed = zstd::bulk::compress(data, level)
                .map_err(|e| ShroudError::Other(format!("zstd compress: {e}")))?;
            let mut out = Vec::with_capacity(1 + compressed.len());
            out.push(TAG_ZSTD);
            out.extend_from_slice(&compressed);
            Ok(out)
        }
    }
}

/// Decompress data by reading the 1-byte tag prefix and dispatching.
/// Output is capped at [`MAX_PLAINTEXT_SIZE`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let Some((&tag, payload)) = data.split_first() else {
        return Err(ShroudError::Decompression("empty data".into()));
    };
    match tag {
        TAG_LZ4 => {
            if payload.len() < 4 {
                return Err(ShroudError::Decompression("lz4: payload too short".into()));
            }
            let mut size_prefix = [0u8; 4];
            size_prefix.copy_from_slice(&payload[..4]);
            let uncompressed_size = u32::from_le_bytes(size_prefix) as usize;
            if uncompressed_size > MAX_PLAINTEXT_SIZE {
                return Err(ShroudError::Decompression(format!(
                    "lz4: decompressed size ({uncompressed_size}) exceeds limit of {MAX_PLAINTEXT_SIZE} bytes"
                )));
            }
            lz4_flex::decompress_size_prepended(payload)
                .map_err(|e| ShroudError::Decompression(format!("lz4: {e}")))
        }
        TAG_ZSTD => {
            let decoder = zstd::stream::read::Decoder::new(std::io::Cursor::new(payload))
                .map_err(|e| ShroudError::Decompression(format!("zstd init: {e}")))?;
            read_capped(decoder, "zstd")
        }
        _ => Err(ShroudError::UnknownCompressionTag(tag)),
    }
}

/// Whether `base` can serve as a raw-content dictionary for delta frames.
pub fn usable_delta_base(base: &[u8]) -> bool {
    !base.is_empty() && !base.starts_with(&ZSTD_DICT_MAGIC)
}

/// Encode `data` as a zstd frame that uses `base` as its dictionary.
pub fn delta_compress(base: &[u8], data: &[u8], level: i32) -> Result<Vec<u8>> {
    let mut compressor = zstd::bulk::Compressor::with_dictionary(level, base)
        .map_err(|e| ShroudError::Other(format!("zstd delta init: {e}")))?;
    compressor
        .compress(data)
        .map_err(|e| ShroudError::Other(format!("zstd delta: {e}")))
}

/// Inverse of [`delta_compress`].
pub fn delta_decompress(base: &[u8], frame: &[u8]) -> Result<Vec<u8>> {
    let decoder = zstd::stream::read::Decoder::with_dictionary(std::io::Cursor::new(frame), base)
        .map_err(|e| ShroudError::Decompression(format!("zstd delta init: {e}")))?;
    read_capped(decoder, "zstd delta")
}

fn read_capped(mut reader: impl Read, codec: &str) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    reader
        .by_ref()
        .take(MAX_PLAINTEXT_SIZE as u64 + 1)
        .read_to_end(&mut output)
        .map_err(|e| ShroudError::Decompression(format!("{codec}: {e}")))?;
    if output.len() > MAX_PLAINTEXT_SIZE {
        return Err(ShroudError::Decompression(format!(
            "{codec}: decompressed size exceeds limit of {MAX_PLAINTEXT_SIZE} bytes"
        )));
    }
    Ok(output)
}
