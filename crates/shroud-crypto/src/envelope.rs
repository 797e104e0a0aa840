//! Self-describing encrypted blob format.
//!
//! Layout (little endian):
//!
//! ```text
//! "SHRD" | version u8 | flags u8 | extra_len u32 | extra | payload_len u64 | nonce[12] | ciphertext+tag
//! ```
//!
//! Everything after the magic is authenticated: the bytes from the magic up
//! to and including the nonce are the GCM associated data. The version byte
//! is checked before anything else so a newer format is reported as such
//! instead of as corruption.

use std::borrow::Cow;

use tracing::trace;

use crate::aes_gcm::{SivAes256Gcm, NONCE_LEN, TAG_LEN};
use crate::compress::{self, Compression};
use crate::key::SiteKey;
use crate::{MAX_EXTRA_SIZE, MAX_PLAINTEXT_SIZE};
use shroud_types::error::{Result, ShroudError};

pub const MAGIC: &[u8; 4] = b"SHRD";
pub const VERSION: u8 = 1;

const FLAG_COMPRESSED: u8 = 0x01;
const KNOWN_FLAGS: u8 = FLAG_COMPRESSED;

/// How the payload is packed before encryption.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Packing {
    Raw,
    /// Compress, keeping the result only if it is at most
    /// `target_ratio * plaintext.len()` bytes.
    Compress {
        compression: Compression,
        target_ratio: f64,
    },
}

/// Result of a successful [`EnvelopeCodec::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub plaintext: Vec<u8>,
    pub compressed: bool,
    pub extra: Vec<u8>,
}

/// Header fields readable without the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeInfo {
    pub version: u8,
    pub compressed: bool,
    pub extra: Vec<u8>,
    pub payload_len: u64,
    pub envelope_len: usize,
}

struct Parsed<'a> {
    flags: u8,
    extra: &'a [u8],
    payload_len: u64,
    nonce: [u8; NONCE_LEN],
    aad: &'a [u8],
    sealed: &'a [u8],
}

/// Quick check for the envelope magic; says nothing about integrity.
pub fn looks_like_envelope(data: &[u8]) -> bool {
    data.starts_with(MAGIC)
}

/// Parse the header of `data` without decrypting it.
pub fn inspect(data: &[u8]) -> Result<EnvelopeInfo> {
    let parsed = parse(data)?;
    Ok(EnvelopeInfo {
        version: VERSION,
        compressed: parsed.flags & FLAG_COMPRESSED != 0,
        extra: parsed.extra.to_vec(),
        payload_len: parsed.payload_len,
        envelope_len: data.len(),
    })
}

fn parse(data: &[u8]) -> Result<Parsed<'_>> {
    if data.len() < MAGIC.len() + 1 || !data.starts_with(MAGIC) {
        return Err(ShroudError::corrupt("missing envelope magic"));
    }
    let version = data[MAGIC.len()];
    if version != VERSION {
        return Err(ShroudError::UnsupportedVersion(version));
    }

    let mut cursor = Cursor::new(data, MAGIC.len() + 1);
    let flags = cursor.take(1)?[0];
    if flags & !KNOWN_FLAGS != 0 {
        return Err(ShroudError::corrupt(format!("unknown flags {flags:#04x}")));
    }
    let extra_len = cursor.u32()? as usize;
    if extra_len > MAX_EXTRA_SIZE {
        return Err(ShroudError::corrupt(format!(
            "extra payload length {extra_len} exceeds {MAX_EXTRA_SIZE}"
        )));
    }
    let extra = cursor.take(extra_len)?;
    let payload_len = cursor.u64()?;
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(cursor.take(NONCE_LEN)?);
    let header_end = cursor.pos;
    let sealed = &data[header_end..];

    let expected = payload_len
        .checked_add(TAG_LEN as u64)
        .ok_or_else(|| ShroudError::corrupt("payload length overflows"))?;
    if sealed.len() as u64 != expected {
        return Err(ShroudError::corrupt(format!(
            "body is {} bytes, header announces {expected}",
            sealed.len()
        )));
    }

    Ok(Parsed {
        flags,
        extra,
        payload_len,
        nonce,
        aad: &data[..header_end],
        sealed,
    })
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| ShroudError::corrupt("truncated header"))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }
}

/// Bytes that feed the synthetic nonce besides the payload itself.
fn nonce_context(flags: u8, extra: &[u8]) -> Vec<u8> {
    let mut ctx = Vec::with_capacity(1 + extra.len());
    ctx.push(flags);
    ctx.extend_from_slice(extra);
    ctx
}

/// Reversible blob transform: optional compression, authenticated
/// encryption and an unencrypted, authenticated side channel.
pub struct EnvelopeCodec {
    siv: SivAes256Gcm,
}

impl EnvelopeCodec {
    pub fn new(key: &SiteKey) -> Self {
        Self {
            siv: SivAes256Gcm::new(&key.cipher_key, &key.nonce_key),
        }
    }

    pub fn encode(&self, plaintext: &[u8], extra: &[u8], packing: Packing) -> Result<Vec<u8>> {
        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(ShroudError::PayloadTooLarge {
                size: plaintext.len(),
                max: MAX_PLAINTEXT_SIZE,
            });
        }
        if extra.len() > MAX_EXTRA_SIZE {
            return Err(ShroudError::PayloadTooLarge {
                size: extra.len(),
                max: MAX_EXTRA_SIZE,
            });
        }

        let (flags, payload) = match packing {
            Packing::Raw => (0, Cow::Borrowed(plaintext)),
            Packing::Compress {
                compression,
                target_ratio,
            } => {
                let packed = compress::compress(compression, plaintext)?;
                if (packed.len() as f64) <= target_ratio * plaintext.len() as f64 {
                    (FLAG_COMPRESSED, Cow::Owned(packed))
                } else {
                    trace!(
                        raw = plaintext.len(),
                        packed = packed.len(),
                        "compression missed target ratio, storing raw"
                    );
                    (0, Cow::Borrowed(plaintext))
                }
            }
        };

        let nonce = self
            .siv
            .synthetic_nonce(&nonce_context(flags, extra), &payload)?;

        let mut out =
            Vec::with_capacity(MAGIC.len() + 18 + extra.len() + NONCE_LEN + payload.len() + TAG_LEN);
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.push(flags);
        out.extend_from_slice(&(extra.len() as u32).to_le_bytes());
        out.extend_from_slice(extra);
        out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        out.extend_from_slice(&nonce);

        let sealed = self.siv.seal(&nonce, &payload, &out)?;
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Decoded> {
        let parsed = parse(data)?;
        let payload = self.siv.open(
            &parsed.nonce,
            parsed.sealed,
            parsed.aad,
            &nonce_context(parsed.flags, parsed.extra),
        )?;

        let compressed = parsed.flags & FLAG_COMPRESSED != 0;
        let plaintext = if compressed {
            compress::decompress(&payload)?
        } else {
            payload
        };
        Ok(Decoded {
            plaintext,
            compressed,
            extra: parsed.extra.to_vec(),
        })
    }
}
