use tracing::{debug, trace};

use super::Transformer;
use crate::policy::PolicyDecision;
use crate::store::{copy_object, ObjectStore};
use shroud_crypto::compress::{delta_compress, delta_decompress, usable_delta_base};
use shroud_crypto::envelope::{self, Packing};
use shroud_crypto::{Compression, MAX_PLAINTEXT_SIZE};
use shroud_types::error::{Result, ShroudError};
use shroud_types::{Direction, ObjectKind, Oid, OID_LEN};

/// First byte of the extra payload of a delta envelope; the cipher oid of
/// the base blob follows.
const DELTA_HINT: u8 = b'D';

/// zstd level for delta frames when the site compresses with lz4.
const DEFAULT_DELTA_LEVEL: i32 = 3;

/// Cipher oid of the delta base named by an envelope's extra payload.
pub(crate) fn delta_base(extra: &[u8]) -> Result<Option<Oid>> {
    match extra.split_first() {
        None => Ok(None),
        Some((&DELTA_HINT, base)) if base.len() == OID_LEN => Ok(Some(Oid::from_slice(base)?)),
        Some(_) => Err(ShroudError::corrupt(format!(
            "unrecognized extra payload of {} bytes",
            extra.len()
        ))),
    }
}

fn delta_extra(base: &Oid) -> Vec<u8> {
    let mut extra = Vec::with_capacity(1 + OID_LEN);
    extra.push(DELTA_HINT);
    extra.extend_from_slice(base.as_bytes());
    extra
}

impl<P: ObjectStore, C: ObjectStore> Transformer<P, C> {
    /// Transform one blob found at `path` according to `decision`. `base`
    /// is the source blob at the same path in the first parent.
    pub(super) fn transform_blob(
        &self,
        oid: &Oid,
        path: &str,
        decision: &PolicyDecision,
        base: Option<Oid>,
        direction: Direction,
    ) -> Result<Oid> {
        if !decision.encode {
            let (src, dst) = self.stores(direction);
            if copy_object(src, dst, oid)? {
                self.stats.borrow_mut().copied += 1;
            }
            self.record_pass_through(oid)?;
            return Ok(*oid);
        }
        if let Some(done) = self.lookup(direction, oid)? {
            self.stats.borrow_mut().reused += 1;
            return Ok(done);
        }
        match direction {
            Direction::Tauten => self.encode_blob(oid, path, decision, base),
            Direction::Regain => self.decode_blob(oid, path),
        }
    }

    fn encode_blob(
        &self,
        oid: &Oid,
        path: &str,
        decision: &PolicyDecision,
        base: Option<Oid>,
    ) -> Result<Oid> {
        let plaintext = self.plain.read_kind(oid, ObjectKind::Blob)?;
        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(ShroudError::PayloadTooLarge {
                size: plaintext.len(),
                max: MAX_PLAINTEXT_SIZE,
            });
        }

        let delta = match base {
            Some(base) if decision.delta_enabled() => {
                self.try_delta(&plaintext, &base, decision)?
            }
            _ => None,
        };

        let is_delta = delta.is_some();
        let envelope = match delta {
            Some((base_cipher, frame)) => {
                self.codec
                    .encode(&frame, &delta_extra(&base_cipher), Packing::Raw)?
            }
            None => {
                let packing = if decision.compression_target_ratio > 0.0 {
                    Packing::Compress {
                        compression: self.compression,
                        target_ratio: decision.compression_target_ratio,
                    }
                } else {
                    Packing::Raw
                };
                self.codec.encode(&plaintext, &[], packing)?
            }
        };
        let compressed = envelope::inspect(&envelope)?.compressed;

        let cipher_oid = Self::store_object(&self.cipher, ObjectKind::Blob, &envelope)?;
        self.record(Direction::Tauten, oid, &cipher_oid)?;

        let mut stats = self.stats.borrow_mut();
        stats.blobs_encoded += 1;
        stats.deltas += u64::from(is_delta);
        stats.compressed += u64::from(compressed);
        debug!(
            path,
            from = %oid,
            to = %cipher_oid,
            size = plaintext.len(),
            envelope = envelope.len(),
            delta = is_delta,
            compressed,
            "encoded blob"
        );
        Ok(cipher_oid)
    }

    /// Delta-compress `plaintext` against the plaintext blob `base`, if
    /// `base` was stored as a full envelope and the result meets the target
    /// ratio. Returns the base's cipher oid and the delta frame.
    fn try_delta(
        &self,
        plaintext: &[u8],
        base: &Oid,
        decision: &PolicyDecision,
    ) -> Result<Option<(Oid, Vec<u8>)>> {
        if (plaintext.len() as u64) < decision.delta_enabling_size {
            return Ok(None);
        }
        let Some(base_cipher) = self.lookup(Direction::Tauten, base)? else {
            return Ok(None);
        };
        if base_cipher == *base {
            // base was stored as-is; there is no envelope to refer to
            return Ok(None);
        }
        let base_envelope = self.cipher.read_kind(&base_cipher, ObjectKind::Blob)?;
        if !envelope::looks_like_envelope(&base_envelope)
            || delta_base(&envelope::inspect(&base_envelope)?.extra)?.is_some()
        {
            return Ok(None);
        }
        let base_plain = self.plain.read_kind(base, ObjectKind::Blob)?;
        if !usable_delta_base(&base_plain) {
            return Ok(None);
        }

        let level = match self.compression {
            Compression::Zstd { level } => level,
            Compression::Lz4 => DEFAULT_DELTA_LEVEL,
        };
        let frame = delta_compress(&base_plain, plaintext, level)?;
        if (frame.len() as f64) > decision.delta_target_ratio * plaintext.len() as f64 {
            trace!(
                size = plaintext.len(),
                delta = frame.len(),
                "delta missed target ratio"
            );
            return Ok(None);
        }
        Ok(Some((base_cipher, frame)))
    }

    fn decode_blob(&self, oid: &Oid, path: &str) -> Result<Oid> {
        let data = self.cipher.read_kind(oid, ObjectKind::Blob)?;
        let decoded = self.codec.decode(&data)?;
        let plaintext = match delta_base(&decoded.extra)? {
            Some(base) => {
                let base_plain = self.delta_base_plaintext(&base)?;
                delta_decompress(&base_plain, &decoded.plaintext)?
            }
            None => decoded.plaintext,
        };

        let plain_oid = Self::store_object(&self.plain, ObjectKind::Blob, &plaintext)?;
        self.record(Direction::Regain, oid, &plain_oid)?;
        self.stats.borrow_mut().blobs_decoded += 1;
        debug!(path, from = %oid, to = %plain_oid, size = plaintext.len(), "decoded blob");
        Ok(plain_oid)
    }

    /// Plaintext of the delta base `base` (a cipher oid), from the plaintext
    /// store when it has already been regained, else by decoding it.
    pub(crate) fn delta_base_plaintext(&self, base: &Oid) -> Result<Vec<u8>> {
        if let Some(plain) = self.lookup(Direction::Regain, base)? {
            return self.plain.read_kind(&plain, ObjectKind::Blob);
        }
        let data = self.cipher.read_kind(base, ObjectKind::Blob)?;
        let decoded = self.codec.decode(&data)?;
        if delta_base(&decoded.extra)?.is_some() {
            return Err(ShroudError::corrupt(format!(
                "delta base {base} is itself a delta"
            )));
        }
        Ok(decoded.plaintext)
    }
}
