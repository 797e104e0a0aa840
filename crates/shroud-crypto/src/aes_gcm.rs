use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use blake2::digest::consts::U32;
use blake2::digest::Mac;
use blake2::Blake2bMac;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use shroud_types::error::{Result, ShroudError};

type KeyedBlake2b256 = Blake2bMac<U32>;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

const NONCE_DOMAIN: &[u8] = b"shroud:synthetic-nonce:v1\0";

/// AES-256-GCM with a synthetic, content-derived nonce.
///
/// The nonce is a keyed BLAKE2b digest of the associated data and the
/// message, so equal inputs seal to equal bytes and distinct inputs never
/// share a nonce under the same key.
pub struct SivAes256Gcm {
    cipher: Aes256Gcm,
    nonce_key: Zeroizing<[u8; 32]>,
}

impl SivAes256Gcm {
    pub fn new(cipher_key: &[u8; 32], nonce_key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(cipher_key)),
            nonce_key: Zeroizing::new(*nonce_key),
        }
    }

    /// Derive the nonce for `msg` bound to `context`.
    pub fn synthetic_nonce(&self, context: &[u8], msg: &[u8]) -> Result<[u8; NONCE_LEN]> {
        let mut mac = <KeyedBlake2b256 as Mac>::new_from_slice(self.nonce_key.as_ref())
            .map_err(|e| ShroudError::Other(format!("nonce key: {e}")))?;
        Mac::update(&mut mac, NONCE_DOMAIN);
        Mac::update(&mut mac, &(context.len() as u64).to_le_bytes());
        Mac::update(&mut mac, context);
        Mac::update(&mut mac, msg);
        let digest = mac.finalize().into_bytes();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&digest[..NONCE_LEN]);
        Ok(nonce)
    }

    /// Encrypt `msg`; returns `ciphertext || tag`. `aad` must already end
    /// with `nonce` when the caller wants the nonce authenticated.
    pub fn seal(&self, nonce: &[u8; NONCE_LEN], msg: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), Payload { msg, aad })
            .map_err(|e| ShroudError::Other(format!("AES-GCM encrypt: {e}")))
    }

    /// Decrypt `ciphertext || tag` and check that the nonce really is the
    /// synthetic nonce of the recovered message.
    pub fn open(
        &self,
        nonce: &[u8; NONCE_LEN],
        sealed: &[u8],
        aad: &[u8],
        context: &[u8],
    ) -> Result<Vec<u8>> {
        if sealed.len() < TAG_LEN {
            return Err(ShroudError::corrupt("ciphertext shorter than tag"));
        }
        let msg = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad })
            .map_err(|_| ShroudError::corrupt("integrity tag mismatch"))?;
        let expected = self.synthetic_nonce(context, &msg)?;
        if !bool::from(expected.ct_eq(nonce)) {
            return Err(ShroudError::corrupt("synthetic nonce mismatch"));
        }
        Ok(msg)
    }
}
