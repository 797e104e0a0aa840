use argon2::Argon2;
use blake2::digest::consts::U32;
use blake2::digest::Mac;
use blake2::Blake2bMac;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use shroud_types::error::{Result, ShroudError};

type KeyedBlake2b256 = Blake2bMac<U32>;

const SALT_DOMAIN: &[u8] = b"shroud-site-key:v1";
const TRAIT_DOMAIN: &[u8] = b"shroud:key-trait:v1\0";

/// Hex characters in a persisted key trait.
pub const KEY_TRAIT_LEN: usize = 16;

/// Symmetric key material for one site. Never written to disk.
/// Automatically zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SiteKey {
    pub cipher_key: [u8; 32],
    pub nonce_key: [u8; 32],
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

fn default_memory_kib() -> u32 {
    65536 // 64 MiB
}

fn default_iterations() -> u32 {
    3
}

fn default_parallelism() -> u32 {
    4
}

impl SiteKey {
    pub fn from_bytes(cipher_key: [u8; 32], nonce_key: [u8; 32]) -> Self {
        Self {
            cipher_key,
            nonce_key,
        }
    }

    /// Derive the site key from a secret and an optional per-user salt.
    pub fn derive(secret: &[u8], user_salt: Option<&[u8]>, kdf: &KdfParams) -> Result<Self> {
        if secret.is_empty() {
            return Err(ShroudError::KeyDerivation("empty secret".into()));
        }
        let params = argon2::Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(64))
            .map_err(|e| ShroudError::KeyDerivation(format!("argon2 params: {e}")))?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        let mut salt = SALT_DOMAIN.to_vec();
        if let Some(extra) = user_salt {
            salt.extend_from_slice(extra);
        }

        let mut output = Zeroizing::new([0u8; 64]);
        argon2
            .hash_password_into(secret, &salt, output.as_mut())
            .map_err(|e| ShroudError::KeyDerivation(format!("argon2 hash: {e}")))?;

        let mut cipher_key = [0u8; 32];
        let mut nonce_key = [0u8; 32];
        cipher_key.copy_from_slice(&output[..32]);
        nonce_key.copy_from_slice(&output[32..]);
        Ok(Self::from_bytes(cipher_key, nonce_key))
    }

    /// Short, non-reversible digest of this key bound to `site_id`.
    pub fn key_trait(&self, site_id: &str) -> Result<String> {
        let mut mac = KeyedBlake2b256::new_from_slice(&self.cipher_key)
            .map_err(|e| ShroudError::KeyDerivation(format!("key trait: {e}")))?;
        Mac::update(&mut mac, TRAIT_DOMAIN);
        Mac::update(&mut mac, &self.nonce_key);
        Mac::update(&mut mac, site_id.as_bytes());
        let digest = mac.finalize().into_bytes();
        Ok(hex::encode(&digest[..KEY_TRAIT_LEN / 2]))
    }

    /// Compare against a trait persisted when the site was created.
    pub fn verify_trait(&self, site_id: &str, stored: &str) -> Result<()> {
        let computed = self.key_trait(site_id)?;
        let stored = stored.trim().to_ascii_lowercase();
        if bool::from(computed.as_bytes().ct_eq(stored.as_bytes())) {
            Ok(())
        } else {
            Err(ShroudError::KeyTraitMismatch {
                site: site_id.to_string(),
            })
        }
    }
}
