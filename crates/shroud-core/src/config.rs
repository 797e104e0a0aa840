use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use shroud_crypto::key::KEY_TRAIT_LEN;
use shroud_crypto::{Compression, KdfParams};
use shroud_types::error::{Result, ShroudError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub site: SiteConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub attributes: AttributesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    /// Identifies the remote; input to the key trait.
    pub id: String,
    pub plain_store: PathBuf,
    pub cipher_store: PathBuf,
    pub mapping_path: PathBuf,
    #[serde(default)]
    pub key_trait: Option<String>,
    /// Register the plaintext objects directory as an alternate of the
    /// ciphertext store when opening it.
    #[serde(default = "default_alternates")]
    pub alternates: bool,
}

fn default_alternates() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub passcommand: Option<String>,
    /// Extra salt mixed into key derivation.
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub kdf: KdfParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompressionConfig {
    #[serde(default = "default_compression_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,
}

fn default_compression_algorithm() -> String {
    "zstd".to_string()
}

fn default_zstd_level() -> i32 {
    3
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: default_compression_algorithm(),
            zstd_level: default_zstd_level(),
        }
    }
}

impl CompressionConfig {
    pub fn compression(&self) -> Result<Compression> {
        Compression::from_config(&self.algorithm, self.zstd_level)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributesConfig {
    /// Site-level attribute lines, applied after every `.gitattributes`.
    #[serde(default)]
    pub rules: Vec<String>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.site.id.trim().is_empty() {
            return Err(ShroudError::Config("'site.id' must not be empty".into()));
        }
        if let Some(stored) = &self.site.key_trait {
            if stored.len() != KEY_TRAIT_LEN || !stored.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ShroudError::Config(format!(
                    "'site.key_trait' must be {KEY_TRAIT_LEN} hex characters"
                )));
            }
        }
        if self.encryption.passphrase.is_some() && self.encryption.passcommand.is_some() {
            return Err(ShroudError::Config(
                "set at most one of 'encryption.passphrase' and 'encryption.passcommand'".into(),
            ));
        }
        let kdf = &self.encryption.kdf;
        if kdf.iterations == 0 || kdf.parallelism == 0 || kdf.memory_kib < 8 * kdf.parallelism {
            return Err(ShroudError::Config(format!(
                "invalid kdf parameters: memory_kib={} iterations={} parallelism={}",
                kdf.memory_kib, kdf.iterations, kdf.parallelism
            )));
        }
        let compression = self.compression.compression()?;
        if let Compression::Zstd { level } = compression {
            if !(1..=22).contains(&level) {
                return Err(ShroudError::Config(format!(
                    "'compression.zstd_level' must be within 1..=22, got {level}"
                )));
            }
        }
        Ok(())
    }
}

/// Load and validate a YAML config file.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ShroudError::Config(format!("cannot read '{}': {e}", path.display()))
    })?;
    parse_config(&contents)
        .map_err(|e| ShroudError::Config(format!("invalid config '{}': {e}", path.display())))
}

pub fn parse_config(contents: &str) -> Result<EngineConfig> {
    let config: EngineConfig =
        serde_yaml::from_str(contents).map_err(|e| ShroudError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// The secret from `passphrase`, or from running `passcommand` through the
/// shell. `None` when neither is configured.
pub fn configured_passphrase(config: &EncryptionConfig) -> Result<Option<Zeroizing<String>>> {
    if let Some(ref p) = config.passphrase {
        return Ok(Some(Zeroizing::new(p.clone())));
    }

    if let Some(ref cmd) = config.passcommand {
        let output = Command::new("sh").arg("-c").arg(cmd).output()?;
        if !output.status.success() {
            return Err(ShroudError::Config(format!(
                "passcommand failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let mut raw = String::from_utf8(output.stdout)
            .map_err(|e| ShroudError::Config(format!("passcommand output is not UTF-8: {e}")))?;
        let pass = Zeroizing::new(raw.trim().to_string());
        raw.zeroize();

        if pass.is_empty() {
            return Err(ShroudError::Config(
                "passcommand returned an empty passphrase".into(),
            ));
        }
        return Ok(Some(pass));
    }

    Ok(None)
}
