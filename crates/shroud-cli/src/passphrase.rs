use zeroize::Zeroizing;

use shroud_core::config::{configured_passphrase, EngineConfig};
use shroud_crypto::SiteKey;

pub(crate) const PASSPHRASE_ENV: &str = "SHROUD_PASSPHRASE";

/// The site secret: configured passphrase or passcommand first, then
/// `$SHROUD_PASSPHRASE`.
pub(crate) fn get_passphrase(
    config: &EngineConfig,
) -> Result<Zeroizing<String>, Box<dyn std::error::Error>> {
    if let Some(pass) = configured_passphrase(&config.encryption)? {
        return Ok(pass);
    }
    match std::env::var(PASSPHRASE_ENV) {
        Ok(pass) if !pass.is_empty() => Ok(Zeroizing::new(pass)),
        _ => Err(format!(
            "no secret for site '{}': set encryption.passphrase, encryption.passcommand or {PASSPHRASE_ENV}",
            config.site.id
        )
        .into()),
    }
}

/// Derive the site key from the configured secret.
pub(crate) fn site_key(config: &EngineConfig) -> Result<SiteKey, Box<dyn std::error::Error>> {
    let passphrase = get_passphrase(config)?;
    let salt = config.encryption.salt.as_deref().map(str::as_bytes);
    let key = SiteKey::derive(passphrase.as_bytes(), salt, &config.encryption.kdf)?;
    Ok(key)
}
