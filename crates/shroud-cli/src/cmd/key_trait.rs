use shroud_core::config::EngineConfig;

use crate::passphrase::site_key;

pub(crate) fn run_key_trait(config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let key = site_key(config)?;
    let computed = key.key_trait(&config.site.id)?;
    println!("{computed}");

    if let Some(stored) = &config.site.key_trait {
        if key.verify_trait(&config.site.id, stored).is_err() {
            return Err(format!(
                "secret does not match site '{}': configured key_trait is {stored}",
                config.site.id
            )
            .into());
        }
        eprintln!("Matches the configured key_trait.");
    } else {
        eprintln!("Add it to the config as site.key_trait to catch a mistyped secret.");
    }
    Ok(())
}
