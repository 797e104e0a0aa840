pub(crate) mod key_trait;
pub(crate) mod promote;
pub(crate) mod regain;
pub(crate) mod reveal;
pub(crate) mod tauten;

use shroud_core::config::EngineConfig;
use shroud_core::{Engine, GitStore};

use crate::passphrase::site_key;

/// Derive the key and open both repositories named by `config`.
pub(crate) fn open_engine(
    config: &EngineConfig,
) -> Result<Engine<GitStore, GitStore>, Box<dyn std::error::Error>> {
    let key = site_key(config)?;
    Ok(Engine::open(config, &key)?)
}
