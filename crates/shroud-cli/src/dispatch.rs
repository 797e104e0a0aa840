use shroud_core::config::EngineConfig;

use crate::cli::Commands;
use crate::cmd;

pub(crate) fn dispatch_command(
    command: &Commands,
    cfg: &EngineConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::KeyTrait => cmd::key_trait::run_key_trait(cfg),
        Commands::Tauten { no_tags, rebuild } => cmd::tauten::run_tauten(cfg, *no_tags, *rebuild),
        Commands::Regain { no_tags, expect } => cmd::regain::run_regain(cfg, *no_tags, expect),
        Commands::Promote => cmd::promote::run_promote(cfg),
        Commands::Reveal { oid, raw } => cmd::reveal::run_reveal(cfg, oid, *raw),
    }
}
