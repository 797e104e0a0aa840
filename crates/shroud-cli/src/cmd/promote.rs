use shroud_core::config::EngineConfig;

use super::open_engine;

pub(crate) fn run_promote(config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(config)?;
    let promoted = engine.update_destination_head()?;
    if promoted.is_empty() {
        println!("Nothing staged to promote.");
    }
    for name in &promoted {
        println!("Promoted: {name}");
    }
    Ok(())
}
