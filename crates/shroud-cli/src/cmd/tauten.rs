use shroud_core::config::EngineConfig;

use super::open_engine;
use crate::table::TableStyle;

pub(crate) fn run_tauten(
    config: &EngineConfig,
    no_tags: bool,
    rebuild: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(config)?;
    if rebuild {
        engine.truncate_mappings()?;
    }

    let (staged, head) = engine.tauten_all(!no_tags)?;

    let style = TableStyle::detect();
    if staged.is_empty() {
        println!("Nothing to stage.");
    } else {
        println!("{}", style.staged_table(&staged));
    }
    match head {
        Some(head) => println!("HEAD: {} -> {}", head.name, head.staged),
        None => println!("HEAD: unborn"),
    }

    let stats = engine.finish();
    println!("Tautened: {stats}");
    Ok(())
}
