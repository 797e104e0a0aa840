use shroud_core::config::EngineConfig;

use super::open_engine;
use crate::format::parse_expectation;
use crate::table::TableStyle;

pub(crate) fn run_regain(
    config: &EngineConfig,
    no_tags: bool,
    expect: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    // reject malformed expectations before doing any work
    let expectations = expect
        .iter()
        .map(|e| parse_expectation(e))
        .collect::<Result<Vec<_>, _>>()?;

    let engine = open_engine(config)?;
    let mut staged = engine.regain_heads()?;
    if !no_tags {
        staged.extend(engine.regain_tags()?);
    }
    for (name, oid) in &expectations {
        engine.confirm_fetch(name, oid)?;
    }

    if staged.is_empty() {
        println!("Nothing to stage.");
    } else {
        println!("{}", TableStyle::detect().staged_table(&staged));
    }
    if !expectations.is_empty() {
        println!("Confirmed {} expected ref(s).", expectations.len());
    }

    let stats = engine.finish();
    println!("Regained: {stats}");
    Ok(())
}
