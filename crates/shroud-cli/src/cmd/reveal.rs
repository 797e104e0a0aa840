use std::io::Write;

use shroud_core::config::EngineConfig;
use shroud_types::Oid;

use super::open_engine;
use crate::format::{format_bytes, format_size_with_ratio};
use crate::table::TableStyle;

pub(crate) fn run_reveal(
    config: &EngineConfig,
    oid: &str,
    raw: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let oid = Oid::from_hex(oid.trim())?;
    let engine = open_engine(config)?;
    let reveal = engine.reveal(&oid)?;

    if raw {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&reveal.plaintext)?;
        stdout.flush()?;
        return Ok(());
    }

    let style = TableStyle::detect();
    let mut table = style.kv_table();
    style.add_kv_row(&mut table, "Cipher oid", reveal.oid);
    style.add_kv_row(&mut table, "Plain oid", reveal.plain_oid);
    style.add_kv_row(&mut table, "Version", reveal.version);
    style.add_kv_row(
        &mut table,
        "Payload",
        format_size_with_ratio(reveal.payload_len, reveal.plaintext.len() as u64),
    );
    style.add_kv_row(&mut table, "Compressed", if reveal.compressed { "yes" } else { "no" });
    style.add_kv_row(&mut table, "Extra", format_bytes(reveal.extra_len as u64));
    let delta = reveal
        .delta_base
        .map(|base| base.to_string())
        .unwrap_or_else(|| "-".to_string());
    style.add_kv_row(&mut table, "Delta base", delta);
    style.add_kv_row(
        &mut table,
        "Plaintext",
        format_bytes(reveal.plaintext.len() as u64),
    );
    println!("{table}");
    Ok(())
}
