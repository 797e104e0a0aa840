use shroud_types::Oid;

/// Abbreviated oid for tables.
pub(crate) fn short_oid(oid: &Oid) -> String {
    oid.to_hex()[..12].to_string()
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// `bytes` with its size relative to `reference`, e.g. `1.00 KiB  (25.0% of plaintext)`.
pub(crate) fn format_size_with_ratio(bytes: u64, reference: u64) -> String {
    if reference == 0 {
        return format_bytes(bytes);
    }
    let pct = bytes as f64 / reference as f64 * 100.0;
    format!("{}  ({pct:.1}% of plaintext)", format_bytes(bytes))
}

/// Split `<ref>=<oid>` as given to `regain --expect`.
pub(crate) fn parse_expectation(s: &str) -> Result<(String, Oid), Box<dyn std::error::Error>> {
    let (name, hex) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid expectation '{s}': use <ref>=<oid>"))?;
    if name.is_empty() {
        return Err(format!("invalid expectation '{s}': empty ref name").into());
    }
    Ok((name.to_string(), Oid::from_hex(hex.trim())?))
}
