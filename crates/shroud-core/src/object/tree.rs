use super::malformed;
use shroud_types::error::Result;
use shroud_types::{ObjectKind, Oid, OID_LEN};

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;
const S_IFGITLINK: u32 = 0o160000;
const S_IFREG: u32 = 0o100000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Tree,
    Blob,
    Symlink,
    /// Submodule commit; lives in another repository.
    Gitlink,
}

impl EntryKind {
    pub fn is_blob_like(self) -> bool {
        matches!(self, EntryKind::Blob | EntryKind::Symlink)
    }
}

/// One tree entry. `mode` keeps the exact bytes found in the object so a
/// rebuilt tree hashes identically when nothing else changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: Vec<u8>,
    pub name: Vec<u8>,
    pub oid: Oid,
    pub kind: EntryKind,
}

impl TreeEntry {
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

fn classify(mode: &[u8]) -> Option<EntryKind> {
    let text = std::str::from_utf8(mode).ok()?;
    let bits = u32::from_str_radix(text, 8).ok()?;
    match bits & S_IFMT {
        S_IFDIR => Some(EntryKind::Tree),
        S_IFLNK => Some(EntryKind::Symlink),
        S_IFGITLINK => Some(EntryKind::Gitlink),
        S_IFREG => Some(EntryKind::Blob),
        _ => None,
    }
}

/// Parse a tree body. `oid` is only used in error messages.
pub fn parse_tree(oid: &Oid, data: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let rest = &data[pos..];
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| malformed(ObjectKind::Tree, oid, "entry without mode separator"))?;
        let mode = &rest[..space];
        let after_mode = &rest[space + 1..];
        let nul = after_mode
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| malformed(ObjectKind::Tree, oid, "entry name not terminated"))?;
        let name = &after_mode[..nul];
        let oid_start = nul + 1;
        if after_mode.len() < oid_start + OID_LEN {
            return Err(malformed(ObjectKind::Tree, oid, "truncated entry oid"));
        }
        if name.is_empty() {
            return Err(malformed(ObjectKind::Tree, oid, "empty entry name"));
        }
        let kind = classify(mode).ok_or_else(|| {
            malformed(
                ObjectKind::Tree,
                oid,
                format!("unknown mode {}", String::from_utf8_lossy(mode)),
            )
        })?;
        entries.push(TreeEntry {
            mode: mode.to_vec(),
            name: name.to_vec(),
            oid: Oid::from_slice(&after_mode[oid_start..oid_start + OID_LEN])?,
            kind,
        });
        pos += space + 1 + oid_start + OID_LEN;
    }
    Ok(entries)
}

/// Serialize entries in the order given.
pub fn write_tree(entries: &[TreeEntry]) -> Vec<u8> {
    let size = entries
        .iter()
        .map(|e| e.mode.len() + e.name.len() + 2 + OID_LEN)
        .sum();
    let mut out = Vec::with_capacity(size);
    for entry in entries {
        out.extend_from_slice(&entry.mode);
        out.push(b' ');
        out.extend_from_slice(&entry.name);
        out.push(0);
        out.extend_from_slice(entry.oid.as_bytes());
    }
    out
}

/// Join a tree path and an entry name with `/`.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}
