use super::malformed;
use shroud_types::error::Result;
use shroud_types::{ObjectKind, Oid};

/// The oid-bearing prefix of a commit body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitHeader {
    pub tree: Oid,
    pub parents: Vec<Oid>,
    /// Offset of the first byte after the `parent` lines: author,
    /// committer, any extra headers and the message.
    rest: usize,
}

/// Read one `<key> <hex>\n` line at `pos`, if the key matches.
fn oid_line(data: &[u8], pos: usize, key: &[u8]) -> Option<(Oid, usize)> {
    let line = data.get(pos..)?;
    if !line.starts_with(key) || line.get(key.len()) != Some(&b' ') {
        return None;
    }
    let start = pos + key.len() + 1;
    let end = start + 40;
    if data.get(end) != Some(&b'\n') {
        return None;
    }
    let hex = std::str::from_utf8(&data[start..end]).ok()?;
    let oid = Oid::from_hex(hex).ok()?;
    Some((oid, end + 1))
}

impl CommitHeader {
    pub fn parse(oid: &Oid, data: &[u8]) -> Result<Self> {
        let (tree, mut pos) = oid_line(data, 0, b"tree")
            .ok_or_else(|| malformed(ObjectKind::Commit, oid, "missing tree line"))?;
        let mut parents = Vec::new();
        while let Some((parent, next)) = oid_line(data, pos, b"parent") {
            parents.push(parent);
            pos = next;
        }
        if data[pos..].starts_with(b"parent ") {
            return Err(malformed(ObjectKind::Commit, oid, "unparseable parent line"));
        }
        Ok(Self {
            tree,
            parents,
            rest: pos,
        })
    }

    pub fn first_parent(&self) -> Option<Oid> {
        self.parents.first().copied()
    }

    /// Rebuild `data` (the body this header was parsed from) pointing at a
    /// different tree and parents.
    pub fn rewrite(&self, data: &[u8], tree: &Oid, parents: &[Oid]) -> Vec<u8> {
        let tail = &data[self.rest..];
        let mut out = Vec::with_capacity(46 + parents.len() * 48 + tail.len());
        out.extend_from_slice(b"tree ");
        out.extend_from_slice(tree.to_hex().as_bytes());
        out.push(b'\n');
        for parent in parents {
            out.extend_from_slice(b"parent ");
            out.extend_from_slice(parent.to_hex().as_bytes());
            out.push(b'\n');
        }
        out.extend_from_slice(tail);
        out
    }
}

/// The oid-bearing prefix of an annotated tag body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagHeader {
    pub target: Oid,
    pub target_kind: ObjectKind,
    rest: usize,
}

impl TagHeader {
    pub fn parse(oid: &Oid, data: &[u8]) -> Result<Self> {
        let (target, rest) = oid_line(data, 0, b"object")
            .ok_or_else(|| malformed(ObjectKind::Tag, oid, "missing object line"))?;
        let type_line = data[rest..]
            .strip_prefix(b"type ")
            .and_then(|line| line.split(|&b| b == b'\n').next())
            .ok_or_else(|| malformed(ObjectKind::Tag, oid, "missing type line"))?;
        let target_kind = std::str::from_utf8(type_line)
            .ok()
            .and_then(ObjectKind::parse)
            .ok_or_else(|| {
                malformed(
                    ObjectKind::Tag,
                    oid,
                    format!("unknown target type {}", String::from_utf8_lossy(type_line)),
                )
            })?;
        Ok(Self {
            target,
            target_kind,
            rest,
        })
    }

    pub fn rewrite(&self, data: &[u8], target: &Oid) -> Vec<u8> {
        let tail = &data[self.rest..];
        let mut out = Vec::with_capacity(48 + tail.len());
        out.extend_from_slice(b"object ");
        out.extend_from_slice(target.to_hex().as_bytes());
        out.push(b'\n');
        out.extend_from_slice(tail);
        out
    }
}
