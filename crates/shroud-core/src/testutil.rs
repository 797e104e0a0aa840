use std::collections::BTreeMap;
use std::path::Path;

use crate::engine::{Engine, EngineOptions};
use crate::object::tree::{parse_tree, write_tree};
use crate::object::{EntryKind, TreeEntry};
use crate::store::{MemoryStore, ObjectStore};
use shroud_crypto::{Compression, SiteKey};
use shroud_types::{ObjectKind, Oid};

pub const SITE: &str = "origin@example.org/repo.git";

pub fn test_key() -> SiteKey {
    SiteKey::from_bytes([0x42; 32], [0x24; 32])
}

pub fn other_key() -> SiteKey {
    SiteKey::from_bytes([0x43; 32], [0x24; 32])
}

pub fn options(rules: &[&str]) -> EngineOptions {
    EngineOptions {
        site_id: SITE.to_string(),
        key_trait: None,
        compression: Compression::default(),
        attribute_rules: rules.iter().map(|r| r.to_string()).collect(),
    }
}

/// Engine over two borrowed in-memory stores with site rules `rules`.
pub fn engine<'a>(
    plain: &'a MemoryStore,
    cipher: &'a MemoryStore,
    dir: &Path,
    rules: &[&str],
) -> Engine<&'a MemoryStore, &'a MemoryStore> {
    Engine::initialize(
        plain,
        cipher,
        &dir.join("oidmap.redb"),
        &test_key(),
        options(rules),
    )
    .unwrap()
}

pub fn blob(store: &impl ObjectStore, content: &[u8]) -> Oid {
    store.write(ObjectKind::Blob, content).unwrap()
}

/// Sort the way git orders tree entries: directories compare as `name/`.
fn sort_entries(entries: &mut [TreeEntry]) {
    entries.sort_by_key(|e| {
        let mut key = e.name.clone();
        if e.kind == EntryKind::Tree {
            key.push(b'/');
        }
        key
    });
}

/// Build nested trees holding regular files at the given paths.
pub fn tree_of(store: &impl ObjectStore, files: &[(&str, &[u8])]) -> Oid {
    let mut direct: Vec<TreeEntry> = Vec::new();
    let mut nested: BTreeMap<&str, Vec<(&str, &[u8])>> = BTreeMap::new();
    for (path, content) in files {
        match path.split_once('/') {
            Some((dir, rest)) => nested.entry(dir).or_default().push((rest, *content)),
            None => direct.push(TreeEntry {
                mode: b"100644".to_vec(),
                name: path.as_bytes().to_vec(),
                oid: blob(store, content),
                kind: EntryKind::Blob,
            }),
        }
    }
    for (dir, children) in nested {
        direct.push(TreeEntry {
            mode: b"40000".to_vec(),
            name: dir.as_bytes().to_vec(),
            oid: tree_of(store, &children),
            kind: EntryKind::Tree,
        });
    }
    sort_entries(&mut direct);
    store
        .write(ObjectKind::Tree, &write_tree(&direct))
        .unwrap()
}

/// Flatten a tree into `path -> content` for its blobs.
pub fn files_of(store: &impl ObjectStore, tree: &Oid) -> BTreeMap<String, Vec<u8>> {
    let mut out = BTreeMap::new();
    let mut pending = vec![(String::new(), *tree)];
    while let Some((dir, oid)) = pending.pop() {
        let data = store.read_kind(&oid, ObjectKind::Tree).unwrap();
        for entry in parse_tree(&oid, &data).unwrap() {
            let path = crate::object::tree::join_path(&dir, &entry.name_lossy());
            match entry.kind {
                EntryKind::Tree => pending.push((path, entry.oid)),
                EntryKind::Gitlink => {}
                EntryKind::Blob | EntryKind::Symlink => {
                    out.insert(path, store.read(&entry.oid).unwrap().data);
                }
            }
        }
    }
    out
}

/// Oid of the blob at `path` under `tree`.
pub fn blob_at(store: &impl ObjectStore, tree: &Oid, path: &str) -> Oid {
    let mut current = *tree;
    let mut parts = path.split('/').peekable();
    while let Some(part) = parts.next() {
        let data = store.read_kind(&current, ObjectKind::Tree).unwrap();
        let entry = parse_tree(&current, &data)
            .unwrap()
            .into_iter()
            .find(|e| e.name == part.as_bytes())
            .unwrap_or_else(|| panic!("{path}: no entry {part}"));
        if parts.peek().is_none() {
            return entry.oid;
        }
        current = entry.oid;
    }
    unreachable!("empty path")
}

pub fn commit(store: &impl ObjectStore, tree: &Oid, parents: &[Oid], message: &str) -> Oid {
    let mut body = format!("tree {tree}\n");
    for parent in parents {
        body.push_str(&format!("parent {parent}\n"));
    }
    body.push_str(
        "author Test Author <author@example.com> 1700000000 +0100\n\
         committer Test Committer <committer@example.com> 1700000100 -0500\n\n",
    );
    body.push_str(message);
    body.push('\n');
    store.write(ObjectKind::Commit, body.as_bytes()).unwrap()
}

pub fn annotated_tag(store: &impl ObjectStore, target: &Oid, kind: ObjectKind, name: &str) -> Oid {
    let body = format!(
        "object {target}\ntype {kind}\ntag {name}\n\
         tagger Test Tagger <tagger@example.com> 1700000200 +0000\n\nrelease {name}\n"
    );
    store.write(ObjectKind::Tag, body.as_bytes()).unwrap()
}

/// Tree oid of a commit.
pub fn tree_of_commit(store: &impl ObjectStore, commit: &Oid) -> Oid {
    let data = store.read_kind(commit, ObjectKind::Commit).unwrap();
    crate::object::CommitHeader::parse(commit, &data).unwrap().tree
}

/// Bytes that compress and delta well but are not trivially repetitive.
pub fn text(lines: usize, seed: u32) -> Vec<u8> {
    let mut out = String::new();
    for i in 0..lines {
        out.push_str(&format!(
            "line {i:05}: the quick brown fox {} jumps over the lazy dog\n",
            (i as u32).wrapping_mul(2654435761).wrapping_add(seed) % 1000
        ));
    }
    out.into_bytes()
}

/// Incompressible bytes from a xorshift generator.
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 32) as u8
        })
        .collect()
}
