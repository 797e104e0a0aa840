//! Memoized rewriting of commit graphs between the plaintext and the
//! ciphertext store.
//!
//! Commits and trees are walked with explicit worklists: an `Enter` frame
//! schedules an object's unmapped children, the matching `Exit` frame
//! rebuilds the object once they all have counterparts. Every rebuilt object
//! is written to the destination store before its mapping is recorded, so a
//! mapping never points at a missing object.
//!
//! Trees are memoized by oid, but what a tree becomes depends on the path
//! and attribute files it is found under. A memoized tree met again in a
//! new context is checked against that context before it is reused.

pub(crate) mod blob;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::mapping::MappingStore;
use crate::object::tree::{join_path, parse_tree, write_tree};
use crate::object::{CommitHeader, EntryKind, TagHeader, TreeEntry};
use crate::policy::{AttributeFile, AttributeStack, PolicyResolver, ATTRIBUTES_FILE};
use crate::store::{copy_object, ObjectStore};
use shroud_crypto::{Compression, EnvelopeCodec};
use shroud_types::error::{Result, ShroudError};
use shroud_types::{Direction, ObjectKind, Oid};

/// Counters for one engine run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStats {
    pub commits: u64,
    pub trees: u64,
    pub tags: u64,
    pub blobs_encoded: u64,
    pub blobs_decoded: u64,
    /// Encoded blobs stored as a delta against the first parent's version.
    pub deltas: u64,
    /// Encoded blobs whose payload was kept compressed.
    pub compressed: u64,
    /// Pass-through objects that had to be copied into the destination.
    pub copied: u64,
    /// Objects answered from the mapping store instead of being rebuilt.
    pub reused: u64,
}

impl TransformStats {
    pub fn objects_written(&self) -> u64 {
        self.commits + self.trees + self.tags + self.blobs_encoded + self.blobs_decoded + self.copied
    }
}

impl fmt::Display for TransformStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} commits, {} trees, {} tags, {} blobs encoded ({} delta, {} compressed), \
             {} blobs decoded, {} copied, {} reused",
            self.commits,
            self.trees,
            self.tags,
            self.blobs_encoded,
            self.deltas,
            self.compressed,
            self.blobs_decoded,
            self.copied,
            self.reused,
        )
    }
}

/// A tree already checked against one path and set of attribute files.
type ReuseKey = (Direction, Oid, String, Vec<usize>);

fn stack_key(attrs: &[Rc<AttributeFile>]) -> Vec<usize> {
    attrs.iter().map(|f| Rc::as_ptr(f) as usize).collect()
}

enum CommitFrame {
    Enter(Oid),
    Exit {
        oid: Oid,
        data: Vec<u8>,
        header: CommitHeader,
    },
}

enum TreeFrame {
    Enter {
        oid: Oid,
        path: String,
        base: Option<Oid>,
        attrs: AttributeStack,
    },
    Exit {
        oid: Oid,
        path: String,
        entries: Vec<TreeEntry>,
        base_entries: HashMap<Vec<u8>, TreeEntry>,
        attrs: AttributeStack,
    },
}

/// Rewrites objects from one store into the other, recording every
/// rebuilt object in the mapping store.
pub struct Transformer<P, C> {
    plain: P,
    cipher: C,
    mapping: MappingStore,
    codec: EnvelopeCodec,
    policy: PolicyResolver,
    compression: Compression,
    memo: RefCell<HashMap<(Direction, Oid), Oid>>,
    passed: RefCell<HashSet<Oid>>,
    verified: RefCell<HashSet<ReuseKey>>,
    attr_cache: RefCell<HashMap<(Oid, String), Rc<AttributeFile>>>,
    stats: RefCell<TransformStats>,
}

impl<P: ObjectStore, C: ObjectStore> Transformer<P, C> {
    pub fn new(
        plain: P,
        cipher: C,
        mapping: MappingStore,
        codec: EnvelopeCodec,
        policy: PolicyResolver,
        compression: Compression,
    ) -> Self {
        Self {
            plain,
            cipher,
            mapping,
            codec,
            policy,
            compression,
            memo: RefCell::new(HashMap::new()),
            passed: RefCell::new(HashSet::new()),
            verified: RefCell::new(HashSet::new()),
            attr_cache: RefCell::new(HashMap::new()),
            stats: RefCell::new(TransformStats::default()),
        }
    }

    pub fn plain(&self) -> &P {
        &self.plain
    }

    pub fn cipher(&self) -> &C {
        &self.cipher
    }

    pub fn mapping(&self) -> &MappingStore {
        &self.mapping
    }

    pub fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    pub fn stats(&self) -> TransformStats {
        *self.stats.borrow()
    }

    /// (source, destination) for objects moving in `direction`.
    fn stores(&self, direction: Direction) -> (&dyn ObjectStore, &dyn ObjectStore) {
        match direction {
            Direction::Tauten => (&self.plain, &self.cipher),
            Direction::Regain => (&self.cipher, &self.plain),
        }
    }

    /// Counterpart of `oid` if it has been transformed in `direction`.
    /// Pass-through blobs have none.
    fn lookup(&self, direction: Direction, oid: &Oid) -> Result<Option<Oid>> {
        if let Some(found) = self.memo.borrow().get(&(direction, *oid)) {
            return Ok(Some(*found));
        }
        let found = self.mapping.try_get_bound(direction, oid)?;
        if let Some(found) = found {
            self.memo.borrow_mut().insert((direction, *oid), found);
        }
        Ok(found)
    }

    /// Like `lookup` but for objects that must already be mapped.
    fn mapped(&self, direction: Direction, oid: &Oid) -> Result<Oid> {
        self.lookup(direction, oid)?.ok_or_else(|| {
            ShroudError::Other(format!("{oid} was scheduled before its dependents but is unmapped"))
        })
    }

    fn record(&self, direction: Direction, from: &Oid, to: &Oid) -> Result<()> {
        self.mapping.put_same(direction, from, to)?;
        let mut memo = self.memo.borrow_mut();
        memo.insert((direction, *from), *to);
        memo.insert((direction.reverse(), *to), *from);
        Ok(())
    }

    /// Note that the blob `oid` was stored as-is.
    fn record_pass_through(&self, oid: &Oid) -> Result<()> {
        if self.passed.borrow_mut().insert(*oid) {
            self.mapping.put_pass_through(oid)?;
        }
        Ok(())
    }

    /// Write `data` to `dst` unless an identical object is already there.
    fn store_object(dst: &dyn ObjectStore, kind: ObjectKind, data: &[u8]) -> Result<Oid> {
        let oid = Oid::compute(kind, data);
        if dst.contains(&oid)? {
            return Ok(oid);
        }
        dst.write(kind, data)
    }

    /// Forget the per-run memo; the mapping store is the durable record.
    pub fn clear_memo(&self) {
        self.memo.borrow_mut().clear();
        self.passed.borrow_mut().clear();
        self.verified.borrow_mut().clear();
    }

    /// Transform any object reachable from a ref: commits, tags, and trees
    /// at the root path. Blobs carry no path and pass through.
    pub fn transform_object(&self, oid: &Oid, direction: Direction) -> Result<Oid> {
        let (src, dst) = self.stores(direction);
        match src.read(oid)?.kind {
            ObjectKind::Commit => self.transform_commit(oid, direction),
            ObjectKind::Tag => self.transform_tag(oid, direction),
            ObjectKind::Tree => self.transform_tree(oid, "", None, direction),
            ObjectKind::Blob => {
                if copy_object(src, dst, oid)? {
                    self.stats.borrow_mut().copied += 1;
                }
                Ok(*oid)
            }
        }
    }

    pub fn transform_commit(&self, commit: &Oid, direction: Direction) -> Result<Oid> {
        if let Some(done) = self.lookup(direction, commit)? {
            self.stats.borrow_mut().reused += 1;
            return Ok(done);
        }
        let (src, dst) = self.stores(direction);

        let mut work = vec![CommitFrame::Enter(*commit)];
        while let Some(frame) = work.pop() {
            match frame {
                CommitFrame::Enter(oid) => {
                    if self.lookup(direction, &oid)?.is_some() {
                        continue;
                    }
                    let data = src.read_kind(&oid, ObjectKind::Commit)?;
                    let header = CommitHeader::parse(&oid, &data)?;
                    let mut pending = Vec::new();
                    for parent in &header.parents {
                        if self.lookup(direction, parent)?.is_none() {
                            pending.push(CommitFrame::Enter(*parent));
                        }
                    }
                    work.push(CommitFrame::Exit { oid, data, header });
                    // first parent ends up on top and is walked first
                    work.extend(pending.into_iter().rev());
                }
                CommitFrame::Exit { oid, data, header } => {
                    if self.lookup(direction, &oid)?.is_some() {
                        continue;
                    }
                    let parents = header
                        .parents
                        .iter()
                        .map(|p| self.mapped(direction, p))
                        .collect::<Result<Vec<_>>>()?;

                    let base = match (direction, header.first_parent()) {
                        (Direction::Tauten, Some(parent)) => {
                            let parent_data = src.read_kind(&parent, ObjectKind::Commit)?;
                            Some(CommitHeader::parse(&parent, &parent_data)?.tree)
                        }
                        _ => None,
                    };
                    let tree = self.transform_tree(&header.tree, "", base, direction)?;

                    let rewritten = header.rewrite(&data, &tree, &parents);
                    let new_oid = Self::store_object(dst, ObjectKind::Commit, &rewritten)?;
                    self.record(direction, &oid, &new_oid)?;
                    self.stats.borrow_mut().commits += 1;
                    debug!(%direction, from = %oid, to = %new_oid, "commit");
                }
            }
        }
        self.mapped(direction, commit)
    }

    /// Transform the tree `tree` found at `path`. `base` is the tree at the
    /// same path in the first parent, used to find delta bases. Attribute
    /// files are collected from `tree` downwards only.
    pub fn transform_tree(
        &self,
        tree: &Oid,
        path: &str,
        base: Option<Oid>,
        direction: Direction,
    ) -> Result<Oid> {
        if let Some(done) = self.lookup(direction, tree)? {
            self.verify_reuse(tree, &done, path, &[], direction)?;
            self.stats.borrow_mut().reused += 1;
            return Ok(done);
        }
        let (src, dst) = self.stores(direction);

        let mut work = vec![TreeFrame::Enter {
            oid: *tree,
            path: path.to_string(),
            base,
            attrs: Vec::new(),
        }];
        while let Some(frame) = work.pop() {
            match frame {
                TreeFrame::Enter {
                    oid,
                    path,
                    base,
                    mut attrs,
                } => {
                    if let Some(done) = self.lookup(direction, &oid)? {
                        self.verify_reuse(&oid, &done, &path, &attrs, direction)?;
                        continue;
                    }
                    let data = src.read_kind(&oid, ObjectKind::Tree)?;
                    let entries = parse_tree(&oid, &data)?;

                    if let Some(file) = self.attribute_file(src, &entries, &path)? {
                        attrs.push(file);
                    }

                    let base_entries: HashMap<Vec<u8>, TreeEntry> = match base {
                        Some(base) if base != oid => {
                            let base_data = src.read_kind(&base, ObjectKind::Tree)?;
                            parse_tree(&base, &base_data)?
                                .into_iter()
                                .map(|e| (e.name.clone(), e))
                                .collect()
                        }
                        _ => HashMap::new(),
                    };

                    let mut pending = Vec::new();
                    for entry in entries.iter().filter(|e| e.kind == EntryKind::Tree) {
                        let sub_path = join_path(&path, &entry.name_lossy());
                        if let Some(done) = self.lookup(direction, &entry.oid)? {
                            self.verify_reuse(&entry.oid, &done, &sub_path, &attrs, direction)?;
                            self.stats.borrow_mut().reused += 1;
                            continue;
                        }
                        let sub_base = base_entries
                            .get(&entry.name)
                            .filter(|b| b.kind == EntryKind::Tree)
                            .map(|b| b.oid);
                        pending.push(TreeFrame::Enter {
                            oid: entry.oid,
                            path: sub_path,
                            base: sub_base,
                            attrs: attrs.clone(),
                        });
                    }
                    work.push(TreeFrame::Exit {
                        oid,
                        path,
                        entries,
                        base_entries,
                        attrs,
                    });
                    work.extend(pending);
                }
                TreeFrame::Exit {
                    oid,
                    path,
                    mut entries,
                    base_entries,
                    attrs,
                } => {
                    if self.lookup(direction, &oid)?.is_some() {
                        continue;
                    }
                    for entry in entries.iter_mut() {
                        entry.oid = match entry.kind {
                            EntryKind::Tree => self.mapped(direction, &entry.oid)?,
                            EntryKind::Gitlink => entry.oid,
                            EntryKind::Blob | EntryKind::Symlink => {
                                let entry_path = join_path(&path, &entry.name_lossy());
                                let decision = self.policy.resolve(&entry_path, &attrs);
                                let base = base_entries
                                    .get(&entry.name)
                                    .filter(|b| b.kind.is_blob_like())
                                    .map(|b| b.oid);
                                self.transform_blob(&entry.oid, &entry_path, &decision, base, direction)?
                            }
                        };
                    }
                    let rebuilt = write_tree(&entries);
                    let new_oid = Self::store_object(dst, ObjectKind::Tree, &rebuilt)?;
                    self.record(direction, &oid, &new_oid)?;
                    self.stats.borrow_mut().trees += 1;
                    debug!(%direction, path = %path, from = %oid, to = %new_oid, "tree");
                }
            }
        }
        self.mapped(direction, tree)
    }

    /// Check that `counterpart`, recorded for `tree` in an earlier context,
    /// is what `tree` becomes at `path` under the attribute files `attrs`
    /// (not counting `tree`'s own). A mismatch is a `PolicyConflict`: the
    /// mapping is a bijection, so one tree cannot have two counterparts.
    fn verify_reuse(
        &self,
        tree: &Oid,
        counterpart: &Oid,
        path: &str,
        attrs: &[Rc<AttributeFile>],
        direction: Direction,
    ) -> Result<()> {
        let (src, dst) = self.stores(direction);
        let mut work = vec![(*tree, *counterpart, path.to_string(), attrs.to_vec())];
        while let Some((oid, mapped, path, mut attrs)) = work.pop() {
            let key = (direction, oid, path.clone(), stack_key(&attrs));
            if self.verified.borrow().contains(&key) {
                continue;
            }
            let conflict = || ShroudError::PolicyConflict {
                direction,
                path: path.clone(),
                oid,
            };

            let entries = parse_tree(&oid, &src.read_kind(&oid, ObjectKind::Tree)?)?;
            let built = parse_tree(&mapped, &dst.read_kind(&mapped, ObjectKind::Tree)?)?;
            if entries.len() != built.len() {
                return Err(conflict());
            }
            if let Some(file) = self.attribute_file(src, &entries, &path)? {
                attrs.push(file);
            }
            for (entry, other) in entries.iter().zip(&built) {
                if entry.name != other.name || entry.kind != other.kind {
                    return Err(conflict());
                }
                let entry_path = join_path(&path, &entry.name_lossy());
                let expected = match entry.kind {
                    EntryKind::Tree => {
                        work.push((entry.oid, other.oid, entry_path, attrs.clone()));
                        continue;
                    }
                    EntryKind::Gitlink => Some(entry.oid),
                    EntryKind::Blob | EntryKind::Symlink => {
                        if self.policy.resolve(&entry_path, &attrs).encode {
                            self.lookup(direction, &entry.oid)?
                        } else {
                            Some(entry.oid)
                        }
                    }
                };
                if expected != Some(other.oid) {
                    debug!(%direction, path = %entry_path, "memoized tree does not fit its new path");
                    return Err(conflict());
                }
            }
            self.verified.borrow_mut().insert(key);
        }
        Ok(())
    }

    /// Parse the `.gitattributes` among `entries`, if there is one.
    fn attribute_file(
        &self,
        src: &dyn ObjectStore,
        entries: &[TreeEntry],
        dir: &str,
    ) -> Result<Option<Rc<AttributeFile>>> {
        let Some(entry) = entries
            .iter()
            .find(|e| e.kind == EntryKind::Blob && e.name == ATTRIBUTES_FILE.as_bytes())
        else {
            return Ok(None);
        };
        let key = (entry.oid, dir.to_string());
        if let Some(file) = self.attr_cache.borrow().get(&key) {
            return Ok(Some(file.clone()));
        }
        let data = src.read_kind(&entry.oid, ObjectKind::Blob)?;
        let file = Rc::new(AttributeFile::parse(dir, &String::from_utf8_lossy(&data)));
        self.attr_cache.borrow_mut().insert(key, file.clone());
        Ok(Some(file))
    }

    /// Transform an annotated tag and, through it, whatever it points at.
    pub fn transform_tag(&self, tag: &Oid, direction: Direction) -> Result<Oid> {
        if let Some(done) = self.lookup(direction, tag)? {
            self.stats.borrow_mut().reused += 1;
            return Ok(done);
        }
        let (src, dst) = self.stores(direction);

        // peel nested tags down to the first non-tag target
        let mut chain = Vec::new();
        let mut current = *tag;
        let target = loop {
            let data = src.read_kind(&current, ObjectKind::Tag)?;
            let header = TagHeader::parse(&current, &data)?;
            let (target, kind) = (header.target, header.target_kind);
            chain.push((current, data, header));
            if kind != ObjectKind::Tag || self.lookup(direction, &target)?.is_some() {
                break (target, kind);
            }
            current = target;
        };

        let mut new_target = match target {
            (oid, ObjectKind::Tag) => self.mapped(direction, &oid)?,
            (oid, ObjectKind::Commit) => self.transform_commit(&oid, direction)?,
            (oid, ObjectKind::Tree) => self.transform_tree(&oid, "", None, direction)?,
            (oid, ObjectKind::Blob) => {
                if copy_object(src, dst, &oid)? {
                    self.stats.borrow_mut().copied += 1;
                }
                oid
            }
        };

        for (oid, data, header) in chain.into_iter().rev() {
            let rewritten = header.rewrite(&data, &new_target);
            let new_oid = Self::store_object(dst, ObjectKind::Tag, &rewritten)?;
            self.record(direction, &oid, &new_oid)?;
            self.stats.borrow_mut().tags += 1;
            debug!(%direction, from = %oid, to = %new_oid, "tag");
            new_target = new_oid;
        }
        Ok(new_target)
    }
}
