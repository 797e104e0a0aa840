//! Persistent bijection between plaintext and ciphertext oids, plus the
//! small amount of ref bookkeeping the engine keeps between runs.

use std::path::{Path, PathBuf};

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};
use tracing::debug;

use shroud_types::error::{Result, ShroudError};
use shroud_types::{Direction, Oid};

/// plain oid -> cipher oid
const TAUTENED: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tautened");
/// cipher oid -> plain oid
const REGAINED: TableDefinition<&[u8], &[u8]> = TableDefinition::new("regained");
/// blobs stored as-is; they map to themselves in both directions
const PASSED: TableDefinition<&[u8], ()> = TableDefinition::new("passed");
/// staging ref names of the last outbound batch, in staging order
const OUTBOUND: TableDefinition<u32, &str> = TableDefinition::new("outbound_batch");

fn forward(direction: Direction) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
    match direction {
        Direction::Tauten => TAUTENED,
        Direction::Regain => REGAINED,
    }
}

/// Two redb tables kept mutually inverse, and an insert-only set of
/// pass-through blobs. Entries are written once and never rebound.
pub struct MappingStore {
    db: Database,
    path: PathBuf,
}

impl MappingStore {
    /// Open or create the database at `path`, creating parent directories
    /// and both tables.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(&path).map_err(ShroudError::store)?;

        let txn = db.begin_write().map_err(ShroudError::store)?;
        {
            txn.open_table(TAUTENED).map_err(ShroudError::store)?;
            txn.open_table(REGAINED).map_err(ShroudError::store)?;
            txn.open_table(PASSED).map_err(ShroudError::store)?;
            txn.open_table(OUTBOUND).map_err(ShroudError::store)?;
        }
        txn.commit().map_err(ShroudError::store)?;

        debug!(path = %path.display(), "opened mapping store");
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has(&self, direction: Direction, oid: &Oid) -> Result<bool> {
        Ok(self.try_get(direction, oid)?.is_some())
    }

    /// Where `oid` went when moved in `direction`, if it has been. A
    /// pass-through blob with no bound counterpart answers itself.
    pub fn try_get(&self, direction: Direction, oid: &Oid) -> Result<Option<Oid>> {
        if let Some(bound) = self.try_get_bound(direction, oid)? {
            return Ok(Some(bound));
        }
        Ok(self.is_pass_through(oid)?.then_some(*oid))
    }

    /// Like `try_get`, ignoring pass-through entries.
    pub fn try_get_bound(&self, direction: Direction, oid: &Oid) -> Result<Option<Oid>> {
        let txn = self.db.begin_read().map_err(ShroudError::store)?;
        let table = txn.open_table(forward(direction)).map_err(ShroudError::store)?;
        lookup(&table, oid)
    }

    pub fn is_pass_through(&self, oid: &Oid) -> Result<bool> {
        let txn = self.db.begin_read().map_err(ShroudError::store)?;
        let table = txn.open_table(PASSED).map_err(ShroudError::store)?;
        let found = table.get(oid.as_bytes()).map_err(ShroudError::store)?;
        Ok(found.is_some())
    }

    /// Record that the blob `oid` was stored as-is. Kept apart from the
    /// bound pairs, so the same blob may also be encoded at another path.
    pub fn put_pass_through(&self, oid: &Oid) -> Result<()> {
        let txn = self.db.begin_write().map_err(ShroudError::store)?;
        let inserted = {
            let mut table = txn.open_table(PASSED).map_err(ShroudError::store)?;
            let existing = table
                .insert(oid.as_bytes(), ())
                .map_err(ShroudError::store)?;
            existing.is_none()
        };
        if inserted {
            txn.commit().map_err(ShroudError::store)
        } else {
            txn.abort().map_err(ShroudError::store)
        }
    }

    /// Record that `a` becomes `b` in `direction` (and `b` becomes `a` in
    /// reverse). Re-recording the same pair is a no-op; binding either side
    /// to something else fails with `MappingConflict` and writes nothing.
    pub fn put_same(&self, direction: Direction, a: &Oid, b: &Oid) -> Result<()> {
        let txn = self.db.begin_write().map_err(ShroudError::store)?;
        match bind(&txn, direction, a, b) {
            Ok(true) => txn.commit().map_err(ShroudError::store),
            Ok(false) => txn.abort().map_err(ShroudError::store),
            Err(e) => {
                txn.abort().map_err(ShroudError::store)?;
                Err(e)
            }
        }
    }

    /// Replace the recorded outbound batch with `staged`.
    pub fn record_outbound_batch(&self, staged: &[String]) -> Result<()> {
        let txn = self.db.begin_write().map_err(ShroudError::store)?;
        txn.delete_table(OUTBOUND).map_err(ShroudError::store)?;
        {
            let mut table = txn.open_table(OUTBOUND).map_err(ShroudError::store)?;
            for (i, name) in (0u32..).zip(staged) {
                table.insert(i, name.as_str()).map_err(ShroudError::store)?;
            }
        }
        txn.commit().map_err(ShroudError::store)
    }

    /// Staging ref names of the last outbound batch.
    pub fn outbound_batch(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read().map_err(ShroudError::store)?;
        let table = txn.open_table(OUTBOUND).map_err(ShroudError::store)?;
        let mut names = Vec::new();
        for row in table.iter().map_err(ShroudError::store)? {
            let (_, name) = row.map_err(ShroudError::store)?;
            names.push(name.value().to_string());
        }
        Ok(names)
    }

    /// Drop every mapping and pass-through entry.
    pub fn truncate(&self) -> Result<()> {
        let txn = self.db.begin_write().map_err(ShroudError::store)?;
        txn.delete_table(TAUTENED).map_err(ShroudError::store)?;
        txn.delete_table(REGAINED).map_err(ShroudError::store)?;
        txn.delete_table(PASSED).map_err(ShroudError::store)?;
        {
            txn.open_table(TAUTENED).map_err(ShroudError::store)?;
            txn.open_table(REGAINED).map_err(ShroudError::store)?;
            txn.open_table(PASSED).map_err(ShroudError::store)?;
        }
        txn.commit().map_err(ShroudError::store)?;
        debug!(path = %self.path.display(), "truncated mapping store");
        Ok(())
    }

    /// Number of bound pairs recorded for `direction`.
    pub fn len(&self, direction: Direction) -> Result<u64> {
        let txn = self.db.begin_read().map_err(ShroudError::store)?;
        let table = txn.open_table(forward(direction)).map_err(ShroudError::store)?;
        table.len().map_err(ShroudError::store)
    }

    pub fn pass_through_len(&self) -> Result<u64> {
        let txn = self.db.begin_read().map_err(ShroudError::store)?;
        let table = txn.open_table(PASSED).map_err(ShroudError::store)?;
        table.len().map_err(ShroudError::store)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len(Direction::Tauten)? == 0
            && self.len(Direction::Regain)? == 0
            && self.pass_through_len()? == 0)
    }
}

/// Insert both halves of the pair. Returns whether anything new was written.
fn bind(txn: &WriteTransaction, direction: Direction, a: &Oid, b: &Oid) -> Result<bool> {
    let mut fwd = txn.open_table(forward(direction)).map_err(ShroudError::store)?;
    let mut rev = txn
        .open_table(forward(direction.reverse()))
        .map_err(ShroudError::store)?;

    let existing_fwd = lookup(&fwd, a)?;
    let existing_rev = lookup(&rev, b)?;
    check(direction, a, b, existing_fwd)?;
    check(direction.reverse(), b, a, existing_rev)?;
    if existing_fwd.is_some() && existing_rev.is_some() {
        return Ok(false);
    }

    fwd.insert(a.as_bytes(), b.as_bytes())
        .map_err(ShroudError::store)?;
    rev.insert(b.as_bytes(), a.as_bytes())
        .map_err(ShroudError::store)?;
    Ok(true)
}

fn lookup(table: &impl ReadableTable<&'static [u8], &'static [u8]>, oid: &Oid) -> Result<Option<Oid>> {
    let value = table.get(oid.as_bytes()).map_err(ShroudError::store)?;
    value.map(|v| Oid::from_slice(v.value())).transpose()
}

fn check(direction: Direction, oid: &Oid, attempted: &Oid, existing: Option<Oid>) -> Result<()> {
    match existing {
        Some(existing) if existing != *attempted => Err(ShroudError::MappingConflict {
            direction,
            oid: *oid,
            existing,
            attempted: *attempted,
        }),
        _ => Ok(()),
    }
}
