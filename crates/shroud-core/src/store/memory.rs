use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ObjectStore, RawObject};
use shroud_types::error::{Result, ShroudError};
use shroud_types::{ObjectKind, Oid};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| ShroudError::Other("memory store lock poisoned".into()))
}

#[derive(Debug, Clone)]
enum RefTarget {
    Direct(Oid),
    Symbolic(String),
}

/// In-memory object store. Computes real git oids, so objects written here
/// hash identically to a [`GitStore`](super::GitStore).
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<Oid, RawObject>>,
    refs: Mutex<BTreeMap<String, RefTarget>>,
    writes: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `write` calls so far, including ones that stored nothing new.
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn object_count(&self) -> usize {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn resolve(&self, name: &str) -> Result<Option<Oid>> {
        let refs = lock(&self.refs)?;
        let mut current = name.to_string();
        // bounded like git's symref depth limit
        for _ in 0..5 {
            match refs.get(&current) {
                None => return Ok(None),
                Some(RefTarget::Direct(oid)) => return Ok(Some(*oid)),
                Some(RefTarget::Symbolic(next)) => current = next.clone(),
            }
        }
        Ok(None)
    }
}

impl ObjectStore for MemoryStore {
    fn read(&self, oid: &Oid) -> Result<RawObject> {
        lock(&self.objects)?
            .get(oid)
            .cloned()
            .ok_or(ShroudError::ObjectNotFound(*oid))
    }

    fn write(&self, kind: ObjectKind, data: &[u8]) -> Result<Oid> {
        let oid = Oid::compute(kind, data);
        *lock(&self.writes)? += 1;
        lock(&self.objects)?
            .entry(oid)
            .or_insert_with(|| RawObject {
                kind,
                data: data.to_vec(),
            });
        Ok(oid)
    }

    fn contains(&self, oid: &Oid) -> Result<bool> {
        Ok(lock(&self.objects)?.contains_key(oid))
    }

    fn reference(&self, name: &str) -> Result<Option<Oid>> {
        self.resolve(name)
    }

    fn symbolic_target(&self, name: &str) -> Result<Option<String>> {
        Ok(match lock(&self.refs)?.get(name) {
            Some(RefTarget::Symbolic(target)) => Some(target.clone()),
            _ => None,
        })
    }

    fn set_reference(&self, name: &str, oid: &Oid, _log_message: &str) -> Result<()> {
        lock(&self.refs)?.insert(name.to_string(), RefTarget::Direct(*oid));
        Ok(())
    }

    fn set_symbolic_reference(&self, name: &str, target: &str, _log_message: &str) -> Result<()> {
        lock(&self.refs)?.insert(name.to_string(), RefTarget::Symbolic(target.to_string()));
        Ok(())
    }

    fn delete_reference(&self, name: &str) -> Result<()> {
        lock(&self.refs)?.remove(name);
        Ok(())
    }

    fn references(&self, prefix: &str) -> Result<Vec<(String, Oid)>> {
        let refs = lock(&self.refs)?;
        Ok(refs
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .filter_map(|(name, target)| match target {
                RefTarget::Direct(oid) => Some((name.clone(), *oid)),
                RefTarget::Symbolic(_) => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_roundtrip_uses_git_hash() {
        let store = MemoryStore::new();
        let oid = store.write(ObjectKind::Blob, b"").unwrap();
        assert_eq!(oid.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
        let obj = store.read(&oid).unwrap();
        assert_eq!(obj.kind, ObjectKind::Blob);
        assert!(obj.data.is_empty());
    }

    #[test]
    fn missing_object_is_not_found() {
        let store = MemoryStore::new();
        let oid = Oid([9; 20]);
        assert!(!store.contains(&oid).unwrap());
        assert!(matches!(
            store.read(&oid),
            Err(ShroudError::ObjectNotFound(o)) if o == oid
        ));
    }

    #[test]
    fn symbolic_refs_resolve() {
        let store = MemoryStore::new();
        let oid = store.write(ObjectKind::Blob, b"x").unwrap();
        store
            .set_symbolic_reference("HEAD", "refs/heads/main", "")
            .unwrap();
        assert_eq!(store.reference("HEAD").unwrap(), None);
        store.set_reference("refs/heads/main", &oid, "").unwrap();
        assert_eq!(store.reference("HEAD").unwrap(), Some(oid));
        assert_eq!(
            store.symbolic_target("HEAD").unwrap().as_deref(),
            Some("refs/heads/main")
        );
        assert_eq!(store.symbolic_target("refs/heads/main").unwrap(), None);
    }

    #[test]
    fn references_filter_by_prefix_and_skip_symbolic() {
        let store = MemoryStore::new();
        let oid = store.write(ObjectKind::Blob, b"x").unwrap();
        store.set_reference("refs/heads/b", &oid, "").unwrap();
        store.set_reference("refs/heads/a", &oid, "").unwrap();
        store.set_reference("refs/tags/v1", &oid, "").unwrap();
        store
            .set_symbolic_reference("refs/heads/alias", "refs/heads/a", "")
            .unwrap();
        let names: Vec<_> = store
            .references("refs/heads/")
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, ["refs/heads/a", "refs/heads/b"]);
    }

    #[test]
    fn poisoned_lock_is_an_error() {
        let store = MemoryStore::new();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = store.refs.lock().unwrap();
            panic!("poison the ref table");
        }));
        assert!(matches!(store.reference("HEAD"), Err(ShroudError::Other(_))));
        assert_eq!(store.object_count(), 0);
    }
}
