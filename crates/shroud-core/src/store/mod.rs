pub mod git;
pub mod memory;

use shroud_types::error::{Result, ShroudError};
use shroud_types::{ObjectKind, Oid};

pub use git::GitStore;
pub use memory::MemoryStore;

/// An object read out of a store. Owns its bytes; holds no handle back
/// into the store it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObject {
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

/// Content-addressed object storage plus refs.
pub trait ObjectStore {
    /// Read an object. Fails with `ObjectNotFound` when absent.
    fn read(&self, oid: &Oid) -> Result<RawObject>;

    /// Write an object body and return its oid.
    fn write(&self, kind: ObjectKind, data: &[u8]) -> Result<Oid>;

    fn contains(&self, oid: &Oid) -> Result<bool>;

    /// Resolve `name`, following symbolic refs. `None` if absent or unborn.
    fn reference(&self, name: &str) -> Result<Option<Oid>>;

    /// Target of a symbolic ref, `None` if `name` is direct or absent.
    fn symbolic_target(&self, name: &str) -> Result<Option<String>>;

    /// Create or force-update a direct ref.
    fn set_reference(&self, name: &str, oid: &Oid, log_message: &str) -> Result<()>;

    fn set_symbolic_reference(&self, name: &str, target: &str, log_message: &str) -> Result<()>;

    /// Remove a ref. Absent refs are not an error.
    fn delete_reference(&self, name: &str) -> Result<()>;

    /// Direct refs whose names start with `prefix`, sorted by name.
    fn references(&self, prefix: &str) -> Result<Vec<(String, Oid)>>;

    /// Read an object and insist on its kind.
    fn read_kind(&self, oid: &Oid, expected: ObjectKind) -> Result<Vec<u8>> {
        let obj = self.read(oid)?;
        if obj.kind != expected {
            return Err(ShroudError::UnexpectedKind {
                oid: *oid,
                expected,
                found: obj.kind,
            });
        }
        Ok(obj.data)
    }
}

impl<S: ObjectStore + ?Sized> ObjectStore for &S {
    fn read(&self, oid: &Oid) -> Result<RawObject> {
        (**self).read(oid)
    }
    fn write(&self, kind: ObjectKind, data: &[u8]) -> Result<Oid> {
        (**self).write(kind, data)
    }
    fn contains(&self, oid: &Oid) -> Result<bool> {
        (**self).contains(oid)
    }
    fn reference(&self, name: &str) -> Result<Option<Oid>> {
        (**self).reference(name)
    }
    fn symbolic_target(&self, name: &str) -> Result<Option<String>> {
        (**self).symbolic_target(name)
    }
    fn set_reference(&self, name: &str, oid: &Oid, log_message: &str) -> Result<()> {
        (**self).set_reference(name, oid, log_message)
    }
    fn set_symbolic_reference(&self, name: &str, target: &str, log_message: &str) -> Result<()> {
        (**self).set_symbolic_reference(name, target, log_message)
    }
    fn delete_reference(&self, name: &str) -> Result<()> {
        (**self).delete_reference(name)
    }
    fn references(&self, prefix: &str) -> Result<Vec<(String, Oid)>> {
        (**self).references(prefix)
    }
}

/// Copy an object byte-for-byte from `src` into `dst` unless it is already
/// there. The copy must land under the same oid.
pub fn copy_object(src: &dyn ObjectStore, dst: &dyn ObjectStore, oid: &Oid) -> Result<bool> {
    if dst.contains(oid)? {
        return Ok(false);
    }
    let obj = src.read(oid)?;
    let written = dst.write(obj.kind, &obj.data)?;
    if written != *oid {
        return Err(ShroudError::Other(format!(
            "copying {oid} produced {written}; stores disagree on object hashing"
        )));
    }
    Ok(true)
}
