use std::path::{Path, PathBuf};

use git2::{ErrorCode, ObjectType, Repository};
use tracing::debug;

use super::{ObjectStore, RawObject};
use shroud_types::error::{Result, ShroudError};
use shroud_types::{ObjectKind, Oid};

/// Object store backed by an on-disk git repository.
pub struct GitStore {
    repo: Repository,
}

fn to_git(oid: &Oid) -> Result<git2::Oid> {
    git2::Oid::from_bytes(oid.as_bytes()).map_err(ShroudError::store)
}

fn from_git(oid: git2::Oid) -> Result<Oid> {
    Oid::from_slice(oid.as_bytes())
}

fn kind_to_git(kind: ObjectKind) -> ObjectType {
    match kind {
        ObjectKind::Blob => ObjectType::Blob,
        ObjectKind::Tree => ObjectType::Tree,
        ObjectKind::Commit => ObjectType::Commit,
        ObjectKind::Tag => ObjectType::Tag,
    }
}

fn kind_from_git(kind: ObjectType, oid: &Oid) -> Result<ObjectKind> {
    match kind {
        ObjectType::Blob => Ok(ObjectKind::Blob),
        ObjectType::Tree => Ok(ObjectKind::Tree),
        ObjectType::Commit => Ok(ObjectKind::Commit),
        ObjectType::Tag => Ok(ObjectKind::Tag),
        other => Err(ShroudError::Other(format!(
            "object {oid} has unsupported type {other:?}"
        ))),
    }
}

impl GitStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let repo = Repository::open(path.as_ref()).map_err(ShroudError::store)?;
        Ok(Self { repo })
    }

    pub fn init(path: impl AsRef<Path>) -> Result<Self> {
        let repo = Repository::init(path.as_ref()).map_err(ShroudError::store)?;
        Ok(Self { repo })
    }

    pub fn init_bare(path: impl AsRef<Path>) -> Result<Self> {
        let repo = Repository::init_bare(path.as_ref()).map_err(ShroudError::store)?;
        Ok(Self { repo })
    }

    /// The repository's `objects/` directory.
    pub fn objects_dir(&self) -> PathBuf {
        self.repo.path().join("objects")
    }

    /// Make objects under `objects_dir` readable through this store for the
    /// lifetime of the handle. Nothing is written to disk.
    pub fn add_alternate(&self, objects_dir: &Path) -> Result<()> {
        let dir = objects_dir.to_str().ok_or_else(|| {
            ShroudError::Config(format!(
                "alternate path is not valid UTF-8: {}",
                objects_dir.display()
            ))
        })?;
        let odb = self.repo.odb().map_err(ShroudError::store)?;
        odb.add_disk_alternate(dir).map_err(ShroudError::store)?;
        debug!(alternate = dir, "registered object alternate");
        Ok(())
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }
}

impl ObjectStore for GitStore {
    fn read(&self, oid: &Oid) -> Result<RawObject> {
        let odb = self.repo.odb().map_err(ShroudError::store)?;
        let obj = match odb.read(to_git(oid)?) {
            Ok(obj) => obj,
            Err(e) if e.code() == ErrorCode::NotFound => {
                return Err(ShroudError::ObjectNotFound(*oid))
            }
            Err(e) => return Err(ShroudError::store(e)),
        };
        Ok(RawObject {
            kind: kind_from_git(obj.kind(), oid)?,
            data: obj.data().to_vec(),
        })
    }

    fn write(&self, kind: ObjectKind, data: &[u8]) -> Result<Oid> {
        let odb = self.repo.odb().map_err(ShroudError::store)?;
        let oid = odb
            .write(kind_to_git(kind), data)
            .map_err(ShroudError::store)?;
        from_git(oid)
    }

    fn contains(&self, oid: &Oid) -> Result<bool> {
        let odb = self.repo.odb().map_err(ShroudError::store)?;
        Ok(odb.exists(to_git(oid)?))
    }

    fn reference(&self, name: &str) -> Result<Option<Oid>> {
        let reference = match self.repo.find_reference(name) {
            Ok(r) => r,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(ShroudError::store(e)),
        };
        let resolved = match reference.resolve() {
            Ok(r) => r,
            // unborn branch behind a symbolic ref
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(ShroudError::store(e)),
        };
        resolved.target().map(from_git).transpose()
    }

    fn symbolic_target(&self, name: &str) -> Result<Option<String>> {
        match self.repo.find_reference(name) {
            Ok(r) => Ok(r.symbolic_target().map(str::to_string)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(ShroudError::store(e)),
        }
    }

    fn set_reference(&self, name: &str, oid: &Oid, log_message: &str) -> Result<()> {
        if name == "HEAD" {
            self.repo
                .set_head_detached(to_git(oid)?)
                .map_err(ShroudError::store)?;
            return Ok(());
        }
        self.repo
            .reference(name, to_git(oid)?, true, log_message)
            .map_err(ShroudError::store)?;
        Ok(())
    }

    fn set_symbolic_reference(&self, name: &str, target: &str, log_message: &str) -> Result<()> {
        self.repo
            .reference_symbolic(name, target, true, log_message)
            .map_err(ShroudError::store)?;
        Ok(())
    }

    fn delete_reference(&self, name: &str) -> Result<()> {
        match self.repo.find_reference(name) {
            Ok(mut r) => r.delete().map_err(ShroudError::store),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(()),
            Err(e) => Err(ShroudError::store(e)),
        }
    }

    fn references(&self, prefix: &str) -> Result<Vec<(String, Oid)>> {
        let mut out = Vec::new();
        for reference in self.repo.references().map_err(ShroudError::store)? {
            let reference = reference.map_err(ShroudError::store)?;
            let (Some(name), Some(target)) = (reference.name(), reference.target()) else {
                continue;
            };
            if name.starts_with(prefix) {
                out.push((name.to_string(), from_git(target)?));
            }
        }
        out.sort();
        Ok(out)
    }
}
