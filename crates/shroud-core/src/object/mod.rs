//! Raw git object bodies: just enough parsing to swap the oids an object
//! points at while leaving every other byte as it was.

pub mod commit;
pub mod tree;

pub use commit::{CommitHeader, TagHeader};
pub use tree::{EntryKind, TreeEntry};

use shroud_types::error::ShroudError;
use shroud_types::{ObjectKind, Oid};

pub(crate) fn malformed(kind: ObjectKind, oid: &Oid, reason: impl Into<String>) -> ShroudError {
    ShroudError::MalformedObject {
        kind,
        oid: *oid,
        reason: reason.into(),
    }
}
