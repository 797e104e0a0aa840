use thiserror::Error;

use crate::oid::{ObjectKind, Oid};
use crate::Direction;

pub type Result<T> = std::result::Result<T, ShroudError>;

#[derive(Debug, Error)]
pub enum ShroudError {
    #[error("payload of {size} bytes exceeds the envelope limit of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("corrupt envelope: {0}")]
    CorruptEnvelope(String),

    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    #[error(
        "oid mapping conflict ({direction}): {oid} is bound to {existing}, refusing to rebind to {attempted}"
    )]
    MappingConflict {
        direction: Direction,
        oid: Oid,
        existing: Oid,
        attempted: Oid,
    },

    #[error(
        "policy conflict ({direction}): tree {oid} at '{path}' was already transformed under different attributes"
    )]
    PolicyConflict {
        direction: Direction,
        path: String,
        oid: Oid,
    },

    #[error("requested {requested} for '{name}' but the engine computed {computed}")]
    RequestedOidMismatch {
        name: String,
        requested: Oid,
        computed: Oid,
    },

    #[error("store I/O error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("object not found: {0}")]
    ObjectNotFound(Oid),

    #[error("expected {expected} object at {oid}, found {found}")]
    UnexpectedKind {
        oid: Oid,
        expected: ObjectKind,
        found: ObjectKind,
    },

    #[error("malformed {kind} object {oid}: {reason}")]
    MalformedObject {
        kind: ObjectKind,
        oid: Oid,
        reason: String,
    },

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("key trait mismatch for site '{site}': the supplied secret does not match this site")]
    KeyTraitMismatch { site: String },

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("unknown compression tag: {0}")]
    UnknownCompressionTag(u8),

    #[error("invalid object id: {0}")]
    InvalidOid(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ShroudError {
    /// Wrap an object-store or key-value engine failure.
    pub fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ShroudError::Store(Box::new(err))
    }

    pub fn corrupt(reason: impl Into<String>) -> Self {
        ShroudError::CorruptEnvelope(reason.into())
    }
}
