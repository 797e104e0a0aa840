pub mod error;
pub mod oid;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use error::{Result, ShroudError};
pub use oid::{ObjectKind, Oid, OID_LEN};

/// Which way an object travels between the two stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Plaintext store to ciphertext store (before a push).
    Tauten,
    /// Ciphertext store to plaintext store (after a fetch).
    Regain,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::Tauten => Direction::Regain,
            Direction::Regain => Direction::Tauten,
        }
    }

    /// Ref namespace the direction stages its results under.
    pub const fn staging_prefix(self) -> &'static str {
        match self {
            Direction::Tauten => "refs/staged-out/",
            Direction::Regain => "refs/staged-in/",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Tauten => f.write_str("tauten"),
            Direction::Regain => f.write_str("regain"),
        }
    }
}
