pub mod config;
pub mod engine;
pub mod mapping;
pub mod object;
pub mod policy;
pub mod store;
pub mod transform;

pub use engine::{Engine, EngineOptions, Reveal, StagedRef};
pub use mapping::MappingStore;
pub use store::{GitStore, MemoryStore, ObjectStore};
pub use transform::TransformStats;

pub use shroud_types::{Direction, ObjectKind, Oid, Result, ShroudError};

#[cfg(test)]
mod tests;
#[cfg(test)]
mod testutil;
