//! Memory records and the values that flow through curation

pub mod tombstone;
pub mod types;

pub use tombstone::{EvictionReason, Tombstone};
pub use types::{
    Candidate, CategoryPath, ContextProfile, DedupAction, IngestOutcome, MemoryRecord,
    RetentionClass, SourceContext, StructuralPattern, TopCategory,
};
