//! Mnemo Curator - autonomous memory curation for LLM applications
//!
//! Decides, for every candidate fact extracted from a conversation, whether
//! it becomes a new memory, refines or merges into an existing one, or is
//! discarded, and later which stored memories are evicted.

pub mod categorizer;
pub mod config;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod scoring;
pub mod storage;
pub mod tagger;
pub mod testing;
pub mod text;

pub use error::{CuratorError, Result};
pub use pipeline::CurationPipeline;
