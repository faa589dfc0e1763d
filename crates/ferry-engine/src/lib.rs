//! Resumable extract/transform/load engine for moving groups and projects
//! between instances.

pub mod catalog;
pub mod config;
pub mod context;
pub mod errors;
pub mod extractors;
pub mod identity;
pub mod loaders;
pub mod orchestrator;
pub mod pipeline;
pub mod references;
pub mod resolve;
pub mod source;
pub mod stager;
pub mod summary;
pub mod transformers;
pub mod url_guard;

#[cfg(test)]
mod testing;

// Re-export public API for convenience
pub use errors::EngineError;
pub use orchestrator::{cancel_entity, check_migration, resume_entity, CheckResult, Migration};
pub use summary::build_summary;
