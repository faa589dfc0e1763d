//! Shared ferry model types.
//!
//! Pure data used by the state backend, the pipeline engine and the CLI.
//! Kept free of I/O so every crate in the workspace can depend on it.

pub mod entity;
pub mod error;
pub mod failure;
pub mod identity;
pub mod page;
pub mod summary;
pub mod tracker;
