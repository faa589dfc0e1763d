//! Destination persistence contract.
//!
//! The destination instance is treated as an opaque store with
//! create/read/save operations. The engine never reaches past this trait.

use std::path::Path;

use ferry_types::entity::EntityKind;
use ferry_types::identity::DestinationUserId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error;

/// A top-level destination object (group or project namespace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationObject {
    pub id: i64,
    pub full_path: String,
    pub kind: EntityKind,
    pub attributes: Value,
}

/// Outcome of an idempotent create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOutcome {
    pub id: i64,
    /// `false` when the object already existed.
    pub created: bool,
}

/// Metadata of an imported binary bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleInfo {
    pub size: u64,
    /// Lowercase hex SHA-256 of the bundle contents.
    pub sha256: String,
}

/// A record stored under a destination path and relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    pub key: String,
    pub data: Value,
}

/// Storage contract for the destination instance.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn DestinationStore>`.
pub trait DestinationStore: Send + Sync {
    /// Look up a namespace by full path.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn find_namespace(&self, full_path: &str) -> error::Result<Option<DestinationObject>>;

    /// Create a namespace, or return the existing one with `created = false`.
    /// A concurrent creation of the same path is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn create_namespace(
        &self,
        full_path: &str,
        kind: EntityKind,
        attributes: &Value,
    ) -> error::Result<CreateOutcome>;

    /// Whether `relation` under `full_path` already has content (records or
    /// an imported bundle).
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn exists(&self, full_path: &str, relation: &str) -> error::Result<bool>;

    /// Read a record by key.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn find_record(&self, full_path: &str, relation: &str, key: &str)
        -> error::Result<Option<Value>>;

    /// Insert or replace a record, returning its row id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn save_record(
        &self,
        full_path: &str,
        relation: &str,
        key: &str,
        data: &Value,
    ) -> error::Result<i64>;

    /// Page through a relation's records in id order, starting after `after_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_records(
        &self,
        full_path: &str,
        relation: &str,
        after_id: i64,
        limit: usize,
    ) -> error::Result<Vec<StoredRecord>>;

    /// Create the relation's content from a validated bundle file.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage or I/O failure.
    fn import_bundle(&self, full_path: &str, relation: &str, bundle: &Path)
        -> error::Result<BundleInfo>;

    /// Find a destination user by (case-insensitive) email.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn find_user_by_email(&self, email: &str) -> error::Result<Option<DestinationUserId>>;
}
