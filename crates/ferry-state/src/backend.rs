//! State backend trait definition.
//!
//! [`StateBackend`] defines the storage contract for migration entities,
//! their per-pipeline trackers, recorded failures and deferred user
//! references. Model types live in [`ferry_types`].

use ferry_types::entity::{Entity, EntityId, EntityRegistration, EntityStatus, NewEntity};
use ferry_types::failure::{Failure, NewFailure};
use ferry_types::identity::PlaceholderReference;
use ferry_types::page::PageInfo;
use ferry_types::tracker::{PipelineKind, Tracker, TrackerId, TrackerStatus};

use crate::error;

/// Storage contract for migration state.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
pub trait StateBackend: Send + Sync {
    /// Register an entity. Idempotent on (migration, source path,
    /// destination namespace, destination slug): registering the same entity
    /// twice returns the existing row with `created = false`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn create_entity(&self, entity: &NewEntity) -> error::Result<EntityRegistration>;

    /// Read an entity by id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_entity(&self, id: EntityId) -> error::Result<Option<Entity>>;

    /// List the entities of a migration in registration order, optionally
    /// filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_entities(
        &self,
        migration: &str,
        status: Option<EntityStatus>,
    ) -> error::Result<Vec<Entity>>;

    /// Update an entity's lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotFound`](crate::error::StateError::NotFound)
    /// if the entity does not exist.
    fn set_entity_status(&self, id: EntityId, status: EntityStatus) -> error::Result<()>;

    /// Delete an entity together with its trackers, failures, placeholder
    /// references and child entities. Returns `false` if nothing was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn delete_entity(&self, id: EntityId) -> error::Result<bool>;

    /// Fetch the tracker for (entity, pipeline kind), creating it in the
    /// `created` state if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_or_create_tracker(
        &self,
        entity_id: EntityId,
        kind: &PipelineKind,
        stage: u32,
    ) -> error::Result<Tracker>;

    /// Read a tracker by id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_tracker(&self, id: TrackerId) -> error::Result<Option<Tracker>>;

    /// List an entity's trackers ordered by stage.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_trackers(&self, entity_id: EntityId) -> error::Result<Vec<Tracker>>;

    /// Update a tracker's status without touching its cursor.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotFound`](crate::error::StateError::NotFound)
    /// if the tracker does not exist.
    fn set_tracker_status(&self, id: TrackerId, status: TrackerStatus) -> error::Result<()>;

    /// Persist a page boundary: store the cursor and add the page's counts
    /// in one transaction. Callers invoke this only after every record of
    /// the page has been loaded or recorded as a failure.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotFound`](crate::error::StateError::NotFound)
    /// if the tracker does not exist.
    fn advance_tracker(
        &self,
        id: TrackerId,
        page_info: &PageInfo,
        seen_delta: u64,
        imported_delta: u64,
    ) -> error::Result<Tracker>;

    /// Record a failure.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn insert_failure(&self, failure: &NewFailure) -> error::Result<Failure>;

    /// List an entity's failures in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_failures(&self, entity_id: EntityId) -> error::Result<Vec<Failure>>;

    /// Queue placeholder references for reconciliation. Replaying the same
    /// reference is a no-op. Returns the count newly inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn insert_placeholder_references(&self, refs: &[PlaceholderReference]) -> error::Result<u64>;

    /// List an entity's queued placeholder references.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_placeholder_references(
        &self,
        entity_id: EntityId,
    ) -> error::Result<Vec<PlaceholderReference>>;
}
