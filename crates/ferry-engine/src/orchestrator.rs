//! Migration orchestrator: registers entities, freezes the identity cache,
//! then drives every entity's pipelines in stage order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use anyhow::anyhow;
use ferry_state::{DestinationStore, StateBackend};
use ferry_types::entity::{Entity, EntityId, EntityKind, EntityStatus, NewEntity};
use ferry_types::error::MigrationError;
use ferry_types::failure::{NewFailure, PipelineStep};
use ferry_types::summary::{MigrationSummary, TrackerResult};
use ferry_types::tracker::{PipelineKind, TrackerStatus};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::catalog::{PipelineRegistry, PipelineSpec};
use crate::config::types::MigrationConfig;
use crate::context::{MigrationRun, PipelineContext, RunSettings};
use crate::errors::EngineError;
use crate::identity::{populate_identity_cache, IdentityCache};
use crate::resolve;
use crate::source::SourceClient;
use crate::summary::build_summary;

/// One configured migration, bound to its clients and stores.
pub struct Migration {
    settings: RunSettings,
    registry: Arc<PipelineRegistry>,
    entities: Vec<NewEntity>,
    source: Arc<dyn SourceClient>,
    destination: Arc<dyn DestinationStore>,
    state: Arc<dyn StateBackend>,
    identities: IdentityCache,
}

impl Migration {
    /// Bind a validated config to explicit clients and stores.
    ///
    /// # Errors
    ///
    /// Returns an error if run settings cannot be resolved from `config`.
    pub fn new(
        config: &MigrationConfig,
        source: Arc<dyn SourceClient>,
        destination: Arc<dyn DestinationStore>,
        state: Arc<dyn StateBackend>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            settings: resolve::run_settings(config)?,
            registry: Arc::new(resolve::pipeline_registry(config)),
            entities: resolve::top_level_entities(config),
            source,
            destination,
            state,
            identities: IdentityCache::default(),
        })
    }

    /// Open the configured state backend, destination store and HTTP source.
    ///
    /// # Errors
    ///
    /// Returns an error if any store or client cannot be opened.
    pub fn from_config(config: &MigrationConfig) -> anyhow::Result<Self> {
        let state = resolve::create_state_backend(config)?;
        let destination = resolve::create_destination_store(config)?;
        let source = resolve::create_source_client(config)?;
        Self::new(config, source, destination, state)
    }

    #[must_use]
    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    #[must_use]
    pub fn state(&self) -> &Arc<dyn StateBackend> {
        &self.state
    }

    /// Register the configured top-level entities. Registering twice
    /// returns the existing rows.
    ///
    /// # Errors
    ///
    /// Returns an infrastructure error if the state backend fails.
    pub fn prepare(&self) -> Result<Vec<Entity>, EngineError> {
        let mut registered = Vec::with_capacity(self.entities.len());
        for new_entity in &self.entities {
            let registration = self.state.create_entity(new_entity)?;
            if registration.created {
                tracing::info!(
                    entity = %registration.entity.id,
                    kind = %registration.entity.kind,
                    source = registration.entity.source_full_path,
                    "Registered entity"
                );
            }
            registered.push(registration.entity);
        }
        Ok(registered)
    }

    /// Population phase. Must complete before [`Migration::run`]; the cache
    /// is frozen for the rest of the run. Registers the top-level entities
    /// first. An entity whose members cannot be read gets an entity-level
    /// failure and is still migrated, with its users resolved by the
    /// mapping mode.
    ///
    /// # Errors
    ///
    /// Returns an infrastructure error if the state backend fails.
    pub async fn populate_identities(&mut self) -> Result<usize, EngineError> {
        let entities = self.prepare()?;
        let population = populate_identity_cache(
            self.source.as_ref(),
            self.destination.as_ref(),
            &entities,
            self.settings.page_size,
        )
        .await;

        for (entity_id, err) in &population.failures {
            self.state.insert_failure(&NewFailure::from_error(
                *entity_id,
                PipelineStep::Orchestrator,
                err,
            ))?;
        }

        let mapped = population.cache.len();
        tracing::info!(
            migration = self.settings.migration,
            mapped,
            member_failures = population.failures.len(),
            "Identity cache populated"
        );
        self.identities = population.cache;
        Ok(mapped)
    }

    /// Populate identities (registering entities on the way), then run.
    ///
    /// # Errors
    ///
    /// See [`Migration::run`].
    pub async fn execute(&mut self) -> Result<MigrationSummary, EngineError> {
        self.populate_identities().await?;
        self.run().await
    }

    /// Migrate every runnable entity until no more progress is possible.
    ///
    /// Single-entity failures are recorded against the entity and never
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns an infrastructure error if entity selection fails or an
    /// entity task panics.
    pub async fn run(&self) -> Result<MigrationSummary, EngineError> {
        let run = Arc::new(
            MigrationRun::new(
                self.settings.clone(),
                Arc::clone(&self.source),
                Arc::clone(&self.destination),
                Arc::clone(&self.state),
            )
            .with_identities(self.identities.clone()),
        );
        let semaphore = Arc::new(Semaphore::new(self.settings.parallelism.max(1)));
        let mut attempted: HashSet<EntityId> = HashSet::new();

        tracing::info!(
            migration = self.settings.migration,
            parallelism = self.settings.parallelism,
            "Migration started"
        );

        loop {
            let entities = self.state.list_entities(&self.settings.migration, None)?;
            let statuses: HashMap<EntityId, EntityStatus> =
                entities.iter().map(|e| (e.id, e.status)).collect();

            let mut ready = Vec::new();
            let mut orphaned = 0_usize;
            for entity in entities {
                if attempted.contains(&entity.id) || !needs_work(self.state.as_ref(), &entity)? {
                    continue;
                }
                let parent = entity
                    .parent_id
                    .and_then(|p| statuses.get(&p).map(|status| (p, *status)));
                match parent {
                    None | Some((_, EntityStatus::Finished)) => ready.push(entity),
                    // A failed parent gets another attempt first.
                    Some((parent_id, status @ EntityStatus::Failed))
                        if attempted.contains(&parent_id) =>
                    {
                        attempted.insert(entity.id);
                        fail_orphan(self.state.as_ref(), &entity, status)?;
                        orphaned += 1;
                    }
                    Some((_, status @ EntityStatus::Canceled)) => {
                        attempted.insert(entity.id);
                        fail_orphan(self.state.as_ref(), &entity, status)?;
                        orphaned += 1;
                    }
                    Some(_) => {}
                }
            }

            if ready.is_empty() {
                if orphaned > 0 {
                    continue;
                }
                break;
            }

            let mut join_set = JoinSet::new();
            for entity in ready {
                attempted.insert(entity.id);
                let run = Arc::clone(&run);
                let registry = Arc::clone(&self.registry);
                let semaphore = Arc::clone(&semaphore);
                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    migrate_entity(&run, &registry, entity).await
                });
            }
            collect_entity_results(join_set).await?;
        }

        let summary = self.summary()?;
        tracing::info!(
            migration = self.settings.migration,
            entities = summary.entities.len(),
            failed = summary.failed_entities(),
            "Migration complete"
        );
        Ok(summary)
    }

    /// Summary of the migration from persisted state.
    ///
    /// # Errors
    ///
    /// Returns an infrastructure error if the state backend fails.
    pub fn summary(&self) -> Result<MigrationSummary, EngineError> {
        build_summary(
            self.state.as_ref(),
            &self.settings.migration,
            self.settings.failure_summary_limit,
        )
    }
}

async fn collect_entity_results(
    mut join_set: JoinSet<(EntityId, EntityStatus)>,
) -> Result<(), EngineError> {
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((entity_id, status)) => {
                tracing::debug!(entity = %entity_id, status = %status, "Entity task complete");
            }
            Err(join_err) => {
                return Err(EngineError::Infrastructure(anyhow!(
                    "Entity task panicked: {join_err}"
                )));
            }
        }
    }
    Ok(())
}

fn fail_orphan(
    state: &dyn StateBackend,
    entity: &Entity,
    parent: EntityStatus,
) -> Result<(), EngineError> {
    let err = MigrationError::data(
        "PARENT_FAILED",
        format!("parent entity ended as {parent}; entity was not migrated"),
    );
    state.insert_failure(&NewFailure::from_error(
        entity.id,
        PipelineStep::Orchestrator,
        &err,
    ))?;
    state.set_entity_status(entity.id, EntityStatus::Failed)?;
    tracing::warn!(
        entity = %entity.id,
        source = entity.source_full_path,
        parent = %parent,
        "Entity skipped: parent did not finish"
    );
    Ok(())
}

/// Migrate one entity. Infrastructure errors become entity-level failures.
async fn migrate_entity(
    run: &Arc<MigrationRun>,
    registry: &PipelineRegistry,
    entity: Entity,
) -> (EntityId, EntityStatus) {
    let entity_id = entity.id;
    match drive_entity(run, registry, entity).await {
        Ok(status) => (entity_id, status),
        Err(e) => {
            tracing::error!(entity = %entity_id, error = %e, "Entity migration failed");
            let err = e.into_migration_error();
            let failure = NewFailure::from_error(entity_id, PipelineStep::Orchestrator, &err);
            if let Err(store_err) = run.state.insert_failure(&failure) {
                tracing::error!(entity = %entity_id, error = %store_err, "Failed to record entity failure");
            }
            if let Err(store_err) = run.state.set_entity_status(entity_id, EntityStatus::Failed) {
                tracing::error!(entity = %entity_id, error = %store_err, "Failed to mark entity failed");
            }
            (entity_id, EntityStatus::Failed)
        }
    }
}

async fn drive_entity(
    run: &Arc<MigrationRun>,
    registry: &PipelineRegistry,
    entity: Entity,
) -> Result<EntityStatus, EngineError> {
    let state = Arc::clone(&run.state);
    let specs: Vec<PipelineSpec> = registry.specs_for(entity.kind).into_iter().cloned().collect();

    if is_canceled(state.as_ref(), entity.id)? {
        cancel_remaining(state.as_ref(), entity.id, &specs)?;
        return Ok(EntityStatus::Canceled);
    }

    state.set_entity_status(entity.id, EntityStatus::Started)?;
    tracing::info!(
        entity = %entity.id,
        kind = %entity.kind,
        source = entity.source_full_path,
        destination = entity.destination_full_path(),
        pipelines = specs.len(),
        "Entity migration started"
    );

    // Skipped pipelines get another look: their dependencies may finish now.
    let mut statuses: HashMap<PipelineKind, TrackerStatus> = HashMap::new();
    for tracker in state.list_trackers(entity.id)? {
        let status = if tracker.status == TrackerStatus::Skipped {
            state.set_tracker_status(tracker.id, TrackerStatus::Created)?;
            TrackerStatus::Created
        } else {
            tracker.status
        };
        statuses.insert(tracker.pipeline_kind, status);
    }

    let mut stages: BTreeMap<u32, Vec<PipelineSpec>> = BTreeMap::new();
    for spec in &specs {
        stages.entry(spec.stage).or_default().push(spec.clone());
    }

    let mut aborted: Option<PipelineKind> = None;
    for (stage, stage_specs) in stages {
        if is_canceled(state.as_ref(), entity.id)? {
            let remaining: Vec<PipelineSpec> =
                specs.iter().filter(|s| s.stage >= stage).cloned().collect();
            cancel_remaining(state.as_ref(), entity.id, &remaining)?;
            tracing::info!(entity = %entity.id, stage, "Entity canceled between stages");
            return Ok(EntityStatus::Canceled);
        }

        let mut join_set: JoinSet<(PipelineSpec, Result<TrackerResult, EngineError>)> =
            JoinSet::new();
        for spec in stage_specs {
            let blocker = match &aborted {
                Some(kind) => Some(format!("entity aborted after pipeline '{kind}' failed")),
                None => spec
                    .depends_on
                    .iter()
                    .find(|dep| statuses.get(*dep) != Some(&TrackerStatus::Finished))
                    .map(|dep| {
                        let status = statuses
                            .get(dep)
                            .map_or_else(|| "not run".to_string(), ToString::to_string);
                        format!("dependency '{dep}' did not finish ({status})")
                    }),
            };
            if let Some(reason) = blocker {
                let status = skip_pipeline(state.as_ref(), &entity, &spec, &reason)?;
                statuses.insert(spec.kind.clone(), status);
                continue;
            }

            let run = Arc::clone(run);
            let entity = entity.clone();
            join_set.spawn(async move {
                let result = run_spec(run, entity, &spec).await;
                (spec, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let (spec, result) =
                joined.map_err(|e| anyhow!("Pipeline task panicked: {e}"))?;
            let result = result?;
            if result.status == TrackerStatus::Failed && spec.abort_on_failure && aborted.is_none()
            {
                tracing::error!(
                    entity = %entity.id,
                    pipeline = %spec.kind,
                    "Required pipeline failed, aborting entity"
                );
                aborted = Some(spec.kind.clone());
            }
            statuses.insert(spec.kind, result.status);
        }
    }

    let current = state.get_entity(entity.id)?.map(|e| e.status);
    if current == Some(EntityStatus::Canceled) {
        return Ok(EntityStatus::Canceled);
    }
    let status = if aborted.is_some() {
        EntityStatus::Failed
    } else {
        EntityStatus::Finished
    };
    state.set_entity_status(entity.id, status)?;
    tracing::info!(entity = %entity.id, status = %status, "Entity migration complete");
    Ok(status)
}

async fn run_spec(
    run: Arc<MigrationRun>,
    entity: Entity,
    spec: &PipelineSpec,
) -> Result<TrackerResult, EngineError> {
    let pipeline = PipelineRegistry::build(spec);
    let mut ctx = PipelineContext::resume(run, entity, &spec.kind, spec.stage)?;
    pipeline.run(&mut ctx).await
}

/// Whether a run should pick the entity up: it never completed, it
/// failed, or it finished with pipelines left to resume. Canceled entities
/// wait for [`resume_entity`].
fn needs_work(state: &dyn StateBackend, entity: &Entity) -> Result<bool, EngineError> {
    Ok(match entity.status {
        EntityStatus::Created | EntityStatus::Started | EntityStatus::Failed => true,
        EntityStatus::Canceled => false,
        EntityStatus::Finished => state.list_trackers(entity.id)?.iter().any(|t| {
            matches!(
                t.status,
                TrackerStatus::Created | TrackerStatus::Started | TrackerStatus::Failed
            )
        }),
    })
}

fn is_canceled(state: &dyn StateBackend, entity_id: EntityId) -> Result<bool, EngineError> {
    Ok(state
        .get_entity(entity_id)?
        .is_some_and(|e| e.status == EntityStatus::Canceled))
}

/// Mark a pipeline skipped and record why. A tracker that is already done
/// keeps its status.
fn skip_pipeline(
    state: &dyn StateBackend,
    entity: &Entity,
    spec: &PipelineSpec,
    reason: &str,
) -> Result<TrackerStatus, EngineError> {
    let tracker = state.get_or_create_tracker(entity.id, &spec.kind, spec.stage)?;
    if tracker.status.is_done() {
        return Ok(tracker.status);
    }
    state.set_tracker_status(tracker.id, TrackerStatus::Skipped)?;
    let err = MigrationError::data("DEPENDENCY_FAILED", reason);
    state.insert_failure(
        &NewFailure::from_error(entity.id, PipelineStep::Orchestrator, &err)
            .for_tracker(tracker.id, spec.kind.clone()),
    )?;
    tracing::warn!(
        entity = %entity.id,
        pipeline = %spec.kind,
        reason,
        "Pipeline skipped"
    );
    Ok(TrackerStatus::Skipped)
}

fn cancel_remaining(
    state: &dyn StateBackend,
    entity_id: EntityId,
    specs: &[PipelineSpec],
) -> Result<(), EngineError> {
    for spec in specs {
        let tracker = state.get_or_create_tracker(entity_id, &spec.kind, spec.stage)?;
        if !tracker.status.is_done() && tracker.status != TrackerStatus::Canceled {
            state.set_tracker_status(tracker.id, TrackerStatus::Canceled)?;
        }
    }
    Ok(())
}

/// Cancel an entity from outside a run. Running pipelines stop before their
/// next page; pending trackers are marked canceled.
///
/// # Errors
///
/// Returns an infrastructure error if the state backend fails.
pub fn cancel_entity(state: &dyn StateBackend, entity_id: EntityId) -> Result<(), EngineError> {
    state.set_entity_status(entity_id, EntityStatus::Canceled)?;
    for tracker in state.list_trackers(entity_id)? {
        if !tracker.status.is_done() && tracker.status != TrackerStatus::Canceled {
            state.set_tracker_status(tracker.id, TrackerStatus::Canceled)?;
        }
    }
    tracing::info!(entity = %entity_id, "Entity canceled");
    Ok(())
}

/// Undo [`cancel_entity`]: the entity and its canceled trackers go back to
/// `created`, so the next run resumes each tracker from its persisted cursor.
///
/// # Errors
///
/// Returns an infrastructure error if the state backend fails.
pub fn resume_entity(state: &dyn StateBackend, entity_id: EntityId) -> Result<(), EngineError> {
    for tracker in state.list_trackers(entity_id)? {
        if tracker.status == TrackerStatus::Canceled {
            state.set_tracker_status(tracker.id, TrackerStatus::Created)?;
        }
    }
    state.set_entity_status(entity_id, EntityStatus::Created)?;
    tracing::info!(entity = %entity_id, "Entity resumed");
    Ok(())
}

/// Result of `ferry check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub group_pipelines: usize,
    pub project_pipelines: usize,
    pub state_ok: bool,
    pub destination_ok: bool,
    /// Why the source URL was rejected, if it was.
    pub source_error: Option<String>,
}

impl CheckResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.state_ok && self.destination_ok && self.source_error.is_none()
    }
}

/// Check that the stores open and that the source URL passes the URL guard.
///
/// # Errors
///
/// Returns an error if run settings cannot be resolved.
pub async fn check_migration(config: &MigrationConfig) -> anyhow::Result<CheckResult> {
    tracing::info!(migration = config.migration, "Checking migration configuration");

    let settings = resolve::run_settings(config)?;
    let registry = resolve::pipeline_registry(config);
    let state_ok = resolve::check_state_backend(config);
    let destination_ok = resolve::check_destination_store(config);

    let source_error = match settings.url_guard.validate_resolved(&settings.source_url).await {
        Ok(()) => {
            tracing::info!(url = %settings.source_url, "Source URL: OK");
            None
        }
        Err(e) => {
            tracing::error!(url = %settings.source_url, "Source URL: FAILED: {e}");
            Some(e.to_string())
        }
    };

    Ok(CheckResult {
        group_pipelines: registry.specs_for(EntityKind::Group).len(),
        project_pipelines: registry.specs_for(EntityKind::Project).len(),
        state_ok,
        destination_ok,
        source_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_state::SqliteStateBackend;

    fn entity(state: &SqliteStateBackend) -> Entity {
        state
            .create_entity(&NewEntity {
                migration: "m".into(),
                kind: EntityKind::Project,
                source_full_path: "acme/widgets".into(),
                destination_slug: "widgets".into(),
                destination_namespace: "imported".into(),
                parent_id: None,
                organization_id: None,
            })
            .unwrap()
            .entity
    }

    #[test]
    fn cancel_entity_cancels_pending_trackers_only() {
        let state = SqliteStateBackend::in_memory().unwrap();
        let entity = entity(&state);
        let done = state
            .get_or_create_tracker(entity.id, &PipelineKind::new("labels"), 1)
            .unwrap();
        state.set_tracker_status(done.id, TrackerStatus::Finished).unwrap();
        let pending = state
            .get_or_create_tracker(entity.id, &PipelineKind::new("issues"), 2)
            .unwrap();

        cancel_entity(&state, entity.id).unwrap();

        assert_eq!(
            state.get_entity(entity.id).unwrap().unwrap().status,
            EntityStatus::Canceled
        );
        assert_eq!(
            state.get_tracker(done.id).unwrap().unwrap().status,
            TrackerStatus::Finished
        );
        assert_eq!(
            state.get_tracker(pending.id).unwrap().unwrap().status,
            TrackerStatus::Canceled
        );
    }

    #[test]
    fn finished_entity_needs_work_only_while_a_tracker_is_open() {
        let state = SqliteStateBackend::in_memory().unwrap();
        let mut entity = entity(&state);
        let labels = state
            .get_or_create_tracker(entity.id, &PipelineKind::new("labels"), 1)
            .unwrap();
        state.set_tracker_status(labels.id, TrackerStatus::Finished).unwrap();
        entity.status = EntityStatus::Finished;
        assert!(!needs_work(&state, &entity).unwrap());

        state.set_tracker_status(labels.id, TrackerStatus::Failed).unwrap();
        assert!(needs_work(&state, &entity).unwrap());

        entity.status = EntityStatus::Canceled;
        assert!(!needs_work(&state, &entity).unwrap());
        entity.status = EntityStatus::Failed;
        assert!(needs_work(&state, &entity).unwrap());
    }

    #[test]
    fn resume_entity_reopens_canceled_trackers() {
        let state = SqliteStateBackend::in_memory().unwrap();
        let entity = entity(&state);
        let done = state
            .get_or_create_tracker(entity.id, &PipelineKind::new("labels"), 1)
            .unwrap();
        state.set_tracker_status(done.id, TrackerStatus::Finished).unwrap();
        let pending = state
            .get_or_create_tracker(entity.id, &PipelineKind::new("issues"), 2)
            .unwrap();
        cancel_entity(&state, entity.id).unwrap();

        resume_entity(&state, entity.id).unwrap();

        assert_eq!(
            state.get_entity(entity.id).unwrap().unwrap().status,
            EntityStatus::Created
        );
        assert_eq!(
            state.get_tracker(done.id).unwrap().unwrap().status,
            TrackerStatus::Finished
        );
        assert_eq!(
            state.get_tracker(pending.id).unwrap().unwrap().status,
            TrackerStatus::Created
        );
    }

    #[test]
    fn skip_keeps_done_trackers() {
        let state = SqliteStateBackend::in_memory().unwrap();
        let entity = entity(&state);
        let spec = crate::catalog::default_catalog(EntityKind::Project)
            .into_iter()
            .find(|s| s.kind.as_str() == "issues")
            .unwrap();

        let status = skip_pipeline(&state, &entity, &spec, "dependency 'labels' did not finish")
            .unwrap();
        assert_eq!(status, TrackerStatus::Skipped);
        assert_eq!(state.list_failures(entity.id).unwrap().len(), 1);

        let again = skip_pipeline(&state, &entity, &spec, "again").unwrap();
        assert_eq!(again, TrackerStatus::Skipped);
        assert_eq!(state.list_failures(entity.id).unwrap().len(), 1);
    }

    #[test]
    fn fail_orphan_records_entity_failure() {
        let state = SqliteStateBackend::in_memory().unwrap();
        let entity = entity(&state);
        fail_orphan(&state, &entity, EntityStatus::Failed).unwrap();
        let failures = state.list_failures(entity.id).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].code, "PARENT_FAILED");
        assert_eq!(
            state.get_entity(entity.id).unwrap().unwrap().status,
            EntityStatus::Failed
        );
    }
}
