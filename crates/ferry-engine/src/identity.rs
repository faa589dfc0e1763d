//! Source to destination user mapping.
//!
//! The [`IdentityCache`] is built once per migration run, before any
//! pipeline executes, and is read-only afterwards. Lookups never fail:
//! a miss becomes [`UserRef::Deferred`] or the configured fallback user.

use std::collections::HashMap;

use ferry_state::DestinationStore;
use ferry_types::entity::{Entity, EntityId};
use ferry_types::error::MigrationError;
use ferry_types::identity::{DestinationUserId, SourceUserId, UserRef};

use crate::errors::store_error;
use crate::source::{PageRequest, SourceClient};

/// Frozen source-to-destination user map for one migration run.
#[derive(Debug, Clone, Default)]
pub struct IdentityCache {
    users: HashMap<SourceUserId, DestinationUserId>,
}

impl IdentityCache {
    #[must_use]
    pub fn builder() -> IdentityCacheBuilder {
        IdentityCacheBuilder::default()
    }

    #[must_use]
    pub fn get(&self, source: SourceUserId) -> Option<DestinationUserId> {
        self.users.get(&source).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Mutable phase of the cache. Only the population step holds one.
#[derive(Debug, Default)]
pub struct IdentityCacheBuilder {
    users: HashMap<SourceUserId, DestinationUserId>,
}

impl IdentityCacheBuilder {
    pub fn insert(&mut self, source: SourceUserId, destination: DestinationUserId) -> &mut Self {
        self.users.insert(source, destination);
        self
    }

    #[must_use]
    pub fn freeze(self) -> IdentityCache {
        IdentityCache { users: self.users }
    }
}

/// What happens to users missing from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingMode {
    /// Keep the reference as deferred and record a placeholder reference.
    /// The field is set to `placeholder_user` if one is configured.
    Placeholders {
        placeholder_user: Option<DestinationUserId>,
    },
    /// Attribute to the fallback user; no placeholder is recorded.
    Fallback(DestinationUserId),
}

/// Cache plus mode: the per-pipeline view handed to transformers.
#[derive(Debug, Clone, Copy)]
pub struct IdentityMapper<'a> {
    cache: &'a IdentityCache,
    mode: MappingMode,
}

impl<'a> IdentityMapper<'a> {
    #[must_use]
    pub fn new(cache: &'a IdentityCache, mode: MappingMode) -> Self {
        Self { cache, mode }
    }

    #[must_use]
    pub fn mode(&self) -> MappingMode {
        self.mode
    }

    #[must_use]
    pub fn map(&self, source: SourceUserId) -> UserRef {
        match (self.cache.get(source), self.mode) {
            (Some(destination), _) | (None, MappingMode::Fallback(destination)) => {
                UserRef::Resolved(destination)
            }
            (None, MappingMode::Placeholders { .. }) => UserRef::Deferred(source),
        }
    }
}

/// Outcome of the population phase.
#[derive(Debug, Default)]
pub struct IdentityPopulation {
    pub cache: IdentityCache,
    /// Entities whose members could not be read, with the reason. Their
    /// users fall back to the mapping mode like any other miss.
    pub failures: Vec<(EntityId, MigrationError)>,
}

/// Population phase: read each entity's `members` relation (`user_id`,
/// `public_email`) and match members to destination users by email.
///
/// A source or store error stops reading that entity's members only; what
/// was mapped so far stays in the cache.
pub async fn populate_identity_cache(
    source: &dyn SourceClient,
    destination: &dyn DestinationStore,
    entities: &[Entity],
    page_size: u32,
) -> IdentityPopulation {
    let mut builder = IdentityCache::builder();
    let mut failures = Vec::new();
    let mut unmatched = 0_usize;

    for entity in entities {
        match read_members(source, destination, entity, page_size, &mut builder).await {
            Ok(missed) => {
                unmatched += missed;
                tracing::debug!(
                    entity = %entity.id,
                    source = entity.source_full_path,
                    "Read source members"
                );
            }
            Err(err) => {
                tracing::warn!(
                    entity = %entity.id,
                    source = entity.source_full_path,
                    code = %err.code,
                    "Could not read source members, users fall back to the mapping mode: {}",
                    err.message
                );
                failures.push((entity.id, err));
            }
        }
    }

    let cache = builder.freeze();
    tracing::debug!(mapped = cache.len(), unmatched, "Members matched by email");
    IdentityPopulation { cache, failures }
}

/// Page through one entity's members. Returns how many members had no
/// destination match.
async fn read_members(
    source: &dyn SourceClient,
    destination: &dyn DestinationStore,
    entity: &Entity,
    page_size: u32,
    builder: &mut IdentityCacheBuilder,
) -> Result<usize, MigrationError> {
    let mut unmatched = 0_usize;
    let mut cursor: Option<String> = None;
    loop {
        let page = source
            .fetch_page(&PageRequest {
                entity_path: &entity.source_full_path,
                entity_kind: entity.kind,
                relation: "members",
                cursor: cursor.as_deref(),
                page_size,
            })
            .await?;

        for record in &page.records {
            let Some(source_id) = record.data.get("user_id").and_then(serde_json::Value::as_i64)
            else {
                continue;
            };
            let Some(email) = record.str_field("public_email").filter(|e| !e.is_empty()) else {
                unmatched += 1;
                continue;
            };
            match destination
                .find_user_by_email(email)
                .map_err(|e| store_error(&e))?
            {
                Some(user) => {
                    builder.insert(SourceUserId::new(source_id), user);
                }
                None => unmatched += 1,
            }
        }

        match page.page_info.next_page {
            Some(next) if page.page_info.has_next_page => cursor = Some(next),
            _ => return Ok(unmatched),
        }
    }
}
