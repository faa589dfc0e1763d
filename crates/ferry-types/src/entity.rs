//! Migration entities: the groups and projects being moved.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Row identifier of a migration entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(i64);

impl EntityId {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of resource an entity is on the source instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Group,
    Project,
}

impl EntityKind {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Project => "project",
        }
    }

    /// Parse the storage representation produced by [`EntityKind::as_str`].
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "group" => Some(Self::Group),
            "project" => Some(Self::Project),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an entity migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Created,
    Started,
    Finished,
    Failed,
    Canceled,
}

impl EntityStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(Self::Created),
            "started" => Some(Self::Started),
            "finished" => Some(Self::Finished),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// `true` once the entity will not be picked up again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of the migration tree.
///
/// Groups contain subgroups and projects; `parent_id` links a child to the
/// entity whose migration discovered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// Name of the migration run this entity belongs to.
    pub migration: String,
    pub kind: EntityKind,
    pub source_full_path: String,
    pub destination_slug: String,
    pub destination_namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EntityId>,
    pub status: EntityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<i64>,
}

impl Entity {
    /// Full path of the entity on the destination instance.
    #[must_use]
    pub fn destination_full_path(&self) -> String {
        join_path(&self.destination_namespace, &self.destination_slug)
    }
}

/// Attributes needed to register an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntity {
    pub migration: String,
    pub kind: EntityKind,
    pub source_full_path: String,
    pub destination_slug: String,
    #[serde(default)]
    pub destination_namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<i64>,
}

/// Result of registering an entity: registration is idempotent, so the
/// entity may already have existed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRegistration {
    pub entity: Entity,
    pub created: bool,
}

fn join_path(namespace: &str, slug: &str) -> String {
    let namespace = namespace.trim_matches('/');
    if namespace.is_empty() {
        slug.to_string()
    } else {
        format!("{namespace}/{slug}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(namespace: &str) -> Entity {
        Entity {
            id: EntityId::new(1),
            migration: "m".into(),
            kind: EntityKind::Project,
            source_full_path: "acme/platform/api".into(),
            destination_slug: "api".into(),
            destination_namespace: namespace.into(),
            parent_id: None,
            status: EntityStatus::Created,
            organization_id: None,
        }
    }

    #[test]
    fn destination_full_path_joins_namespace() {
        assert_eq!(entity("imported/platform").destination_full_path(), "imported/platform/api");
    }

    #[test]
    fn destination_full_path_without_namespace_is_slug() {
        assert_eq!(entity("").destination_full_path(), "api");
        assert_eq!(entity("/").destination_full_path(), "api");
    }

    #[test]
    fn status_roundtrips_through_storage_form() {
        for status in [
            EntityStatus::Created,
            EntityStatus::Started,
            EntityStatus::Finished,
            EntityStatus::Failed,
            EntityStatus::Canceled,
        ] {
            assert_eq!(EntityStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EntityStatus::parse("bogus"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!EntityStatus::Created.is_terminal());
        assert!(!EntityStatus::Started.is_terminal());
        assert!(EntityStatus::Finished.is_terminal());
        assert!(EntityStatus::Failed.is_terminal());
        assert!(EntityStatus::Canceled.is_terminal());
    }

    #[test]
    fn kind_serde_is_snake_case() {
        let json = serde_json::to_string(&EntityKind::Project).unwrap();
        assert_eq!(json, "\"project\"");
        assert_eq!(EntityKind::parse("group"), Some(EntityKind::Group));
    }
}
