//! Declarative pipeline catalog.
//!
//! Every relation kind is described by a [`PipelineSpec`]: which extractor
//! pulls it, which transformers clean it, which loader persists it, and
//! which other kinds must finish first. The engine never hard-codes a
//! relation; it looks up the `PipelineSpec` and builds the pipeline from tags.

mod defaults;
mod registry;

use std::collections::{BTreeMap, HashMap};

use ferry_types::entity::EntityKind;
use ferry_types::tracker::PipelineKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use defaults::{builtin_catalog, default_catalog};
pub use registry::PipelineRegistry;

/// Where a pipeline's records come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractorSpec {
    /// Cursor-paged relation export from the source instance.
    Paged { relation: String },
    /// The entity's own attributes, as a single record.
    EntityAttributes,
    /// Re-read records already loaded on the destination.
    DestinationScan { relations: Vec<String> },
    /// A downloaded archive staged through the secure file stager.
    FileArchive { relation: String, artifact: String },
}

/// One step of the transformer chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformerSpec {
    /// Strip ids, foreign keys, cached HTML and remote URLs.
    ProhibitedAttributes {
        #[serde(default)]
        allow: Vec<String>,
    },
    /// Rename, drop and default fields.
    FieldRules {
        #[serde(default)]
        rename: BTreeMap<String, String>,
        #[serde(default)]
        drop: Vec<String>,
        #[serde(default)]
        defaults: Map<String, Value>,
    },
    /// Map source user ids to destination users.
    UserReferences { fields: Vec<String> },
    /// Rewrite links to source objects in free-text fields.
    References { fields: Vec<String> },
}

/// How a pipeline's records are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoaderSpec {
    /// Create the entity's destination namespace.
    Namespace,
    /// Upsert records of `relation`, keyed by the `key` field.
    Record { relation: String, key: String },
    /// Save a re-read record only when its content changed.
    ChangedRecord,
    /// Import a staged bundle as the relation's content.
    Bundle { relation: String },
    /// Register discovered child entities.
    ChildEntities { kind: EntityKind },
}

/// Declarative description of one relation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub kind: PipelineKind,
    pub stage: u32,
    pub extractor: ExtractorSpec,
    #[serde(default)]
    pub transformers: Vec<TransformerSpec>,
    pub loader: LoaderSpec,
    #[serde(default)]
    pub depends_on: Vec<PipelineKind>,
    /// A failure of this pipeline fails the whole entity.
    #[serde(default)]
    pub abort_on_failure: bool,
    #[serde(default = "all_entity_kinds")]
    pub entity_kinds: Vec<EntityKind>,
}

fn all_entity_kinds() -> Vec<EntityKind> {
    vec![EntityKind::Group, EntityKind::Project]
}

impl PipelineSpec {
    #[must_use]
    pub fn applies_to(&self, kind: EntityKind) -> bool {
        self.entity_kinds.contains(&kind)
    }
}

/// Check a catalog for duplicate kinds and dependencies that are unknown or
/// not in a strictly earlier stage. Returns every problem found.
#[must_use]
pub fn validate_catalog(specs: &[PipelineSpec]) -> Vec<String> {
    let mut errors = Vec::new();

    for entity_kind in [EntityKind::Group, EntityKind::Project] {
        let mut stages: HashMap<&PipelineKind, u32> = HashMap::new();
        for spec in specs.iter().filter(|s| s.applies_to(entity_kind)) {
            if stages.insert(&spec.kind, spec.stage).is_some() {
                errors.push(format!(
                    "catalog: pipeline '{}' is defined twice for {entity_kind}",
                    spec.kind
                ));
            }
        }

        for spec in specs.iter().filter(|s| s.applies_to(entity_kind)) {
            for dep in &spec.depends_on {
                match stages.get(dep) {
                    None => errors.push(format!(
                        "catalog: pipeline '{}' depends on unknown pipeline '{dep}' for {entity_kind}",
                        spec.kind
                    )),
                    Some(&dep_stage) if dep_stage >= spec.stage => errors.push(format!(
                        "catalog: pipeline '{}' (stage {}) depends on '{dep}' (stage {dep_stage}), \
                         which does not run earlier",
                        spec.kind, spec.stage
                    )),
                    Some(_) => {}
                }
            }
        }
    }

    for spec in specs {
        if spec.kind.as_str().trim().is_empty() {
            errors.push("catalog: pipeline kind must not be empty".to_string());
        }
        if spec.entity_kinds.is_empty() {
            errors.push(format!(
                "catalog: pipeline '{}' applies to no entity kind",
                spec.kind
            ));
        }
        let maps_users = spec
            .transformers
            .iter()
            .any(|t| matches!(t, TransformerSpec::UserReferences { .. }));
        let keeps_slots = matches!(
            spec.loader,
            LoaderSpec::Record { .. } | LoaderSpec::ChangedRecord
        );
        if maps_users && !keeps_slots {
            errors.push(format!(
                "catalog: pipeline '{}' maps users but its loader cannot hold placeholder references",
                spec.kind
            ));
        }
        if let ExtractorSpec::FileArchive { artifact, .. } = &spec.extractor {
            if !is_plain_file_name(artifact) {
                errors.push(format!(
                    "catalog: pipeline '{}' artifact '{artifact}' must be a plain file name",
                    spec.kind
                ));
            }
        }
    }

    errors
}

/// A single normal path component: no separators, no `.`/`..`.
pub(crate) fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: &str, stage: u32, depends_on: &[&str]) -> PipelineSpec {
        PipelineSpec {
            kind: PipelineKind::new(kind),
            stage,
            extractor: ExtractorSpec::Paged {
                relation: kind.to_string(),
            },
            transformers: vec![],
            loader: LoaderSpec::Record {
                relation: kind.to_string(),
                key: "iid".into(),
            },
            depends_on: depends_on.iter().map(|d| PipelineKind::new(*d)).collect(),
            abort_on_failure: false,
            entity_kinds: vec![EntityKind::Project],
        }
    }

    #[test]
    fn valid_catalog_has_no_errors() {
        let specs = vec![spec("labels", 1, &[]), spec("issues", 2, &["labels"])];
        assert!(validate_catalog(&specs).is_empty());
    }

    #[test]
    fn duplicate_kind_is_reported() {
        let specs = vec![spec("labels", 1, &[]), spec("labels", 2, &[])];
        let errors = validate_catalog(&specs);
        assert!(errors.iter().any(|e| e.contains("defined twice")), "{errors:?}");
    }

    #[test]
    fn unknown_and_same_stage_dependencies_are_reported() {
        let specs = vec![
            spec("labels", 1, &[]),
            spec("milestones", 1, &["labels"]),
            spec("issues", 2, &["epics"]),
        ];
        let errors = validate_catalog(&specs);
        assert_eq!(errors.len(), 2, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("does not run earlier")));
        assert!(errors.iter().any(|e| e.contains("unknown pipeline 'epics'")));
    }

    #[test]
    fn artifact_must_be_plain_file_name() {
        let mut bad = spec("repository", 1, &[]);
        bad.extractor = ExtractorSpec::FileArchive {
            relation: "repository".into(),
            artifact: "../project.bundle".into(),
        };
        let errors = validate_catalog(&[bad]);
        assert!(errors.iter().any(|e| e.contains("plain file name")));
    }

    #[test]
    fn user_references_need_a_record_loader() {
        let mut namespace = spec("project", 0, &[]);
        namespace.transformers = vec![TransformerSpec::UserReferences {
            fields: vec!["creator_id".into()],
        }];
        namespace.loader = LoaderSpec::Namespace;
        let errors = validate_catalog(&[namespace.clone()]);
        assert!(
            errors.iter().any(|e| e.contains("cannot hold placeholder references")),
            "{errors:?}"
        );

        namespace.loader = LoaderSpec::Record {
            relation: "project".into(),
            key: "id".into(),
        };
        assert!(validate_catalog(&[namespace]).is_empty());
    }

    #[test]
    fn spec_deserializes_from_yaml() {
        let yaml = r"
kind: issues
stage: 2
extractor: { type: paged, relation: issues }
transformers:
  - { type: prohibited_attributes }
  - { type: user_references, fields: [author_id] }
loader: { type: record, relation: issues, key: iid }
depends_on: [labels]
";
        let spec: PipelineSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.kind.as_str(), "issues");
        assert_eq!(spec.transformers.len(), 2);
        assert_eq!(spec.entity_kinds, all_entity_kinds());
        assert!(!spec.abort_on_failure);
    }
}
