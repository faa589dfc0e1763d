//! Built-in pipeline catalog for groups and projects.

use ferry_types::entity::EntityKind;
use ferry_types::tracker::PipelineKind;

use super::{ExtractorSpec, LoaderSpec, PipelineSpec, TransformerSpec};

const GROUP: &[EntityKind] = &[EntityKind::Group];
const PROJECT: &[EntityKind] = &[EntityKind::Project];
const BOTH: &[EntityKind] = &[EntityKind::Group, EntityKind::Project];

fn kinds(names: &[&str]) -> Vec<PipelineKind> {
    names.iter().map(|name| PipelineKind::new(*name)).collect()
}

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_string()).collect()
}

/// Prohibited-attribute stripping that keeps the user fields, followed by
/// user mapping on those fields.
fn clean_with_users(user_fields: &[&str]) -> Vec<TransformerSpec> {
    vec![
        TransformerSpec::ProhibitedAttributes {
            allow: strings(user_fields),
        },
        TransformerSpec::UserReferences {
            fields: strings(user_fields),
        },
    ]
}

fn relation(
    kind: &str,
    stage: u32,
    key: &str,
    transformers: Vec<TransformerSpec>,
    depends_on: &[&str],
    entity_kinds: &[EntityKind],
) -> PipelineSpec {
    PipelineSpec {
        kind: PipelineKind::new(kind),
        stage,
        extractor: ExtractorSpec::Paged {
            relation: kind.to_string(),
        },
        transformers,
        loader: LoaderSpec::Record {
            relation: kind.to_string(),
            key: key.to_string(),
        },
        depends_on: kinds(depends_on),
        abort_on_failure: false,
        entity_kinds: entity_kinds.to_vec(),
    }
}

fn attributes(kind: &str, entity_kind: EntityKind) -> PipelineSpec {
    PipelineSpec {
        kind: PipelineKind::new(kind),
        stage: 0,
        extractor: ExtractorSpec::EntityAttributes,
        transformers: vec![TransformerSpec::ProhibitedAttributes { allow: vec![] }],
        loader: LoaderSpec::Namespace,
        depends_on: vec![],
        abort_on_failure: true,
        entity_kinds: vec![entity_kind],
    }
}

fn archive(
    kind: &str,
    stage: u32,
    artifact: &str,
    depends_on: &[&str],
    abort_on_failure: bool,
) -> PipelineSpec {
    PipelineSpec {
        kind: PipelineKind::new(kind),
        stage,
        extractor: ExtractorSpec::FileArchive {
            relation: kind.to_string(),
            artifact: artifact.to_string(),
        },
        transformers: vec![],
        loader: LoaderSpec::Bundle {
            relation: kind.to_string(),
        },
        depends_on: kinds(depends_on),
        abort_on_failure,
        entity_kinds: PROJECT.to_vec(),
    }
}

fn children(kind: &str, relation: &str, child_kind: EntityKind) -> PipelineSpec {
    PipelineSpec {
        kind: PipelineKind::new(kind),
        stage: 2,
        extractor: ExtractorSpec::Paged {
            relation: relation.to_string(),
        },
        transformers: vec![],
        loader: LoaderSpec::ChildEntities { kind: child_kind },
        depends_on: kinds(&["group"]),
        abort_on_failure: false,
        entity_kinds: GROUP.to_vec(),
    }
}

/// Every built-in pipeline, for both entity kinds.
#[must_use]
pub fn builtin_catalog() -> Vec<PipelineSpec> {
    let text_fields = strings(&["description"]);
    let with_references = |mut transformers: Vec<TransformerSpec>, fields: &[String]| {
        transformers.push(TransformerSpec::References {
            fields: fields.to_vec(),
        });
        transformers
    };

    vec![
        // groups
        attributes("group", EntityKind::Group),
        relation(
            "members",
            1,
            "username",
            clean_with_users(&["user_id"]),
            &["group"],
            GROUP,
        ),
        relation(
            "badges",
            1,
            "name",
            vec![TransformerSpec::ProhibitedAttributes { allow: vec![] }],
            &["group"],
            GROUP,
        ),
        children("subgroup_entities", "subgroups", EntityKind::Group),
        children("project_entities", "projects", EntityKind::Project),
        // shared by groups and projects
        relation(
            "labels",
            1,
            "title",
            vec![TransformerSpec::ProhibitedAttributes { allow: vec![] }],
            &[],
            BOTH,
        ),
        relation(
            "milestones",
            1,
            "title",
            vec![TransformerSpec::ProhibitedAttributes { allow: vec![] }],
            &[],
            BOTH,
        ),
        // projects
        attributes("project", EntityKind::Project),
        archive("repository", 1, "project.bundle", &["project"], true),
        relation(
            "issues",
            2,
            "iid",
            with_references(clean_with_users(&["author_id", "assignee_id"]), &text_fields),
            &["labels", "milestones"],
            PROJECT,
        ),
        relation(
            "merge_requests",
            2,
            "iid",
            with_references(
                clean_with_users(&["author_id", "assignee_id", "merged_by_id"]),
                &text_fields,
            ),
            &["labels", "milestones"],
            PROJECT,
        ),
        relation(
            "snippets",
            2,
            "title",
            clean_with_users(&["author_id"]),
            &["project"],
            PROJECT,
        ),
        archive(
            "snippets_repository",
            3,
            "snippets.bundle",
            &["repository", "snippets"],
            false,
        ),
        archive("design", 3, "design.bundle", &["issues"], false),
        relation(
            "releases",
            3,
            "tag_name",
            with_references(clean_with_users(&["author_id"]), &text_fields),
            &["repository"],
            PROJECT,
        ),
        relation(
            "ci_pipelines",
            3,
            "iid",
            clean_with_users(&["user_id"]),
            &["repository", "merge_requests"],
            PROJECT,
        ),
        relation(
            "notes",
            3,
            "key",
            with_references(clean_with_users(&["author_id"]), &strings(&["note"])),
            &["issues", "merge_requests"],
            PROJECT,
        ),
        PipelineSpec {
            kind: PipelineKind::new("references"),
            stage: 4,
            extractor: ExtractorSpec::DestinationScan {
                relations: strings(&["issues", "merge_requests", "notes"]),
            },
            transformers: vec![TransformerSpec::References {
                fields: strings(&["description", "note"]),
            }],
            loader: LoaderSpec::ChangedRecord,
            depends_on: kinds(&["issues", "merge_requests", "notes"]),
            abort_on_failure: false,
            entity_kinds: PROJECT.to_vec(),
        },
    ]
}

/// The built-in pipelines that apply to `kind`, in stage order.
#[must_use]
pub fn default_catalog(kind: EntityKind) -> Vec<PipelineSpec> {
    let mut specs: Vec<PipelineSpec> = builtin_catalog()
        .into_iter()
        .filter(|spec| spec.applies_to(kind))
        .collect();
    specs.sort_by_key(|spec| spec.stage);
    specs
}
