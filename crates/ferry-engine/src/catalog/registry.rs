//! Builds runnable pipelines from catalog specs.

use ferry_types::entity::EntityKind;
use ferry_types::tracker::PipelineKind;

use super::{builtin_catalog, ExtractorSpec, LoaderSpec, PipelineSpec, TransformerSpec};
use crate::extractors::{
    DestinationScanExtractor, EntityAttributesExtractor, FileArchiveExtractor, PagedExtractor,
};
use crate::loaders::{
    BundleLoader, ChangedRecordLoader, ChildEntitiesLoader, NamespaceLoader, RecordLoader,
};
use crate::pipeline::{Extractor, Loader, Pipeline, Transformer};
use crate::transformers::{
    FieldRulesTransformer, ProhibitedAttributesTransformer, ReferencesTransformer,
    UserReferencesTransformer,
};

/// The pipeline catalog in effect for a migration.
#[derive(Debug, Clone)]
pub struct PipelineRegistry {
    specs: Vec<PipelineSpec>,
}

impl PipelineRegistry {
    #[must_use]
    pub fn new(specs: Vec<PipelineSpec>) -> Self {
        Self { specs }
    }

    /// Registry over the built-in catalog.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(builtin_catalog())
    }

    #[must_use]
    pub fn specs(&self) -> &[PipelineSpec] {
        &self.specs
    }

    /// Specs that apply to `kind`, ordered by stage.
    #[must_use]
    pub fn specs_for(&self, kind: EntityKind) -> Vec<&PipelineSpec> {
        let mut specs: Vec<&PipelineSpec> =
            self.specs.iter().filter(|spec| spec.applies_to(kind)).collect();
        specs.sort_by_key(|spec| spec.stage);
        specs
    }

    #[must_use]
    pub fn spec(&self, entity_kind: EntityKind, kind: &PipelineKind) -> Option<&PipelineSpec> {
        self.specs
            .iter()
            .find(|spec| spec.applies_to(entity_kind) && &spec.kind == kind)
    }

    /// Instantiate the extractor, transformer chain and loader named by `spec`.
    #[must_use]
    pub fn build(spec: &PipelineSpec) -> Pipeline {
        Pipeline {
            kind: spec.kind.clone(),
            extractor: build_extractor(&spec.extractor),
            transformers: spec.transformers.iter().map(build_transformer).collect(),
            loader: build_loader(&spec.loader),
        }
    }
}

fn build_extractor(spec: &ExtractorSpec) -> Box<dyn Extractor> {
    match spec {
        ExtractorSpec::Paged { relation } => Box::new(PagedExtractor::new(relation.clone())),
        ExtractorSpec::EntityAttributes => Box::new(EntityAttributesExtractor),
        ExtractorSpec::DestinationScan { relations } => {
            Box::new(DestinationScanExtractor::new(relations.clone()))
        }
        ExtractorSpec::FileArchive { relation, artifact } => {
            Box::new(FileArchiveExtractor::new(relation.clone(), artifact.clone()))
        }
    }
}

fn build_transformer(spec: &TransformerSpec) -> Box<dyn Transformer> {
    match spec {
        TransformerSpec::ProhibitedAttributes { allow } => {
            Box::new(ProhibitedAttributesTransformer::new(allow.iter().cloned()))
        }
        TransformerSpec::FieldRules {
            rename,
            drop,
            defaults,
        } => Box::new(FieldRulesTransformer::new(
            rename.clone(),
            drop.clone(),
            defaults.clone(),
        )),
        TransformerSpec::UserReferences { fields } => {
            Box::new(UserReferencesTransformer::new(fields.clone()))
        }
        TransformerSpec::References { fields } => {
            Box::new(ReferencesTransformer::new(fields.clone()))
        }
    }
}

fn build_loader(spec: &LoaderSpec) -> Box<dyn Loader> {
    match spec {
        LoaderSpec::Namespace => Box::new(NamespaceLoader),
        LoaderSpec::Record { relation, key } => {
            Box::new(RecordLoader::new(relation.clone(), key.clone()))
        }
        LoaderSpec::ChangedRecord => Box::new(ChangedRecordLoader),
        LoaderSpec::Bundle { relation } => Box::new(BundleLoader::new(relation.clone())),
        LoaderSpec::ChildEntities { kind } => Box::new(ChildEntitiesLoader::new(*kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_every_builtin_pipeline() {
        let registry = PipelineRegistry::builtin();
        for spec in registry.specs() {
            let pipeline = PipelineRegistry::build(spec);
            assert_eq!(pipeline.kind, spec.kind);
            assert_eq!(pipeline.transformers.len(), spec.transformers.len());
        }
    }

    #[test]
    fn transformer_order_follows_spec() {
        let registry = PipelineRegistry::builtin();
        let spec = registry
            .spec(EntityKind::Project, &PipelineKind::new("issues"))
            .unwrap();
        let names: Vec<&str> = PipelineRegistry::build(spec)
            .transformers
            .iter()
            .map(|t| t.name())
            .collect();
        assert_eq!(names, ["prohibited_attributes", "user_references", "references"]);
    }

    #[test]
    fn lookup_respects_entity_kind() {
        let registry = PipelineRegistry::builtin();
        assert!(registry
            .spec(EntityKind::Group, &PipelineKind::new("repository"))
            .is_none());
        assert!(registry
            .spec(EntityKind::Group, &PipelineKind::new("labels"))
            .is_some());
        let stages: Vec<u32> = registry
            .specs_for(EntityKind::Project)
            .iter()
            .map(|s| s.stage)
            .collect();
        assert!(stages.windows(2).all(|w| w[0] <= w[1]));
    }
}
