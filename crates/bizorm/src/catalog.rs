//! The frozen model catalog.
//!
//! Bootstrap produces one [`Catalog`], shared behind an `Arc` by every
//! database handle and environment. It never changes afterwards, so it needs
//! no locking.

use std::collections::BTreeMap;

use bizorm_core::{Error, FieldMeta, MetaView, Result};

use crate::depends::{ComputeDirective, Dependencies, PathStep, expand_path};
use crate::fields::Field;
use crate::model::Model;
use crate::registry::SequenceDecl;

#[derive(Debug)]
pub struct Catalog {
    pub(crate) models: BTreeMap<String, Model>,
    pub(crate) sequences: Vec<SequenceDecl>,
    pub(crate) dependencies: Dependencies,
}

impl Catalog {
    pub fn model(&self, name: &str) -> Option<&Model> {
        self.models.get(name)
    }

    pub fn must_model(&self, name: &str) -> Result<&Model> {
        self.model(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }

    /// Models owning a synchronized table.
    pub fn persisted_models(&self) -> impl Iterator<Item = &Model> {
        self.models.values().filter(|m| m.is_persisted())
    }

    pub fn field(&self, model: &str, field: &str) -> Option<&Field> {
        self.model(model)?.field(field)
    }

    pub fn must_field(&self, model: &str, field: &str) -> Result<&Field> {
        self.must_model(model)?.must_field(field)
    }

    /// Directives triggered by a change of `field` on `model`.
    pub fn directives(&self, model: &str, field: &str) -> &[ComputeDirective] {
        let name = self
            .field(model, field)
            .map_or(field, |f| f.name());
        self.dependencies
            .get(&(model.to_string(), name.to_string()))
            .map_or(&[], Vec::as_slice)
    }

    /// Physical hops of `path`, related fields expanded.
    pub fn expand_path(&self, model: &str, path: &str) -> Result<Vec<PathStep>> {
        expand_path(&self.models, model, path)
    }

    /// Reverse relations (`One2Many`/`Rev2One`) listing the records of
    /// `model` through its foreign key `field`, as (model, field) pairs.
    pub fn reverse_fields(&self, model: &str, field: &str) -> Vec<(String, String)> {
        let Some(fk) = self.field(model, field) else {
            return Vec::new();
        };
        let Some(target) = fk.target() else {
            return Vec::new();
        };
        let Some(target_model) = self.model(target) else {
            return Vec::new();
        };
        target_model
            .fields()
            .iter()
            .filter(|f| f.field_type().is_reverse_relation() && !f.is_related())
            .filter(|f| f.target() == Some(model) && f.meta.reverse_fk.as_deref() == Some(fk.json()))
            .map(|f| (target.to_string(), f.name().to_string()))
            .collect()
    }

    /// Names of the boot sequences.
    pub fn sequence_names(&self) -> Vec<&str> {
        self.sequences.iter().map(|s| s.name.as_str()).collect()
    }
}

impl MetaView for Catalog {
    fn table_name(&self, model: &str) -> Option<&str> {
        self.models
            .get(model)
            .filter(|m| !m.is_mixin())
            .map(Model::table)
    }

    fn field_meta(&self, model: &str, field: &str) -> Option<&FieldMeta> {
        self.models.get(model)?.field(field).map(Field::meta)
    }

    fn model_fields(&self, model: &str) -> Vec<&FieldMeta> {
        self.models
            .get(model)
            .map(|m| m.fields().iter().map(Field::meta).collect())
            .unwrap_or_default()
    }
}
