//! Field declarations.
//!
//! A [`FieldDef`] is what application code declares: a type, storage
//! options and wiring (compute, related path, contexts...). Bootstrap turns
//! every declaration into a [`Field`], which adds the resolved storage
//! metadata ([`FieldMeta`]) used by the query builder and the cache.
//!
//! # Example
//!
//! ```ignore
//! registry.add_fields("User", [
//!     FieldDef::char("Name").required().size(64),
//!     FieldDef::one2one("Profile", "Profile").on_delete(OnDelete::SetNull),
//!     FieldDef::integer("Age")
//!         .compute("ComputeAge")
//!         .stored()
//!         .depends(&["Profile", "Profile.Age"]),
//!     FieldDef::related("ProfileCity", "Profile.City"),
//! ])?;
//! ```

use std::fmt;
use std::sync::Arc;

use bizorm_core::{FieldMeta, FieldType, OnDelete, Value};

use crate::environment::Environment;

/// Computes the default value of a field when a record is created.
pub type DefaultFn = Arc<dyn Fn(&Environment) -> Value + Send + Sync>;

/// Evaluates one context parameter of a contexted field.
pub type ContextFn = Arc<dyn Fn(&Environment) -> Value + Send + Sync>;

/// Declaration of a model field.
#[derive(Clone)]
pub struct FieldDef {
    pub(crate) name: String,
    pub(crate) field_type: FieldType,
    pub(crate) json: Option<String>,
    pub(crate) label: Option<String>,
    pub(crate) required: bool,
    pub(crate) index: bool,
    pub(crate) unique: bool,
    pub(crate) size: Option<u32>,
    pub(crate) no_copy: bool,
    pub(crate) stored: bool,
    pub(crate) compute: Option<String>,
    pub(crate) depends: Vec<String>,
    pub(crate) related: Option<String>,
    pub(crate) inverse: Option<String>,
    pub(crate) onchange: Option<String>,
    pub(crate) constraint: Option<String>,
    pub(crate) default: Option<DefaultFn>,
    pub(crate) contexts: Vec<(String, ContextFn)>,
    pub(crate) target: Option<String>,
    pub(crate) reverse_fk: Option<String>,
    pub(crate) link_model: Option<String>,
    pub(crate) link_fields: Option<(String, String)>,
    pub(crate) embed: bool,
    pub(crate) on_delete: OnDelete,
    pub(crate) selection: Vec<(String, String)>,
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("json", &self.json)
            .field("required", &self.required)
            .field("stored", &self.stored)
            .field("compute", &self.compute)
            .field("depends", &self.depends)
            .field("related", &self.related)
            .field("target", &self.target)
            .field("contexts", &self.contexts.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl FieldDef {
    /// A field of `field_type`; prefer the typed constructors.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            json: None,
            label: None,
            required: false,
            index: false,
            unique: false,
            size: None,
            no_copy: false,
            stored: false,
            compute: None,
            depends: Vec::new(),
            related: None,
            inverse: None,
            onchange: None,
            constraint: None,
            default: None,
            contexts: Vec::new(),
            target: None,
            reverse_fk: None,
            link_model: None,
            link_fields: None,
            embed: false,
            on_delete: OnDelete::SetNull,
            selection: Vec::new(),
        }
    }

    pub fn char(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Char)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn html(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Html)
    }

    pub fn binary(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Binary)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Date)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::DateTime)
    }

    /// A selection among `(value, label)` pairs.
    pub fn selection(name: impl Into<String>, values: &[(&str, &str)]) -> Self {
        let mut def = Self::new(name, FieldType::Selection);
        def.selection = values
            .iter()
            .map(|(v, l)| (v.to_string(), l.to_string()))
            .collect();
        def
    }

    pub fn many2one(name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut def = Self::new(name, FieldType::Many2One);
        def.target = Some(target.into());
        def
    }

    pub fn one2one(name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut def = Self::new(name, FieldType::One2One);
        def.target = Some(target.into());
        def.unique = true;
        def
    }

    /// Reverse side of the `One2One` field `reverse_fk` of `target`.
    pub fn rev2one(
        name: impl Into<String>,
        target: impl Into<String>,
        reverse_fk: impl Into<String>,
    ) -> Self {
        let mut def = Self::new(name, FieldType::Rev2One);
        def.target = Some(target.into());
        def.reverse_fk = Some(reverse_fk.into());
        def
    }

    /// Reverse side of the `Many2One` field `reverse_fk` of `target`.
    pub fn one2many(
        name: impl Into<String>,
        target: impl Into<String>,
        reverse_fk: impl Into<String>,
    ) -> Self {
        let mut def = Self::new(name, FieldType::One2Many);
        def.target = Some(target.into());
        def.reverse_fk = Some(reverse_fk.into());
        def
    }

    pub fn many2many(name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut def = Self::new(name, FieldType::Many2Many);
        def.target = Some(target.into());
        def
    }

    /// A field mirroring `path`; its type is taken from the terminal field
    /// during bootstrap.
    pub fn related(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, FieldType::Char).related_to(path)
    }

    // ========================================================================
    // Options
    // ========================================================================

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    /// Excludes the field from record copies.
    #[must_use]
    pub fn no_copy(mut self) -> Self {
        self.no_copy = true;
        self
    }

    /// Persists a computed field.
    #[must_use]
    pub fn stored(mut self) -> Self {
        self.stored = true;
        self
    }

    /// Computes the field with `method`, which returns a map holding the
    /// field value.
    #[must_use]
    pub fn compute(mut self, method: impl Into<String>) -> Self {
        self.compute = Some(method.into());
        self
    }

    /// Paths whose change triggers recomputation.
    #[must_use]
    pub fn depends(mut self, paths: &[&str]) -> Self {
        self.depends = paths.iter().map(ToString::to_string).collect();
        self
    }

    /// Mirrors the field reached by `path`.
    #[must_use]
    pub fn related_to(mut self, path: impl Into<String>) -> Self {
        self.related = Some(path.into());
        self
    }

    /// Method receiving the value written to a computed field.
    #[must_use]
    pub fn inverse(mut self, method: impl Into<String>) -> Self {
        self.inverse = Some(method.into());
        self
    }

    #[must_use]
    pub fn onchange(mut self, method: impl Into<String>) -> Self {
        self.onchange = Some(method.into());
        self
    }

    /// Method checking records after each create or write of this field.
    #[must_use]
    pub fn constraint(mut self, method: impl Into<String>) -> Self {
        self.constraint = Some(method.into());
        self
    }

    #[must_use]
    pub fn default<F>(mut self, f: F) -> Self
    where
        F: Fn(&Environment) -> Value + Send + Sync + 'static,
    {
        self.default = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn default_value(self, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.default(move |_| value.clone())
    }

    /// Makes the value depend on the context parameter `key`, evaluated
    /// by `f`.
    #[must_use]
    pub fn context<F>(mut self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Environment) -> Value + Send + Sync + 'static,
    {
        self.contexts.push((key.into(), Arc::new(f)));
        self
    }

    /// Makes the value depend on the environment context entry `key`.
    #[must_use]
    pub fn context_key(self, key: &str) -> Self {
        let entry = key.to_string();
        self.context(key, move |env| {
            env.context().get(&entry).cloned().unwrap_or_default()
        })
    }

    /// Name of the link model of a many-to-many field.
    #[must_use]
    pub fn link_model(mut self, model: impl Into<String>) -> Self {
        self.link_model = Some(model.into());
        self
    }

    /// Names of the link model fields pointing at this model and at the
    /// target.
    #[must_use]
    pub fn link_fields(mut self, ours: impl Into<String>, theirs: impl Into<String>) -> Self {
        self.link_fields = Some((ours.into(), theirs.into()));
        self
    }

    /// Exposes every field of the target as a related field.
    #[must_use]
    pub fn embed(mut self) -> Self {
        self.embed = true;
        self
    }

    #[must_use]
    pub fn json_name(mut self, json: impl Into<String>) -> Self {
        self.json = Some(json.into());
        self
    }

    #[must_use]
    pub fn on_delete(mut self, on_delete: OnDelete) -> Self {
        self.on_delete = on_delete;
        self
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Storage name: the explicit one, or derived from the name and type.
    pub fn json(&self) -> String {
        self.json
            .clone()
            .unwrap_or_else(|| self.field_type.default_json_name(&self.name))
    }

    pub fn is_computed(&self) -> bool {
        self.compute.is_some()
    }
}

/// A field of a bootstrapped model.
#[derive(Debug, Clone)]
pub struct Field {
    pub(crate) meta: FieldMeta,
    pub(crate) def: FieldDef,
    /// Mixin the field was injected from.
    pub(crate) from_mixin: Option<String>,
    /// Whether a related field mirrors a stored field.
    pub(crate) related_stored: bool,
}

impl Field {
    pub(crate) fn from_def(model: &str, def: FieldDef, from_mixin: Option<String>) -> Self {
        let mut meta = FieldMeta::new(model, &def.name, &def.json(), def.field_type);
        meta.target.clone_from(&def.target);
        meta.stored = def.field_type.has_column() && (def.compute.is_none() || def.stored);
        Self {
            meta,
            def,
            from_mixin,
            related_stored: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn json(&self) -> &str {
        &self.meta.json
    }

    pub fn field_type(&self) -> FieldType {
        self.meta.field_type
    }

    pub fn meta(&self) -> &FieldMeta {
        &self.meta
    }

    pub fn label(&self) -> &str {
        self.def.label.as_deref().unwrap_or(&self.meta.name)
    }

    pub fn target(&self) -> Option<&str> {
        self.meta.target.as_deref()
    }

    /// Column name when the field owns a column of the model table.
    pub fn column(&self) -> Option<&str> {
        self.meta.column()
    }

    pub fn is_computed(&self) -> bool {
        self.def.compute.is_some()
    }

    pub fn compute(&self) -> Option<&str> {
        self.def.compute.as_deref()
    }

    /// Computed and persisted.
    pub fn is_stored_computed(&self) -> bool {
        self.def.compute.is_some() && self.meta.stored
    }

    pub fn is_related(&self) -> bool {
        self.meta.related_path.is_some()
    }

    pub fn related_path(&self) -> Option<&str> {
        self.meta.related_path.as_deref()
    }

    pub fn is_contexted(&self) -> bool {
        self.meta.contexts.is_some()
    }

    pub fn required(&self) -> bool {
        self.def.required
    }

    pub fn no_copy(&self) -> bool {
        self.def.no_copy
    }

    pub fn depends(&self) -> &[String] {
        &self.def.depends
    }

    pub fn inverse(&self) -> Option<&str> {
        self.def.inverse.as_deref()
    }

    pub fn onchange(&self) -> Option<&str> {
        self.def.onchange.as_deref()
    }

    pub fn constraint(&self) -> Option<&str> {
        self.def.constraint.as_deref()
    }

    pub fn selection(&self) -> &[(String, String)] {
        &self.def.selection
    }

    pub fn from_mixin(&self) -> Option<&str> {
        self.from_mixin.as_deref()
    }

    /// Part of the default projection of a full load: stored values, and
    /// related fields mirroring one.
    pub fn is_loaded_by_default(&self) -> bool {
        if self.is_related() {
            return self.related_stored;
        }
        (self.column().is_some() || self.is_contexted()) && !self.field_type().is_x2many()
    }

    pub(crate) fn default_value(&self, env: &Environment) -> Option<Value> {
        self.def.default.as_ref().map(|f| f(env))
    }

    pub(crate) fn context_values(&self, env: &Environment) -> Vec<(String, Value)> {
        self.def
            .contexts
            .iter()
            .map(|(k, f)| (k.clone(), f(env)))
            .collect()
    }
}
