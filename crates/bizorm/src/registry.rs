//! Declarations made before bootstrap.
//!
//! The [`Registry`] collects models, mixins, fields, methods, constraints and
//! boot sequences. It is mutable until [`Registry::bootstrap`] returns the
//! frozen [`Catalog`]; every declaration afterwards fails with
//! [`Error::Frozen`], and a second bootstrap with
//! [`Error::DoubleBootstrap`].
//!
//! A new registry already holds the `BaseMixin`, merged into every model:
//! the `CreateDate`/`WriteDate` fields and the CRUD methods (`Load`,
//! `Create`, `Write`, `Unlink`, `Copy`, `Onchange`).
//!
//! # Example
//!
//! ```ignore
//! let mut registry = Registry::new();
//! registry.new_mixin("Named")?;
//! registry.add_fields("Named", [FieldDef::char("Name").required()])?;
//! registry.new_model("Partner")?;
//! registry.inherit("Partner", "Named")?;
//! registry.extend_method("Partner", "Create", |call| {
//!     tracing::info!("creating a partner");
//!     call.call_next()
//! })?;
//! let catalog = registry.bootstrap()?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bizorm_core::{DeclarationErrorKind, Error, Result, declaration_error, validate};
use bizorm_query::OrderBy;

use crate::catalog::Catalog;
use crate::fields::FieldDef;
use crate::methods::{Arg, LayerFn, MethodCall, MethodSignature, layer_fn};
use crate::model::ModelOptions;
use crate::recordset::base_methods;

/// Name of the mixin merged into every model.
pub const BASE_MIXIN: &str = "BaseMixin";

#[derive(Clone)]
pub(crate) enum MethodDecl {
    Declare {
        name: String,
        signature: MethodSignature,
        func: LayerFn,
    },
    Extend {
        name: String,
        func: LayerFn,
    },
}

impl MethodDecl {
    pub(crate) fn name(&self) -> &str {
        match self {
            MethodDecl::Declare { name, .. } | MethodDecl::Extend { name, .. } => name,
        }
    }

    pub(crate) fn func(&self) -> &LayerFn {
        match self {
            MethodDecl::Declare { func, .. } | MethodDecl::Extend { func, .. } => func,
        }
    }
}

impl fmt::Debug for MethodDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodDecl::Declare {
                name, signature, ..
            } => write!(f, "Declare({}{})", name, signature),
            MethodDecl::Extend { name, .. } => write!(f, "Extend({})", name),
        }
    }
}

/// Everything declared for one model or mixin.
#[derive(Debug, Clone)]
pub(crate) struct ModelDecl {
    pub(crate) name: String,
    pub(crate) options: ModelOptions,
    pub(crate) mixins: Vec<String>,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) methods: Vec<MethodDecl>,
    pub(crate) grants: Vec<String>,
    /// (name, sql, message)
    pub(crate) sql_constraints: Vec<(String, String, String)>,
    pub(crate) default_order: Vec<OrderBy>,
}

impl ModelDecl {
    fn new(name: &str, options: ModelOptions) -> Self {
        Self {
            name: name.to_string(),
            options,
            mixins: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            grants: Vec::new(),
            sql_constraints: Vec::new(),
            default_order: Vec::new(),
        }
    }
}

/// A sequence declared before bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SequenceDecl {
    pub(crate) name: String,
    pub(crate) start: i64,
    pub(crate) increment: i64,
}

/// Model declarations, mutable until bootstrap.
#[derive(Debug)]
pub struct Registry {
    pub(crate) decls: Vec<ModelDecl>,
    index: HashMap<String, usize>,
    pub(crate) sequences: Vec<SequenceDecl>,
    bootstrapped: bool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid_name(model: &str, item: Option<&str>, name: &str) -> Result<()> {
    match validate::check_declaration_name(name) {
        Some(message) => Err(declaration_error(
            DeclarationErrorKind::InvalidName,
            model,
            item,
            message,
        )),
        None => Ok(()),
    }
}

impl Registry {
    /// A registry holding only the `BaseMixin`.
    pub fn new() -> Self {
        let mut registry = Self {
            decls: Vec::new(),
            index: HashMap::new(),
            sequences: Vec::new(),
            bootstrapped: false,
        };
        registry.insert_decl(ModelDecl::new(
            BASE_MIXIN,
            ModelOptions {
                mixin: true,
                system: true,
                ..ModelOptions::default()
            },
        ));
        if let Some(base) = registry.decls.first_mut() {
            base.fields.push(FieldDef::datetime("CreateDate").no_copy().label("Created on"));
            base.fields.push(FieldDef::datetime("WriteDate").no_copy().label("Last updated on"));
        }
        base_methods::declare(&mut registry);
        registry
    }

    /// Declares a granted `BaseMixin` method.
    pub(crate) fn declare_builtin(&mut self, name: &str, signature: MethodSignature, func: LayerFn) {
        if let Some(base) = self.decls.first_mut() {
            base.methods.push(MethodDecl::Declare {
                name: name.to_string(),
                signature,
                func,
            });
            base.grants.push(name.to_string());
        }
    }

    fn insert_decl(&mut self, decl: ModelDecl) {
        self.index.insert(decl.name.clone(), self.decls.len());
        self.decls.push(decl);
    }

    pub(crate) fn decl(&self, name: &str) -> Option<&ModelDecl> {
        self.index.get(name).map(|i| &self.decls[*i])
    }

    fn ensure_open(&self, what: &str) -> Result<()> {
        if self.bootstrapped {
            return Err(Error::Frozen(what.to_string()));
        }
        Ok(())
    }

    fn decl_mut(&mut self, model: &str) -> Result<&mut ModelDecl> {
        match self.index.get(model) {
            Some(i) => Ok(&mut self.decls[*i]),
            None => Err(declaration_error(
                DeclarationErrorKind::UnknownModel,
                model,
                None,
                "model has not been declared",
            )),
        }
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    // ========================================================================
    // Models
    // ========================================================================

    fn declare_model(&mut self, name: &str, options: ModelOptions) -> Result<&mut Self> {
        self.ensure_open(&format!("declare model {}", name))?;
        invalid_name(name, None, name)?;
        if self.index.contains_key(name) {
            return Err(declaration_error(
                DeclarationErrorKind::DuplicateModel,
                name,
                None,
                "model is already declared",
            ));
        }
        tracing::debug!(model = name, ?options, "Declare model");
        self.insert_decl(ModelDecl::new(name, options));
        Ok(self)
    }

    pub fn new_model(&mut self, name: &str) -> Result<&mut Self> {
        self.declare_model(name, ModelOptions::default())
    }

    pub fn new_mixin(&mut self, name: &str) -> Result<&mut Self> {
        self.declare_model(
            name,
            ModelOptions {
                mixin: true,
                ..ModelOptions::default()
            },
        )
    }

    pub fn new_transient_model(&mut self, name: &str) -> Result<&mut Self> {
        self.declare_model(
            name,
            ModelOptions {
                transient: true,
                ..ModelOptions::default()
            },
        )
    }

    /// A model whose table is managed outside the runtime (a view, a
    /// foreign table...). It is never synchronized.
    pub fn new_manual_model(&mut self, name: &str) -> Result<&mut Self> {
        self.declare_model(
            name,
            ModelOptions {
                manual: true,
                ..ModelOptions::default()
            },
        )
    }

    /// Merges `mixin` into `model`. Later mixins override earlier ones.
    pub fn inherit(&mut self, model: &str, mixin: &str) -> Result<&mut Self> {
        self.ensure_open(&format!("add mixin {} to {}", mixin, model))?;
        let is_mixin = self.decl(mixin).map(|d| d.options.mixin);
        match is_mixin {
            Some(true) => {}
            Some(false) => {
                return Err(declaration_error(
                    DeclarationErrorKind::IllegalOverride,
                    model,
                    Some(mixin),
                    "only mixins can be inherited",
                ));
            }
            None => {
                return Err(declaration_error(
                    DeclarationErrorKind::UnknownModel,
                    model,
                    Some(mixin),
                    "unknown mixin",
                ));
            }
        }
        let decl = self.decl_mut(model)?;
        if !decl.mixins.iter().any(|m| m == mixin) {
            decl.mixins.push(mixin.to_string());
        }
        Ok(self)
    }

    // ========================================================================
    // Fields
    // ========================================================================

    /// Adds fields to `model`. Redeclaring a field replaces it, as long as
    /// it stays on the same side of the relation / non-relation divide.
    pub fn add_fields<I>(&mut self, model: &str, fields: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = FieldDef>,
    {
        self.ensure_open(&format!("add fields to {}", model))?;
        let decl = self.decl_mut(model)?;
        for def in fields {
            invalid_name(model, Some(&def.name), &def.name)?;
            match decl.fields.iter_mut().find(|f| f.name == def.name) {
                Some(existing) => {
                    if existing.field_type.is_relation() != def.field_type.is_relation() {
                        return Err(declaration_error(
                            DeclarationErrorKind::IllegalOverride,
                            model,
                            Some(&def.name),
                            format!(
                                "cannot redeclare a {} field as {}",
                                existing.field_type, def.field_type
                            ),
                        ));
                    }
                    *existing = def;
                }
                None => decl.fields.push(def),
            }
        }
        Ok(self)
    }

    // ========================================================================
    // Methods
    // ========================================================================

    /// Declares a new method on `model`; `f` is its base layer.
    pub fn declare_method<F>(
        &mut self,
        model: &str,
        name: &str,
        signature: MethodSignature,
        f: F,
    ) -> Result<&mut Self>
    where
        F: Fn(&MethodCall<'_>) -> Result<Arg> + Send + Sync + 'static,
    {
        self.ensure_open(&format!("declare method {}.{}", model, name))?;
        invalid_name(model, Some(name), name)?;
        let decl = self.decl_mut(model)?;
        if decl
            .methods
            .iter()
            .any(|m| matches!(m, MethodDecl::Declare { name: n, .. } if n == name))
        {
            return Err(declaration_error(
                DeclarationErrorKind::IllegalOverride,
                model,
                Some(name),
                "method is already declared on this model, extend it instead",
            ));
        }
        decl.methods.push(MethodDecl::Declare {
            name: name.to_string(),
            signature,
            func: layer_fn(f),
        });
        Ok(self)
    }

    /// Adds a layer on top of `model`'s method `name`, which must be
    /// declared on the model or one of its mixins by bootstrap time.
    pub fn extend_method<F>(&mut self, model: &str, name: &str, f: F) -> Result<&mut Self>
    where
        F: Fn(&MethodCall<'_>) -> Result<Arg> + Send + Sync + 'static,
    {
        self.ensure_open(&format!("extend method {}.{}", model, name))?;
        let decl = self.decl_mut(model)?;
        decl.methods.push(MethodDecl::Extend {
            name: name.to_string(),
            func: layer_fn(f),
        });
        Ok(self)
    }

    /// Lets every user execute `method` on `model` without asking access
    /// control, unless the method is sensitive.
    pub fn grant_method(&mut self, model: &str, method: &str) -> Result<&mut Self> {
        self.ensure_open(&format!("grant method {}.{}", model, method))?;
        let decl = self.decl_mut(model)?;
        if !decl.grants.iter().any(|g| g == method) {
            decl.grants.push(method.to_string());
        }
        Ok(self)
    }

    // ========================================================================
    // Constraints, order, sequences
    // ========================================================================

    /// Declares a table constraint; `message` replaces the database error
    /// when it is violated.
    pub fn add_sql_constraint(
        &mut self,
        model: &str,
        name: &str,
        sql: &str,
        message: &str,
    ) -> Result<&mut Self> {
        self.ensure_open(&format!("add constraint {} to {}", name, model))?;
        let decl = self.decl_mut(model)?;
        decl.sql_constraints.retain(|(n, _, _)| n != name);
        decl.sql_constraints
            .push((name.to_string(), sql.to_string(), message.to_string()));
        Ok(self)
    }

    /// Default order of searches, as `"Path"` or `"Path desc"` items.
    pub fn set_default_order(&mut self, model: &str, order: &[&str]) -> Result<&mut Self> {
        self.ensure_open(&format!("set the default order of {}", model))?;
        let parsed = order
            .iter()
            .map(|o| o.parse::<OrderBy>())
            .collect::<Result<Vec<_>>>()
            .map_err(|e| {
                declaration_error(DeclarationErrorKind::InvalidPath, model, None, e.to_string())
            })?;
        self.decl_mut(model)?.default_order = parsed;
        Ok(self)
    }

    /// Declares a boot sequence, created by `sync_database` and immutable
    /// at runtime.
    pub fn new_sequence(&mut self, name: &str, start: i64, increment: i64) -> Result<&mut Self> {
        self.ensure_open(&format!("declare sequence {}", name))?;
        invalid_name(name, None, name)?;
        if self.sequences.iter().any(|s| s.name == name) {
            return Err(declaration_error(
                DeclarationErrorKind::DuplicateModel,
                name,
                None,
                "sequence is already declared",
            ));
        }
        self.sequences.push(SequenceDecl {
            name: name.to_string(),
            start,
            increment: if increment == 0 { 1 } else { increment },
        });
        Ok(self)
    }

    // ========================================================================
    // Bootstrap
    // ========================================================================

    /// Composes every declaration into the frozen [`Catalog`].
    ///
    /// Runs once. Any wiring error aborts the whole bootstrap and leaves the
    /// registry open for corrections.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn bootstrap(&mut self) -> Result<Arc<Catalog>> {
        if self.bootstrapped {
            tracing::error!("Registry bootstrapped twice");
            return Err(Error::DoubleBootstrap);
        }
        let catalog = crate::bootstrap::run(self).inspect_err(|e| {
            tracing::error!(error = %e, "Bootstrap failed");
        })?;
        self.bootstrapped = true;
        Ok(Arc::new(catalog))
    }
}
