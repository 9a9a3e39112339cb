//! Bootstrapped models.
//!
//! A [`Model`] is the frozen result of bootstrap: its own and injected
//! fields, its layered methods, default order and SQL constraints. Models
//! are only reachable through the [`Catalog`](crate::Catalog).

use std::collections::{BTreeMap, HashMap};

use bizorm_core::{ConstraintError, Error, QueryError, QueryErrorKind, Result};
use bizorm_query::OrderBy;

use crate::fields::Field;
use crate::methods::Method;

/// Kind flags of a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelOptions {
    /// Bundle of fields and methods merged into other models; no table.
    pub mixin: bool,
    /// Records meant to be short-lived (wizards).
    pub transient: bool,
    /// Table managed outside the runtime; not synchronized.
    pub manual: bool,
    /// Synthesized during bootstrap (link models, context holders).
    pub system: bool,
    /// Stores the per-context values of a contexted field.
    pub context_holder: bool,
}

/// A table-level constraint with its user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlConstraint {
    pub name: String,
    /// Name of the constraint in the database.
    pub db_name: String,
    pub sql: String,
    pub message: String,
}

impl SqlConstraint {
    pub fn new(table: &str, name: &str, sql: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            db_name: format!("{}_{}", table, name),
            sql: sql.to_string(),
            message: message.to_string(),
        }
    }
}

/// A model of the frozen catalog.
#[derive(Debug, Clone)]
pub struct Model {
    pub(crate) name: String,
    pub(crate) table: String,
    pub(crate) options: ModelOptions,
    pub(crate) mixins: Vec<String>,
    pub(crate) fields: Vec<Field>,
    by_name: HashMap<String, usize>,
    by_json: HashMap<String, usize>,
    pub(crate) methods: BTreeMap<String, Method>,
    pub(crate) default_order: Vec<OrderBy>,
    pub(crate) sql_constraints: Vec<SqlConstraint>,
}

impl Model {
    pub(crate) fn new(name: &str, options: ModelOptions) -> Self {
        Self {
            name: name.to_string(),
            table: bizorm_core::snake_case(name),
            options,
            mixins: Vec::new(),
            fields: Vec::new(),
            by_name: HashMap::new(),
            by_json: HashMap::new(),
            methods: BTreeMap::new(),
            default_order: Vec::new(),
            sql_constraints: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn options(&self) -> ModelOptions {
        self.options
    }

    /// Mixins declared on the model, in declaration order.
    pub fn mixins(&self) -> &[String] {
        &self.mixins
    }

    pub fn is_mixin(&self) -> bool {
        self.options.mixin
    }

    pub fn is_transient(&self) -> bool {
        self.options.transient
    }

    pub fn is_manual(&self) -> bool {
        self.options.manual
    }

    pub fn is_system(&self) -> bool {
        self.options.system
    }

    /// Whether the model owns a synchronized table.
    pub fn is_persisted(&self) -> bool {
        !self.options.mixin && !self.options.manual
    }

    // ========================================================================
    // Fields
    // ========================================================================

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Field by declared name or storage name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.by_name
            .get(name)
            .or_else(|| self.by_json.get(name))
            .map(|i| &self.fields[*i])
    }

    pub fn must_field(&self, name: &str) -> Result<&Field> {
        self.field(name).ok_or_else(|| Error::UnknownField {
            model: self.name.clone(),
            field: name.to_string(),
        })
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Fields fetched by a full load: stored fields, and related fields
    /// whose terminal field is stored.
    pub fn stored_field_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.is_loaded_by_default())
            .map(|f| f.name().to_string())
            .collect()
    }

    pub(crate) fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        let index = *self.by_name.get(name).or_else(|| self.by_json.get(name))?;
        self.fields.get_mut(index)
    }

    pub(crate) fn push_field(&mut self, field: Field) {
        let index = self.fields.len();
        self.by_name.insert(field.name().to_string(), index);
        self.by_json.insert(field.json().to_string(), index);
        self.fields.push(field);
    }

    // ========================================================================
    // Methods
    // ========================================================================

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    pub fn must_method(&self, name: &str) -> Result<&Method> {
        self.method(name).ok_or_else(|| Error::UnknownMethod {
            model: self.name.clone(),
            method: name.to_string(),
        })
    }

    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.methods.values()
    }

    pub fn default_order(&self) -> &[OrderBy] {
        &self.default_order
    }

    pub fn sql_constraints(&self) -> &[SqlConstraint] {
        &self.sql_constraints
    }

    /// Replaces a database constraint violation by the model's message for
    /// that constraint. Other errors are returned unchanged.
    pub fn translate(&self, err: Error) -> Error {
        let Error::Query(QueryError {
            kind: QueryErrorKind::Constraint,
            constraint,
            message,
            ..
        }) = &err
        else {
            return err;
        };
        let translated = match constraint.as_deref() {
            Some(name) => self.constraint_message(name),
            None => None,
        };
        let message = translated.unwrap_or_else(|| message.clone());
        tracing::debug!(
            model = %self.name,
            constraint = ?constraint,
            message = %message,
            "Constraint violation"
        );
        Error::Constraint(ConstraintError {
            model: self.name.clone(),
            constraint: constraint.clone(),
            message,
        })
    }

    fn constraint_message(&self, db_name: &str) -> Option<String> {
        if let Some(c) = self.sql_constraints.iter().find(|c| c.db_name == db_name) {
            return Some(c.message.clone());
        }
        self.fields
            .iter()
            .filter_map(|f| f.column().map(|c| (f, c)))
            .find(|(_, column)| format!("{}_{}_key", self.table, column) == db_name)
            .map(|(f, _)| format!("{} must be unique", f.label()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldDef;

    fn user() -> Model {
        let mut model = Model::new("ResUser", ModelOptions::default());
        model.push_field(Field::from_def("ResUser", FieldDef::char("Login").unique(), None));
        model.push_field(Field::from_def("ResUser", FieldDef::integer("Age"), None));
        model
            .sql_constraints
            .push(SqlConstraint::new("res_user", "age_check", "CHECK (age >= 0)", "Age cannot be negative"));
        model
    }

    fn violation(constraint: Option<&str>) -> Error {
        let mut err = QueryError::new(QueryErrorKind::Constraint, "CHECK constraint failed");
        if let Some(name) = constraint {
            err = err.with_constraint(name);
        }
        Error::Query(err)
    }

    #[test]
    fn test_lookup_by_name_or_json() {
        let model = user();
        assert_eq!(model.table(), "res_user");
        assert_eq!(model.field("Login").unwrap().json(), "login");
        assert_eq!(model.field("age").unwrap().name(), "Age");
        assert!(model.must_field("Missing").is_err());
    }

    #[test]
    fn test_translate_named_constraint() {
        let model = user();
        match model.translate(violation(Some("res_user_age_check"))) {
            Error::Constraint(e) => assert_eq!(e.message, "Age cannot be negative"),
            other => panic!("unexpected {:?}", other),
        }
        match model.translate(violation(Some("res_user_login_key"))) {
            Error::Constraint(e) => assert_eq!(e.message, "Login must be unique"),
            other => panic!("unexpected {:?}", other),
        }
        match model.translate(violation(None)) {
            Error::Constraint(e) => assert_eq!(e.message, "CHECK constraint failed"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(model.translate(Error::user("boom")), Error::User(_)));
    }
}
