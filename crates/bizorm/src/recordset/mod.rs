//! Record collections.
//!
//! A [`RecordCollection`] is zero or more records of one model bound to an
//! [`Environment`]. It is either *unfetched* (a query waiting to run) or
//! *bound* to a list of ids; field values live in the environment cache.
//!
//! Storage is only mutated through the `Create`, `Write` and `Unlink`
//! methods, which every model inherits from the `BaseMixin` and may
//! override. The convenience wrappers below go through method dispatch, so
//! overrides and the access-control gate always apply.
//!
//! # Example
//!
//! ```ignore
//! let adults = env
//!     .pool("User")?
//!     .search("Profile.Age >= 18".parse()?)
//!     .order_by(&["Name"])?
//!     .fetch()?;
//! for user in adults.records()? {
//!     println!("{}", user.get("Name")?);
//! }
//! ```

pub(crate) mod base_methods;
mod copy;
mod create;
mod load;
mod onchange;
mod search;
mod triggers;
mod unlink;
mod write;

use std::collections::HashSet;
use std::fmt;

use bizorm_core::{ArgumentError, Error, FieldMap, Result, Value};
use bizorm_query::{Aggregate, Condition, OrderBy, Query};

use crate::environment::Environment;
use crate::methods::Arg;

pub use search::GroupResult;

/// Records of one model in one environment.
#[derive(Clone)]
pub struct RecordCollection {
    env: Environment,
    model: String,
    query: Query,
    /// `None` until fetched.
    ids: Option<Vec<i64>>,
}

impl fmt::Debug for RecordCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordCollection")
            .field("model", &self.model)
            .field("ids", &self.ids)
            .field("query", &self.query.condition.to_string())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for RecordCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ids {
            Some(ids) => write!(f, "{}{:?}", self.model, ids),
            None => write!(f, "{}({})", self.model, self.query.condition),
        }
    }
}

fn dedup_ids(ids: impl IntoIterator<Item = i64>) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

impl RecordCollection {
    /// An empty collection; searching it searches the whole table.
    pub(crate) fn new(env: Environment, model: &str) -> Self {
        Self {
            env,
            model: model.to_string(),
            query: Query::default(),
            ids: Some(Vec::new()),
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Whether the ids are known without running the query.
    pub fn is_fetched(&self) -> bool {
        self.ids.is_some()
    }

    fn with_query(&self, query: Query) -> Self {
        Self {
            env: self.env.clone(),
            model: self.model.clone(),
            query,
            ids: None,
        }
    }

    fn argument_error(&self, method: &str, message: impl Into<String>) -> Error {
        Error::Argument(ArgumentError::new(&self.model, method, message))
    }

    // ========================================================================
    // Building collections
    // ========================================================================

    /// The records with these ids, in this order, duplicates removed.
    pub fn browse(&self, ids: &[i64]) -> Self {
        let ids = dedup_ids(ids.iter().copied());
        Self {
            env: self.env.clone(),
            model: self.model.clone(),
            query: Query::new(Condition::ids(&ids)),
            ids: Some(ids),
        }
    }

    pub fn browse_one(&self, id: i64) -> Self {
        self.browse(&[id])
    }

    /// Restricts the collection to the records matching `condition`.
    #[must_use]
    pub fn search(&self, condition: Condition) -> Self {
        let current = self.query.condition.clone();
        let condition = if current.is_empty() {
            condition
        } else {
            current.intersect(condition)
        };
        let mut query = self.query.clone();
        query.condition = condition;
        self.with_query(query)
    }

    /// Every record of the model.
    #[must_use]
    pub fn search_all(&self) -> Self {
        self.with_query(Query::default())
    }

    #[must_use]
    pub fn limit(&self, limit: u64) -> Self {
        self.with_query(self.query.clone().limit(limit))
    }

    #[must_use]
    pub fn offset(&self, offset: u64) -> Self {
        self.with_query(self.query.clone().offset(offset))
    }

    /// Orders by `Path [asc|desc]` entries.
    pub fn order_by(&self, order: &[&str]) -> Result<Self> {
        let order = order
            .iter()
            .map(|o| o.parse::<OrderBy>())
            .collect::<Result<Vec<_>>>()?;
        for o in &order {
            self.env.catalog().expand_path(&self.model, &o.path)?;
        }
        Ok(self.with_query(self.query.clone().order_by(order)))
    }

    /// Keeps the first record of each group, in the collection order.
    #[must_use]
    pub fn group_by(&self, paths: &[&str]) -> Self {
        let paths = paths.iter().map(ToString::to_string).collect();
        self.with_query(self.query.clone().group_by(paths))
    }

    /// Runs the query, binding the collection to the matching ids.
    #[tracing::instrument(level = "debug", skip(self), fields(model = %self.model))]
    pub fn fetch(&self) -> Result<Self> {
        if self.ids.is_some() {
            return Ok(self.clone());
        }
        let ids = search::fetch_ids(self, true)?;
        Ok(Self {
            env: self.env.clone(),
            model: self.model.clone(),
            query: self.query.clone(),
            ids: Some(ids),
        })
    }

    /// Like `fetch`, ignoring row-level access filters.
    pub(crate) fn fetch_unrestricted(&self) -> Result<Vec<i64>> {
        match &self.ids {
            Some(ids) => Ok(ids.clone()),
            None => search::fetch_ids(self, false),
        }
    }

    pub fn ids(&self) -> Result<Vec<i64>> {
        match &self.ids {
            Some(ids) => Ok(ids.clone()),
            None => search::fetch_ids(self, true),
        }
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.ids()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// One singleton collection per record.
    pub fn records(&self) -> Result<Vec<Self>> {
        Ok(self
            .ids()?
            .into_iter()
            .map(|id| self.browse_one(id))
            .collect())
    }

    /// The id of the only record, or `NotSingleton`.
    pub fn ensure_one(&self) -> Result<i64> {
        let ids = self.ids()?;
        match ids.as_slice() {
            [id] => Ok(*id),
            _ => Err(Error::NotSingleton {
                model: self.model.clone(),
                count: ids.len(),
            }),
        }
    }

    /// Number of records matching the query, without fetching them.
    pub fn search_count(&self) -> Result<u64> {
        match &self.ids {
            Some(ids) if self.query.condition.is_empty() => Ok(ids.len() as u64),
            _ => search::count(self),
        }
    }

    /// Aggregates per group of the collection's `group_by` paths.
    pub fn read_group(&self, aggregates: &[Aggregate]) -> Result<Vec<GroupResult>> {
        search::read_group(self, aggregates)
    }

    // ========================================================================
    // Set algebra
    // ========================================================================

    fn check_same_model(&self, other: &Self, op: &str) -> Result<()> {
        if self.model != other.model {
            return Err(self.argument_error(
                op,
                format!("cannot combine with records of {}", other.model),
            ));
        }
        Ok(())
    }

    /// Records of both collections, `self` first.
    pub fn union(&self, other: &Self) -> Result<Self> {
        self.check_same_model(other, "union")?;
        let ids = self.ids()?.into_iter().chain(other.ids()?);
        Ok(self.browse(&dedup_ids(ids)))
    }

    pub fn intersect(&self, other: &Self) -> Result<Self> {
        self.check_same_model(other, "intersect")?;
        let theirs: HashSet<i64> = other.ids()?.into_iter().collect();
        let ids: Vec<i64> = self
            .ids()?
            .into_iter()
            .filter(|id| theirs.contains(id))
            .collect();
        Ok(self.browse(&ids))
    }

    pub fn subtract(&self, other: &Self) -> Result<Self> {
        self.check_same_model(other, "subtract")?;
        let theirs: HashSet<i64> = other.ids()?.into_iter().collect();
        let ids: Vec<i64> = self
            .ids()?
            .into_iter()
            .filter(|id| !theirs.contains(id))
            .collect();
        Ok(self.browse(&ids))
    }

    /// Records for which `predicate` holds.
    pub fn filtered<F>(&self, mut predicate: F) -> Result<Self>
    where
        F: FnMut(&Self) -> Result<bool>,
    {
        let mut kept = Vec::new();
        for record in self.records()? {
            if predicate(&record)? {
                kept.push(record.ensure_one()?);
            }
        }
        Ok(self.browse(&kept))
    }

    /// False when following `parent_field` from any record loops back.
    pub fn check_recursion(&self, parent_field: &str) -> Result<bool> {
        let field = self.env.catalog().must_field(&self.model, parent_field)?;
        if !field.field_type().is_fk_relation() || field.target() != Some(self.model.as_str()) {
            return Err(self.argument_error(
                "check_recursion",
                format!("'{}' is not a relation to {}", parent_field, self.model),
            ));
        }
        for start in self.ids()? {
            let mut visited = HashSet::from([start]);
            let mut current = start;
            loop {
                let parent = self.browse_one(current).get(parent_field)?;
                match parent.as_i64() {
                    Some(next) if next != 0 => {
                        if !visited.insert(next) {
                            tracing::debug!(model = %self.model, record = start, "Parent loop detected");
                            return Ok(false);
                        }
                        current = next;
                    }
                    _ => break,
                }
            }
        }
        Ok(true)
    }

    // ========================================================================
    // Environment
    // ========================================================================

    /// Same records in an environment with `key` set in the context.
    #[must_use]
    pub fn with_context(&self, key: &str, value: impl Into<Value>) -> Self {
        let mut rc = self.clone();
        rc.env = self.env.with_context(key, value);
        rc
    }

    /// Same records seen by the superuser.
    #[must_use]
    pub fn sudo(&self) -> Self {
        let mut rc = self.clone();
        rc.env = self.env.sudo();
        rc
    }

    // ========================================================================
    // Method calls
    // ========================================================================

    /// Calls `method` through its layers, after the access-control gate.
    pub fn call(&self, method: &str, args: Vec<Arg>) -> Result<Arg> {
        self.dispatch(method, args, true)
    }

    /// Like [`call`](Self::call), flattening multiple results.
    pub fn call_multi(&self, method: &str, args: Vec<Arg>) -> Result<Vec<Arg>> {
        Ok(self.call(method, args)?.into_multi())
    }

    /// Calls made by the runtime itself (computes, inverses, constraints,
    /// write-through): no gate, but counted against the depth ceiling.
    pub(crate) fn call_internal(&self, method: &str, args: Vec<Arg>) -> Result<Arg> {
        self.dispatch(method, args, false)
    }

    fn dispatch(&self, name: &str, args: Vec<Arg>, gated: bool) -> Result<Arg> {
        let catalog = self.env.catalog_arc();
        let method = catalog.must_model(&self.model)?.must_method(name)?;
        method
            .signature()
            .check_arity(&self.model, name, args.len())?;
        if gated {
            self.env
                .check_execute(&self.model, name, method.is_granted())?;
        }
        let _guard = self.env.enter_call(&self.model, name)?;
        tracing::trace!(model = %self.model, method = name, args = args.len(), "Dispatch");
        method.invoke(self, 0, &args)
    }

    fn into_records(&self, result: Arg) -> Result<Self> {
        match result {
            Arg::Nothing => self.fetch(),
            other => other.as_records(&self.env, &self.model),
        }
    }

    // ========================================================================
    // Field access
    // ========================================================================

    /// Value of `field` (name, storage name or dotted path) for the only
    /// record. Fields missing from the cache are loaded first; a value the
    /// database does not have reads as `Null`.
    pub fn get(&self, field: &str) -> Result<Value> {
        let id = self.ensure_one()?;
        if field == "ID" || field == "id" {
            return Ok(Value::Int(id));
        }
        let catalog = self.env.catalog_arc();
        let slug = self.env.slug_for_path(&self.model, field);
        let paths = [field.to_string()];
        let cached = self
            .env
            .cache()
            .check_if_in_cache(catalog.as_ref(), &self.model, &[id], &paths, &slug, true);
        if !cached {
            self.call("Load", vec![Arg::Names(paths.to_vec())])?;
        }
        Ok(self
            .env
            .cache()
            .get(catalog.as_ref(), &self.model, id, field, &slug)
            .unwrap_or(Value::Null))
    }

    /// The records referenced by relation path `field`.
    pub fn get_records(&self, field: &str) -> Result<Self> {
        let catalog = self.env.catalog_arc();
        let steps = catalog.expand_path(&self.model, field)?;
        let target = steps
            .last()
            .and_then(|s| catalog.field(&s.model, &s.field))
            .and_then(|f| f.target())
            .ok_or_else(|| self.argument_error("get_records", format!("'{}' is not a relation", field)))?;
        let ids = self.get(field)?.to_ids().unwrap_or_default();
        Ok(self.env.pool(target)?.browse(&ids))
    }

    /// Writes one field on every record.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        self.write(FieldMap::new().with(field, value))
    }

    /// Values of `fields` (all stored fields when empty), one map per
    /// record, keyed as requested.
    pub fn read(&self, fields: &[&str]) -> Result<Vec<FieldMap>> {
        let rc = self.load(fields)?;
        let names: Vec<String> = if fields.is_empty() {
            self.env
                .catalog()
                .must_model(&self.model)?
                .stored_field_names()
        } else {
            fields.iter().map(ToString::to_string).collect()
        };
        rc.records()?
            .iter()
            .map(|record| {
                let mut map = FieldMap::new().with("ID", record.ensure_one()?);
                for name in &names {
                    map.insert(name.clone(), record.get(name)?);
                }
                Ok(map)
            })
            .collect()
    }

    // ========================================================================
    // CRUD
    // ========================================================================

    /// Loads `fields` (all stored fields when empty) into the cache,
    /// skipping values already cached.
    pub fn load(&self, fields: &[&str]) -> Result<Self> {
        let names = fields.iter().map(ToString::to_string).collect::<Vec<_>>();
        let result = self.call("Load", vec![Arg::Names(names)])?;
        self.into_records(result)
    }

    /// Reloads `fields` from the database even when cached.
    pub fn force_load(&self, fields: &[&str]) -> Result<Self> {
        let rc = self.fetch()?;
        let ids = rc.ids()?;
        let catalog = self.env.catalog_arc();
        let names: Vec<String> = if fields.is_empty() {
            catalog.must_model(&self.model)?.stored_field_names()
        } else {
            fields.iter().map(ToString::to_string).collect()
        };
        for name in &names {
            let steps = catalog.expand_path(&self.model, name)?;
            let Some(first) = steps.first() else {
                continue;
            };
            let mut cache = self.env.cache();
            for id in &ids {
                cache.remove_entry(catalog.as_ref(), &first.model, *id, &first.field);
            }
        }
        rc.load(fields)
    }

    /// Creates one record and returns it.
    pub fn create(&self, data: FieldMap) -> Result<Self> {
        let result = self.call("Create", vec![Arg::Map(data)])?;
        self.into_records(result)
    }

    /// Writes `data` on every record.
    pub fn write(&self, data: FieldMap) -> Result<()> {
        self.call("Write", vec![Arg::Map(data)])?;
        Ok(())
    }

    /// Deletes the records, returning how many rows were deleted.
    pub fn unlink(&self) -> Result<u64> {
        let result = self.call("Unlink", Vec::new())?;
        let count = result.as_value()?.as_i64().unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Duplicates the only record, applying `overrides` to the copy.
    pub fn copy(&self, overrides: FieldMap) -> Result<Self> {
        let result = self.call("Copy", vec![Arg::Map(overrides)])?;
        self.into_records(result)
    }

    /// Values that would change if `values` were entered on the record (or
    /// on a new record for an empty collection), as computed by the
    /// onchange methods of `fields`. Nothing is persisted.
    pub fn onchange(&self, values: FieldMap, fields: &[&str]) -> Result<FieldMap> {
        let names = fields.iter().map(ToString::to_string).collect::<Vec<_>>();
        self.call("Onchange", vec![Arg::Map(values), Arg::Names(names)])?
            .as_map()
    }
}
