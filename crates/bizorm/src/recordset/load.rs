//! Loading field values into the cache.
//!
//! Requested paths are split by how they can be fetched:
//!
//! - columns, contexted values and many-to-one chains ending in one of them
//!   go into a single `SELECT`, hops first so the cache can walk them;
//! - one-to-many, reverse one-to-one and many-to-many fields of the model
//!   get one query each, grouped per owner;
//! - non-stored computed fields are computed per record;
//! - anything crossing a multi-valued hop is loaded in two steps: the head
//!   on these records, then the tail on the records it leads to.

use std::collections::{BTreeMap, BTreeSet};

use bizorm_core::{FieldType, Result, Value};
use bizorm_query::{Condition, SqlBuilder};

use crate::catalog::Catalog;
use crate::depends::PathStep;
use crate::environment::Environment;

use super::RecordCollection;
use super::triggers::compute_field;

/// A path fetched by the `SELECT`.
#[derive(Debug)]
struct Column {
    path: String,
    depth: usize,
    field_type: FieldType,
    slug: String,
}

/// A path loaded in two steps.
#[derive(Debug)]
struct Deferred {
    head: String,
    target: String,
    tail: String,
}

#[derive(Debug, Default)]
struct LoadPlan {
    /// Storage path → column.
    columns: BTreeMap<String, Column>,
    relations: BTreeSet<String>,
    computes: BTreeSet<String>,
    deferred: Vec<Deferred>,
}

fn physical(steps: &[PathStep]) -> String {
    steps
        .iter()
        .map(|s| s.field.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

impl LoadPlan {
    fn is_empty(&self) -> bool {
        self.columns.is_empty()
            && self.relations.is_empty()
            && self.computes.is_empty()
            && self.deferred.is_empty()
    }

    fn is_forward_hop(catalog: &Catalog, step: &PathStep) -> bool {
        catalog
            .field(&step.model, &step.field)
            .is_some_and(|f| f.field_type().is_fk_relation())
    }

    /// Adds the physical steps of one path and every many-to-one hop
    /// leading to it as columns.
    fn add_columns(&mut self, env: &Environment, catalog: &Catalog, steps: &[PathStep]) -> Result<()> {
        let mut json = Vec::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            let field = catalog.must_field(&step.model, &step.field)?;
            json.push(field.json().to_string());
            let key = json.join(".");
            self.columns.entry(key).or_insert_with(|| Column {
                path: physical(&steps[..=i]),
                depth: i,
                field_type: field.field_type(),
                slug: env.slug_for(field),
            });
        }
        Ok(())
    }

    fn add(&mut self, env: &Environment, catalog: &Catalog, model: &str, path: &str) -> Result<()> {
        let mut steps = catalog.expand_path(model, path)?;
        if steps.last().is_some_and(|s| s.field == "ID") {
            steps.pop();
        }
        let Some((last, hops)) = steps.split_last() else {
            return Ok(());
        };

        if let Some(k) = hops.iter().position(|s| !Self::is_forward_hop(catalog, s)) {
            self.deferred.push(Deferred {
                head: physical(&steps[..=k]),
                target: steps[k + 1].model.clone(),
                tail: physical(&steps[k + 1..]),
            });
            return Ok(());
        }

        let terminal = catalog.must_field(&last.model, &last.field)?;
        if terminal.column().is_some() || terminal.is_contexted() {
            return self.add_columns(env, catalog, &steps);
        }
        if !hops.is_empty() {
            self.add_columns(env, catalog, hops)?;
            self.deferred.push(Deferred {
                head: physical(hops),
                target: last.model.clone(),
                tail: last.field.clone(),
            });
        } else if terminal.is_computed() {
            self.computes.insert(terminal.name().to_string());
        } else if terminal.field_type().is_x2many() || terminal.field_type().is_reverse_relation() {
            self.relations.insert(terminal.name().to_string());
        }
        Ok(())
    }
}

/// Loads `fields` (all default-loaded fields when empty) for the records
/// of `rc`, skipping what the cache already holds.
#[tracing::instrument(level = "debug", skip(rc), fields(model = %rc.model))]
pub(crate) fn load(rc: &RecordCollection, fields: &[String]) -> Result<RecordCollection> {
    let rc = rc.fetch()?;
    let ids = rc.ids()?;
    if ids.is_empty() {
        return Ok(rc);
    }
    let env = rc.env();
    let catalog = env.catalog_arc();
    let model = catalog.must_model(&rc.model)?;
    let fields: Vec<String> = if fields.is_empty() {
        model.stored_field_names()
    } else {
        fields.to_vec()
    };

    let mut plan = LoadPlan::default();
    let mut missing = Vec::new();
    for path in &fields {
        if path == "ID" || path == "id" {
            continue;
        }
        let slug = env.slug_for_path(&rc.model, path);
        let cached = env.cache().check_if_in_cache(
            catalog.as_ref(),
            &rc.model,
            &ids,
            std::slice::from_ref(path),
            &slug,
            true,
        );
        if !cached {
            plan.add(env, &catalog, &rc.model, path)?;
            missing.push(path.clone());
        }
    }
    if plan.is_empty() {
        return Ok(rc);
    }

    if !plan.columns.is_empty() {
        load_columns(&rc, &catalog, &ids, &plan.columns)?;
    }
    for name in &plan.relations {
        load_relation(&rc, &catalog, &ids, name)?;
    }
    for name in &plan.computes {
        let field = model.must_field(name)?;
        let slug = env.slug_for(field);
        for id in &ids {
            let value = compute_field(&rc.browse_one(*id), field)?;
            env.cache()
                .update_entry(catalog.as_ref(), &rc.model, *id, field.json(), value, &slug);
        }
    }
    for deferred in &plan.deferred {
        load(&rc, std::slice::from_ref(&deferred.head))?;
        let slug = env.slug_for_path(&rc.model, &deferred.head);
        let mut targets = Vec::new();
        {
            let cache = env.cache();
            for id in &ids {
                if let Some(value) = cache.get(catalog.as_ref(), &rc.model, *id, &deferred.head, &slug) {
                    targets.extend(value.to_ids().unwrap_or_default());
                }
            }
        }
        targets.sort_unstable();
        targets.dedup();
        if !targets.is_empty() {
            let target = env.pool(&deferred.target)?.browse(&targets);
            load(&target, std::slice::from_ref(&deferred.tail))?;
        }
    }

    env.tracker().record_load(&rc.model, &missing, ids.len());
    Ok(rc)
}

fn load_columns(
    rc: &RecordCollection,
    catalog: &Catalog,
    ids: &[i64],
    columns: &BTreeMap<String, Column>,
) -> Result<()> {
    let env = rc.env();
    let mut ordered: Vec<(&String, &Column)> = columns.iter().collect();
    ordered.sort_by_key(|(_, c)| c.depth);
    let paths: Vec<String> = ordered.iter().map(|(_, c)| c.path.clone()).collect();

    let slugs = env.slugs();
    let stmt = SqlBuilder::new(catalog, env.dialect(), &rc.model)?
        .with_slugs(&slugs)
        .select_fields(&paths, &Condition::ids(ids))?;
    let rows = env.query(&stmt.sql, &stmt.params)?;

    let mut cache = env.cache();
    for row in &rows {
        let Some(id) = row.get_i64(0) else {
            continue;
        };
        for (i, json) in stmt.columns.iter().enumerate().skip(1) {
            let Some(column) = columns.get(json) else {
                continue;
            };
            let raw = row.get(i).cloned().unwrap_or(Value::Null);
            let value = column.field_type.coerce(raw)?;
            cache.update_entry(catalog, &rc.model, id, json, value, &column.slug);
        }
    }
    tracing::debug!(model = %rc.model, rows = rows.len(), columns = stmt.columns.len(), "Loaded columns");
    Ok(())
}

/// Loads a one-to-many, reverse one-to-one or many-to-many field.
fn load_relation(rc: &RecordCollection, catalog: &Catalog, ids: &[i64], name: &str) -> Result<()> {
    let env = rc.env();
    let field = catalog.must_field(&rc.model, name)?;
    let slugs = env.slugs();
    let stmt = SqlBuilder::new(catalog, env.dialect(), &rc.model)?
        .with_slugs(&slugs)
        .select_fields(&[name.to_string()], &Condition::ids(ids))?;
    let rows = env.query(&stmt.sql, &stmt.params)?;

    let mut linked: BTreeMap<i64, Vec<i64>> = ids.iter().map(|id| (*id, Vec::new())).collect();
    for row in &rows {
        let (Some(owner), Some(other)) = (row.get_i64(0), row.get(1).and_then(Value::as_i64)) else {
            continue;
        };
        linked.entry(owner).or_default().push(other);
    }
    let mut cache = env.cache();
    for (owner, mut others) in linked {
        others.sort_unstable();
        others.dedup();
        cache.update_entry(catalog, &rc.model, owner, field.json(), Value::Ids(others), "");
    }
    Ok(())
}
