//! Updating records.
//!
//! A write is split by field kind: column values go into one `UPDATE`,
//! relation fields rewrite foreign keys or link rows, contexted fields
//! upsert their holder rows, related fields are written on the records they
//! mirror and computed fields go through their inverse method. Triggers
//! and constraint methods run once storage and cache agree again.

use bizorm_core::{ArgumentError, ContextLink, Error, FieldMap, FieldType, Operator, Result, TypeError, Value};
use bizorm_query::{Condition, DeleteBuilder, InsertBuilder, UpdateBuilder};
use bizorm_session::DEFAULT_SLUG;

use crate::catalog::Catalog;
use crate::environment::Environment;
use crate::fields::Field;
use crate::methods::Arg;
use crate::model::Model;
use crate::security::Permission;

use super::{RecordCollection, load, search, triggers};

/// Follow-up work of a write, run once storage is up to date.
#[derive(Debug, Default)]
pub(crate) struct Applied {
    /// Names of the written fields.
    changed: Vec<String>,
    /// `(model, foreign key, old and new targets)`.
    keys: Vec<(String, String, Vec<i64>)>,
    /// `(model, ids, field)` changed on records of other models.
    others: Vec<(String, Vec<i64>, String)>,
    constraints: Vec<String>,
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|i| i == item) {
        list.push(item.to_string());
    }
}

impl Applied {
    pub(crate) fn touch(&mut self, field: &Field) {
        push_unique(&mut self.changed, field.name());
        if let Some(method) = field.constraint() {
            push_unique(&mut self.constraints, method);
        }
    }

    pub(crate) fn key_targets(&mut self, model: &str, fk: &str, mut targets: Vec<i64>) {
        targets.sort_unstable();
        targets.dedup();
        if !targets.is_empty() {
            self.keys.push((model.to_string(), fk.to_string(), targets));
        }
    }
}

fn type_error(expected: &str, value: &Value) -> Error {
    Error::Type(TypeError::new(expected, format!("{value:?}")))
}

fn relation_target(model: &str, field: &Field) -> Result<String> {
    field.target().map(ToString::to_string).ok_or_else(|| {
        Error::Argument(ArgumentError::new(model, "Write", format!("'{}' has no target model", field.name())))
    })
}

/// Creates one record of `model` through its `Create` method.
pub(crate) fn create_nested(env: &Environment, model: &str, data: FieldMap) -> Result<i64> {
    env.pool(model)?
        .call_internal("Create", vec![Arg::Map(data)])?
        .as_records(env, model)?
        .ensure_one()
}

/// Value stored in the column of `field`. Nested creates on a foreign key
/// are run first and replaced by the new id; `false` clears non-boolean
/// fields.
pub(crate) fn column_value(env: &Environment, field: &Field, value: Value) -> Result<Value> {
    let field_type = field.field_type();
    if field_type.is_fk_relation() {
        if let Value::Create(maps) = value {
            let target = relation_target(&field.meta().model, field)?;
            let mut created = Value::Null;
            for map in maps {
                created = Value::Int(create_nested(env, &target, map)?);
            }
            return Ok(created);
        }
        return match value.to_ids() {
            Some(ids) if ids.len() <= 1 => Ok(ids.first().map_or(Value::Null, |id| Value::Int(*id))),
            _ => Err(type_error("record id", &value)),
        };
    }
    match value {
        Value::Bool(false) if field_type != FieldType::Boolean => Ok(Value::Null),
        other => field_type.coerce(other),
    }
}

/// Ids cached at `path` for `ids`, in no particular order.
pub(crate) fn cached_ids(env: &Environment, catalog: &Catalog, model: &str, ids: &[i64], path: &str) -> Vec<i64> {
    let cache = env.cache();
    ids.iter()
        .filter_map(|id| cache.get(catalog, model, *id, path, DEFAULT_SLUG))
        .flat_map(|v| v.to_ids().unwrap_or_default())
        .collect()
}

pub(crate) fn sorted(mut ids: Vec<i64>) -> Vec<i64> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

// ============================================================================
// Entry points
// ============================================================================

/// `Write` of the base mixin.
#[tracing::instrument(level = "debug", skip(rc, data), fields(model = %rc.model))]
pub(crate) fn write(rc: &RecordCollection, mut data: FieldMap) -> Result<()> {
    let ids = rc.ids()?;
    if ids.is_empty() || data.is_empty() {
        return Ok(());
    }
    search::check_row_access(rc, &ids, Permission::Write, "Write")?;
    let catalog = rc.env().catalog_arc();
    let model = catalog.must_model(&rc.model)?;
    if model.has_field("WriteDate") && !data.contains_key("WriteDate") && !data.contains_key("write_date") {
        data.insert("WriteDate", chrono::Utc::now().naive_utc());
    }
    let rc = rc.browse(&ids);
    let applied = apply(&rc, &ids, data)?;
    finish(&rc, &applied)
}

/// Stores `data` on `ids` without running triggers.
pub(crate) fn apply(rc: &RecordCollection, ids: &[i64], data: FieldMap) -> Result<Applied> {
    let env = rc.env();
    let catalog = env.catalog_arc();
    let model = catalog.must_model(&rc.model)?;
    let mut applied = Applied::default();

    let mut columns: Vec<(&Field, Value)> = Vec::new();
    let mut relations = Vec::new();
    let mut contexted = Vec::new();
    let mut related = Vec::new();
    let mut inverses = Vec::new();
    for (key, value) in data {
        if key == "ID" || key == "id" {
            continue;
        }
        let field = model.must_field(&key)?;
        if field.is_related() {
            related.push((field, value));
        } else if field.is_computed() {
            if field.inverse().is_none() {
                return Err(Error::Argument(ArgumentError::new(
                    &rc.model,
                    "Write",
                    format!("computed field '{}' has no inverse method", field.name()),
                )));
            }
            inverses.push((field, value));
        } else if field.is_contexted() {
            contexted.push((field, value));
        } else if field.column().is_some() {
            columns.push((field, column_value(env, field, value)?));
        } else {
            relations.push((field, value));
        }
        applied.touch(field);
    }

    if !columns.is_empty() {
        write_columns(rc, model, ids, &columns, &mut applied)?;
    }
    for (field, value) in relations {
        match field.field_type() {
            FieldType::One2Many | FieldType::Rev2One => write_reverse(rc, field, ids, value, &mut applied)?,
            FieldType::Many2Many => write_links(rc, field, ids, value, &mut applied)?,
            _ => {}
        }
    }
    for (field, value) in contexted {
        write_contexted(rc, field, ids, value)?;
    }
    for (field, value) in related {
        write_related(rc, field, ids, value)?;
    }
    for (field, value) in inverses {
        if let Some(inverse) = field.inverse() {
            rc.call_internal(inverse, vec![Arg::Value(value)])?;
        }
        let mut cache = env.cache();
        for id in ids {
            cache.remove_entry(catalog.as_ref(), &rc.model, *id, field.name());
        }
    }
    Ok(applied)
}

/// Triggers, reverse triggers and constraint methods of a write.
pub(crate) fn finish(rc: &RecordCollection, applied: &Applied) -> Result<()> {
    propagate(rc, applied)?;
    check_constraints(rc, applied)
}

pub(crate) fn propagate(rc: &RecordCollection, applied: &Applied) -> Result<()> {
    let env = rc.env();
    triggers::process_triggers(rc, &applied.changed)?;
    for (model, fk, targets) in &applied.keys {
        triggers::process_reverse_triggers(env, model, fk, targets)?;
    }
    for (model, ids, field) in &applied.others {
        let records = env.pool(model)?.browse(ids);
        triggers::process_triggers(&records, std::slice::from_ref(field))?;
    }
    Ok(())
}

pub(crate) fn check_constraints(rc: &RecordCollection, applied: &Applied) -> Result<()> {
    for method in &applied.constraints {
        rc.call_internal(method, Vec::new())?;
    }
    Ok(())
}

/// Stores a recomputed value of `field` on the only record.
pub(crate) fn store_computed(record: &RecordCollection, field: &Field, value: Value) -> Result<()> {
    let id = record.ensure_one()?;
    let env = record.env();
    let catalog = env.catalog_arc();
    let model = catalog.must_model(&record.model)?;

    let mut targets = Vec::new();
    if field.field_type().is_fk_relation() {
        targets = cached_ids(env, &catalog, &record.model, &[id], field.json());
        targets.extend(value.as_i64());
    }
    if let Some(column) = field.column() {
        let (sql, params) = UpdateBuilder::new(model.table())
            .set(column, value.clone())
            .where_in("id", &[id])
            .build(env.dialect());
        env.execute(&sql, &params).map_err(|e| model.translate(e))?;
    }
    let slug = env.slug_for(field);
    env.cache()
        .update_entry(catalog.as_ref(), &record.model, id, field.json(), value, &slug);

    triggers::process_triggers(record, &[field.name().to_string()])?;
    triggers::process_reverse_triggers(env, &record.model, field.name(), &sorted(targets))
}

// ============================================================================
// Field kinds
// ============================================================================

fn write_columns(
    rc: &RecordCollection,
    model: &Model,
    ids: &[i64],
    columns: &[(&Field, Value)],
    applied: &mut Applied,
) -> Result<()> {
    let env = rc.env();
    let catalog = env.catalog_arc();

    let keys: Vec<String> = columns
        .iter()
        .filter(|(f, _)| f.field_type().is_fk_relation())
        .map(|(f, _)| f.name().to_string())
        .collect();
    if !keys.is_empty() {
        load::load(rc, &keys)?;
        for (field, value) in columns.iter().filter(|(f, _)| f.field_type().is_fk_relation()) {
            let mut targets = cached_ids(env, &catalog, &rc.model, ids, field.json());
            targets.extend(value.as_i64());
            applied.key_targets(&rc.model, field.name(), targets);
        }
    }

    let mut update = UpdateBuilder::new(model.table());
    for (field, value) in columns {
        if let Some(column) = field.column() {
            update = update.set(column, value.clone());
        }
    }
    let (sql, params) = update.where_in("id", ids).build(env.dialect());
    env.execute(&sql, &params).map_err(|e| model.translate(e))?;

    let mut cache = env.cache();
    for id in ids {
        for (field, value) in columns {
            cache.update_entry(catalog.as_ref(), &rc.model, *id, field.json(), value.clone(), DEFAULT_SLUG);
        }
    }
    Ok(())
}

/// One-to-many and reverse one-to-one fields: the foreign key lives on the
/// target records. Ids replace the current children; nested creates add
/// new ones.
fn write_reverse(
    rc: &RecordCollection,
    field: &Field,
    ids: &[i64],
    value: Value,
    applied: &mut Applied,
) -> Result<()> {
    let env = rc.env();
    let catalog = env.catalog_arc();
    let target = catalog.must_model(&relation_target(&rc.model, field)?)?;
    let fk = target.must_field(field.meta().reverse_fk.as_deref().unwrap_or_default())?;
    let Some(fk_column) = fk.column() else {
        return Err(type_error("foreign key column", &Value::from(fk.name())));
    };

    if let Value::Create(maps) = value {
        for id in ids {
            for map in &maps {
                let child = map.clone().with(fk.name(), *id);
                create_nested(env, target.name(), child)?;
            }
        }
        return Ok(());
    }

    let children = sorted(value.to_ids().ok_or_else(|| type_error("record ids", &value))?);
    if field.field_type() == FieldType::Rev2One && children.len() > 1 {
        return Err(type_error("at most one record id", &value));
    }
    let pool = env.pool(target.name())?;
    let fk_names = [fk.name().to_string()];
    load::load(&pool.browse(&children), &fk_names)?;
    let mut owners = cached_ids(env, &catalog, target.name(), &children, fk.json());
    let mut moved = children.clone();

    for id in ids {
        moved.extend(
            pool.search(Condition::leaf(fk.name(), Operator::Equals, *id))
                .fetch_unrestricted()?,
        );
        let (sql, params) = UpdateBuilder::new(target.table())
            .set(fk_column, Value::Null)
            .where_eq(fk_column, *id)
            .where_not_in("id", &children)
            .build(env.dialect());
        env.execute(&sql, &params).map_err(|e| target.translate(e))?;
        if !children.is_empty() {
            let (sql, params) = UpdateBuilder::new(target.table())
                .set(fk_column, *id)
                .where_in("id", &children)
                .build(env.dialect());
            env.execute(&sql, &params).map_err(|e| target.translate(e))?;
        }
        env.cache().update_entry(
            catalog.as_ref(),
            &rc.model,
            *id,
            field.json(),
            Value::Ids(children.clone()),
            DEFAULT_SLUG,
        );
        owners.push(*id);
    }

    applied.key_targets(target.name(), fk.name(), owners);
    applied
        .others
        .push((target.name().to_string(), sorted(moved), fk.name().to_string()));
    Ok(())
}

/// Many-to-many fields: link rows are replaced, or extended by nested
/// creates.
fn write_links(
    rc: &RecordCollection,
    field: &Field,
    ids: &[i64],
    value: Value,
    applied: &mut Applied,
) -> Result<()> {
    let env = rc.env();
    let catalog = env.catalog_arc();
    let Some(link) = field.meta().link.clone() else {
        return Ok(());
    };
    let link_table = catalog.must_model(&link.model)?.table().to_string();
    let target = relation_target(&rc.model, field)?;

    load::load(rc, &[field.name().to_string()])?;
    let current: Vec<Vec<i64>> = ids
        .iter()
        .map(|id| cached_ids(env, &catalog, &rc.model, &[*id], field.json()))
        .collect();
    let mut touched: Vec<i64> = current.iter().flatten().copied().collect();

    let wanted: Vec<Vec<i64>> = match value {
        Value::Create(maps) => {
            let mut created = Vec::with_capacity(maps.len());
            for map in maps {
                created.push(create_nested(env, &target, map)?);
            }
            current
                .iter()
                .map(|c| sorted(c.iter().chain(&created).copied().collect()))
                .collect()
        }
        other => {
            let targets = other.to_ids().ok_or_else(|| type_error("record ids", &other))?;
            vec![sorted(targets); ids.len()]
        }
    };

    for (id, targets) in ids.iter().zip(&wanted) {
        let (sql, params) = DeleteBuilder::new(&link_table)
            .where_eq(&link.ours, *id)
            .build(env.dialect());
        env.execute(&sql, &params)?;
        for other in targets {
            let (sql, params) = InsertBuilder::new(&link_table)
                .value(&link.ours, *id)
                .value(&link.theirs, *other)
                .build(env.dialect());
            env.execute(&sql, &params)?;
        }
        touched.extend(targets);
        env.cache().update_entry(
            catalog.as_ref(),
            &rc.model,
            *id,
            field.json(),
            Value::Ids(targets.clone()),
            DEFAULT_SLUG,
        );
    }

    let touched = sorted(touched);
    for reverse in catalog.must_model(&target)?.fields() {
        let mirrors = reverse
            .meta()
            .link
            .as_ref()
            .is_some_and(|l| l.model == link.model && l.ours == link.theirs);
        if mirrors && !touched.is_empty() {
            applied
                .others
                .push((target.clone(), touched.clone(), reverse.name().to_string()));
        }
    }
    Ok(())
}

fn context_row_exists(env: &Environment, holder: &Model, link: &ContextLink, id: i64, slug: &str) -> Result<bool> {
    let d = env.dialect();
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {} = {} AND {} = {}",
        d.quote_identifier(holder.table()),
        d.quote_identifier(&link.record),
        d.placeholder(1),
        d.quote_identifier(&link.slug),
        d.placeholder(2)
    );
    let rows = env.query(&sql, &[Value::Int(id), Value::from(slug)])?;
    Ok(rows.first().and_then(|r| r.get_i64(0)).unwrap_or(0) > 0)
}

fn store_context_value(
    env: &Environment,
    holder: &Model,
    link: &ContextLink,
    id: i64,
    slug: &str,
    value: &Value,
) -> Result<()> {
    let (sql, params) = UpdateBuilder::new(holder.table())
        .set(&link.value, value.clone())
        .where_eq(&link.record, id)
        .where_eq(&link.slug, slug)
        .build(env.dialect());
    let updated = env.execute(&sql, &params).map_err(|e| holder.translate(e))?;
    if updated == 0 {
        let (sql, params) = InsertBuilder::new(holder.table())
            .value(&link.record, id)
            .value(&link.slug, slug)
            .value(&link.value, value.clone())
            .build(env.dialect());
        env.execute(&sql, &params).map_err(|e| holder.translate(e))?;
    }
    Ok(())
}

/// Contexted fields: the value is stored for the current slug. A record
/// without a default value gets this one as its default too.
fn write_contexted(rc: &RecordCollection, field: &Field, ids: &[i64], value: Value) -> Result<()> {
    let env = rc.env();
    let catalog = env.catalog_arc();
    let Some(link) = field.meta().contexts.clone() else {
        return Ok(());
    };
    let holder = catalog.must_model(&link.model)?;
    let value = column_value(env, field, value)?;
    let slug = env.slug_for(field);

    for id in ids {
        store_context_value(env, holder, &link, *id, &slug, &value)?;
        let mut slugs = vec![slug.clone()];
        if !slug.is_empty() && !context_row_exists(env, holder, &link, *id, DEFAULT_SLUG)? {
            store_context_value(env, holder, &link, *id, DEFAULT_SLUG, &value)?;
            slugs.push(DEFAULT_SLUG.to_string());
        }
        let mut cache = env.cache();
        for s in &slugs {
            cache.update_entry(catalog.as_ref(), &rc.model, *id, field.json(), value.clone(), s);
        }
    }
    tracing::debug!(model = %rc.model, field = field.name(), slug = %slug, "Stored contexted value");
    Ok(())
}

/// Related fields write through to the records at the end of their path.
fn write_related(rc: &RecordCollection, field: &Field, ids: &[i64], value: Value) -> Result<()> {
    let env = rc.env();
    let catalog = env.catalog_arc();
    let steps = catalog.expand_path(&rc.model, field.name())?;
    let Some((last, hops)) = steps.split_last() else {
        return Ok(());
    };
    if hops.is_empty() {
        return Ok(());
    }
    let prefix = hops
        .iter()
        .map(|s| s.field.as_str())
        .collect::<Vec<_>>()
        .join(".");
    load::load(rc, std::slice::from_ref(&prefix))?;
    let targets = sorted(cached_ids(env, &catalog, &rc.model, ids, &prefix));
    if targets.is_empty() {
        return Ok(());
    }
    tracing::trace!(model = %rc.model, field = field.name(), target = %last.model, "Writing through related field");
    env.pool(&last.model)?
        .browse(&targets)
        .call_internal("Write", vec![Arg::Map(FieldMap::new().with(last.field.clone(), value))])?;
    Ok(())
}
