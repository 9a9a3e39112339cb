//! Id fetching, counting and grouped reads.

use std::collections::HashSet;

use bizorm_core::{Error, FieldMap, FieldType, PermissionError, Result, Row, Value};
use bizorm_query::{Aggregate, Condition, Query, SelectStatement, SqlBuilder};
use serde::Serialize;

use crate::catalog::Catalog;
use crate::environment::Environment;
use crate::security::Permission;

use super::RecordCollection;

/// One group of a grouped read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupResult {
    /// Group path → value.
    pub group: FieldMap,
    /// Records in the group.
    pub count: i64,
    /// Aggregated path → value.
    pub aggregates: FieldMap,
}

/// Row filter of the environment user, superuser excepted.
fn row_filter(env: &Environment, model: &str, perm: Permission) -> Option<Condition> {
    if env.is_superuser() {
        return None;
    }
    env.access().row_filter(env.uid(), model, perm)
}

fn restrict(env: &Environment, model: &str, condition: Condition, perm: Permission) -> Condition {
    match row_filter(env, model, perm) {
        Some(filter) if condition.is_empty() => filter,
        Some(filter) => condition.intersect(filter),
        None => condition,
    }
}

fn run(env: &Environment, stmt: &SelectStatement) -> Result<Vec<Row>> {
    env.query(&stmt.sql, &stmt.params)
}

/// Field type of the last hop of `path`.
pub(crate) fn terminal_type(catalog: &Catalog, model: &str, path: &str) -> Result<FieldType> {
    let steps = catalog.expand_path(model, path)?;
    let Some(last) = steps.last() else {
        return Ok(FieldType::Integer);
    };
    if last.field == "ID" {
        return Ok(FieldType::Integer);
    }
    Ok(catalog.must_field(&last.model, &last.field)?.field_type())
}

/// Ids matching the collection query, in order, without duplicates.
/// `restricted` applies the user's read filter.
pub(crate) fn fetch_ids(rc: &RecordCollection, restricted: bool) -> Result<Vec<i64>> {
    let env = rc.env();
    let catalog = env.catalog_arc();
    let model = catalog.must_model(&rc.model)?;

    let mut query: Query = rc.query.clone();
    if query.order.is_empty() {
        query.order = model.default_order().to_vec();
    }
    if restricted {
        query.condition = restrict(env, &rc.model, query.condition, Permission::Read);
    }

    let slugs = env.slugs();
    let builder = SqlBuilder::new(catalog.as_ref(), env.dialect(), &rc.model)?.with_slugs(&slugs);
    let stmt = if query.is_grouped() {
        builder.select_ids_grouped(&query)?
    } else {
        builder.select_ids(&query)?
    };
    let rows = run(env, &stmt)?;
    let mut seen = HashSet::with_capacity(rows.len());
    let ids: Vec<i64> = rows
        .iter()
        .filter_map(|row| row.get_i64(0))
        .filter(|id| seen.insert(*id))
        .collect();
    tracing::debug!(model = %rc.model, count = ids.len(), "Fetched ids");
    Ok(ids)
}

pub(crate) fn count(rc: &RecordCollection) -> Result<u64> {
    let env = rc.env();
    let catalog = env.catalog_arc();
    let condition = restrict(env, &rc.model, rc.query.condition.clone(), Permission::Read);
    let slugs = env.slugs();
    let stmt = SqlBuilder::new(catalog.as_ref(), env.dialect(), &rc.model)?
        .with_slugs(&slugs)
        .count(&condition)?;
    let rows = run(env, &stmt)?;
    let count = rows.first().and_then(|r| r.get_i64(0)).unwrap_or(0);
    Ok(u64::try_from(count).unwrap_or(0))
}

#[tracing::instrument(level = "debug", skip(rc, aggregates), fields(model = %rc.model))]
pub(crate) fn read_group(rc: &RecordCollection, aggregates: &[Aggregate]) -> Result<Vec<GroupResult>> {
    let env = rc.env();
    let catalog = env.catalog_arc();
    let mut query = rc.query.clone();
    query.condition = restrict(env, &rc.model, query.condition, Permission::Read);

    let group_types = query
        .group_by
        .iter()
        .map(|g| terminal_type(&catalog, &rc.model, g))
        .collect::<Result<Vec<_>>>()?;
    let slugs = env.slugs();
    let stmt = SqlBuilder::new(catalog.as_ref(), env.dialect(), &rc.model)?
        .with_slugs(&slugs)
        .read_group(&query, aggregates)?;
    let rows = run(env, &stmt)?;

    rows.into_iter()
        .map(|row| {
            let mut values = row.into_values().into_iter();
            let mut group = FieldMap::new();
            for (path, field_type) in query.group_by.iter().zip(&group_types) {
                let value = values.next().unwrap_or(Value::Null);
                group.insert(path.clone(), field_type.coerce(value)?);
            }
            let count = values.next().and_then(|v| v.as_i64()).unwrap_or(0);
            let mut aggregated = FieldMap::new();
            for agg in aggregates {
                aggregated.insert(agg.path.clone(), values.next().unwrap_or(Value::Null));
            }
            Ok(GroupResult {
                group,
                count,
                aggregates: aggregated,
            })
        })
        .collect()
}

/// Fails unless every record of `ids` passes the user's `perm` filter.
pub(crate) fn check_row_access(
    rc: &RecordCollection,
    ids: &[i64],
    perm: Permission,
    method: &str,
) -> Result<()> {
    let env = rc.env();
    let Some(filter) = row_filter(env, &rc.model, perm) else {
        return Ok(());
    };
    let catalog = env.catalog_arc();
    let condition = Condition::ids(ids).intersect(filter);
    let slugs = env.slugs();
    let stmt = SqlBuilder::new(catalog.as_ref(), env.dialect(), &rc.model)?
        .with_slugs(&slugs)
        .count(&condition)?;
    let allowed = run(env, &stmt)?
        .first()
        .and_then(|r| r.get_i64(0))
        .unwrap_or(0);
    if usize::try_from(allowed).unwrap_or(0) == ids.len() {
        return Ok(());
    }
    tracing::warn!(uid = env.uid(), model = %rc.model, method, "Row access denied");
    Err(Error::Permission(PermissionError {
        uid: env.uid(),
        model: rc.model.clone(),
        method: method.to_string(),
        caller: env.current_caller(),
    }))
}
