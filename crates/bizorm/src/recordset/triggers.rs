//! Recomputation of dependent fields.

use bizorm_core::{ArgumentError, Error, Operator, Result, Value};
use bizorm_query::Condition;

use crate::depends::ComputeDirective;
use crate::environment::Environment;
use crate::fields::Field;

use super::{RecordCollection, load, write};

/// Runs the compute method of `field` on one record and extracts the
/// field value from the returned map.
pub(crate) fn compute_field(record: &RecordCollection, field: &Field) -> Result<Value> {
    let Some(method) = field.compute() else {
        return Err(Error::Argument(ArgumentError::new(
            record.model_name(),
            field.name(),
            "field is not computed",
        )));
    };
    let map = record.call_internal(method, Vec::new())?.as_map()?;
    let value = map
        .get(field.name())
        .or_else(|| map.get(field.json()))
        .cloned()
        .unwrap_or(Value::Null);
    field.field_type().coerce(value)
}

/// Records of the directive's model whose computed field depends on the
/// changed records `ids`.
fn affected_ids(env: &Environment, directive: &ComputeDirective, ids: &[i64]) -> Result<Vec<i64>> {
    if directive.path.is_empty() {
        return Ok(ids.to_vec());
    }
    env.pool(&directive.model)?
        .search(Condition::leaf(
            directive.path.as_str(),
            Operator::In,
            Value::Ids(ids.to_vec()),
        ))
        .fetch_unrestricted()
}

/// Applies one directive to `ids`: non-stored values are dropped from the
/// cache, stored ones recomputed and written when they changed.
pub(crate) fn run_directive(env: &Environment, directive: &ComputeDirective, ids: &[i64]) -> Result<()> {
    let catalog = env.catalog_arc();
    let field = catalog.must_field(&directive.model, &directive.field)?;
    if !directive.stored {
        let mut cache = env.cache();
        for id in ids {
            cache.remove_entry(catalog.as_ref(), &directive.model, *id, &directive.field);
        }
        return Ok(());
    }

    let pool = env.pool(&directive.model)?;
    let slug = env.slug_for(field);
    let names = [field.name().to_string()];
    for id in ids {
        let record = pool.browse_one(*id);
        load::load(&record, &names)?;
        let old = env
            .cache()
            .get(catalog.as_ref(), &directive.model, *id, field.name(), &slug)
            .unwrap_or(Value::Null);
        let new = compute_field(&record, field)?;
        if old.equivalent(&new) {
            continue;
        }
        tracing::debug!(
            model = %directive.model,
            field = %directive.field,
            record = id,
            "Recomputed stored field"
        );
        write::store_computed(&record, field, new)?;
    }
    Ok(())
}

/// Recomputes everything depending on `fields` of the records of `rc`.
/// Each directive runs once, however many of the fields trigger it.
pub(crate) fn process_triggers(rc: &RecordCollection, fields: &[String]) -> Result<()> {
    if fields.is_empty() {
        return Ok(());
    }
    let ids = rc.fetch_unrestricted()?;
    if ids.is_empty() {
        return Ok(());
    }
    let env = rc.env();
    let catalog = env.catalog_arc();
    let mut directives: Vec<&ComputeDirective> = Vec::new();
    for field in fields {
        for directive in catalog.directives(rc.model_name(), field) {
            if !directives.contains(&directive) {
                directives.push(directive);
            }
        }
    }
    for directive in directives {
        let affected = affected_ids(env, directive, &ids)?;
        if affected.is_empty() {
            continue;
        }
        tracing::trace!(
            model = %directive.model,
            field = %directive.field,
            records = affected.len(),
            "Trigger"
        );
        run_directive(env, directive, &affected)?;
    }
    Ok(())
}

/// Triggers the reverse relations listing `model` records through `fk`,
/// on the target records `targets` (old and new values of the key).
pub(crate) fn process_reverse_triggers(
    env: &Environment,
    model: &str,
    fk: &str,
    targets: &[i64],
) -> Result<()> {
    if targets.is_empty() {
        return Ok(());
    }
    for (target_model, reverse) in env.catalog().reverse_fields(model, fk) {
        let records = env.pool(&target_model)?.browse(targets);
        process_triggers(&records, &[reverse])?;
    }
    Ok(())
}

/// Directives that records of other models hold on `ids` of `model`,
/// with the records they affect. Taken before a delete, while the paths
/// still resolve.
pub(crate) fn capture_dependents(
    env: &Environment,
    model: &str,
    ids: &[i64],
) -> Result<Vec<(ComputeDirective, Vec<i64>)>> {
    let catalog = env.catalog_arc();
    let m = catalog.must_model(model)?;
    let mut captured: Vec<(ComputeDirective, Vec<i64>)> = Vec::new();
    for field in m.fields() {
        for directive in catalog.directives(model, field.name()) {
            if directive.path.is_empty() || captured.iter().any(|(d, _)| d == directive) {
                continue;
            }
            let affected = affected_ids(env, directive, ids)?;
            if !affected.is_empty() {
                captured.push((directive.clone(), affected));
            }
        }
    }
    Ok(captured)
}
