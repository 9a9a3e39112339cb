//! Duplicating records.

use std::collections::{HashMap, HashSet};

use bizorm_core::{FieldMap, FieldType, Result, Value};
use bizorm_session::DEFAULT_SLUG;

use crate::environment::Environment;
use crate::fields::Field;

use super::{RecordCollection, load, write};

/// Records already copied during one `Copy` call.
#[derive(Debug, Default)]
struct Copied {
    done: HashMap<(String, i64), i64>,
    in_progress: HashSet<(String, i64)>,
}

fn is_copied(field: &Field) -> bool {
    !(field.no_copy()
        || field.is_computed()
        || field.is_related()
        || field.is_contexted()
        || matches!(field.field_type(), FieldType::One2Many | FieldType::Rev2One))
}

/// `Copy` of the base mixin.
#[tracing::instrument(level = "debug", skip(rc, overrides), fields(model = %rc.model))]
pub(crate) fn copy(rc: &RecordCollection, overrides: FieldMap) -> Result<RecordCollection> {
    let id = rc.ensure_one()?;
    let mut copied = Copied::default();
    let new_id = copy_record(rc.env(), &rc.model, id, overrides, &mut copied)?;
    tracing::debug!(model = %rc.model, from = id, to = new_id, records = copied.done.len(), "Copied record");
    Ok(rc.browse_one(new_id))
}

/// Copies one record: plain values and many-to-many links are kept,
/// one-to-one targets and one-to-many children are duplicated along.
fn copy_record(env: &Environment, model_name: &str, id: i64, overrides: FieldMap, copied: &mut Copied) -> Result<i64> {
    let key = (model_name.to_string(), id);
    if let Some(done) = copied.done.get(&key) {
        return Ok(*done);
    }
    if !copied.in_progress.insert(key.clone()) {
        return Ok(id);
    }
    let catalog = env.catalog_arc();
    let model = catalog.must_model(model_name)?;
    let record = env.pool(model_name)?.browse_one(id);

    let fields: Vec<&Field> = model
        .fields()
        .iter()
        .filter(|f| is_copied(f) && !overrides.contains_key(f.name()) && !overrides.contains_key(f.json()))
        .collect();
    let names: Vec<String> = fields.iter().map(|f| f.name().to_string()).collect();
    load::load(&record, &names)?;

    let mut data = FieldMap::new();
    for field in fields {
        let value = env
            .cache()
            .get(catalog.as_ref(), model_name, id, field.json(), DEFAULT_SLUG)
            .unwrap_or(Value::Null);
        let value = match (field.field_type(), field.target(), value.as_i64()) {
            (FieldType::One2One, Some(target), Some(other)) if other != 0 => {
                Value::Int(copy_record(env, target, other, FieldMap::new(), copied)?)
            }
            _ => value,
        };
        data.insert(field.name(), value);
    }
    data.merge(overrides);
    let new_id = write::create_nested(env, model_name, data)?;
    copied.done.insert(key.clone(), new_id);

    for field in model.fields().iter().filter(|f| {
        f.field_type() == FieldType::One2Many && !f.no_copy() && !f.is_computed() && !f.is_related()
    }) {
        let (Some(target), Some(fk)) = (field.target(), field.meta().reverse_fk.as_deref()) else {
            continue;
        };
        load::load(&record, &[field.name().to_string()])?;
        let children = write::cached_ids(env, &catalog, model_name, &[id], field.json());
        for child in children {
            copy_record(env, target, child, FieldMap::new().with(fk, new_id), copied)?;
        }
    }
    copied.in_progress.remove(&key);
    Ok(new_id)
}
