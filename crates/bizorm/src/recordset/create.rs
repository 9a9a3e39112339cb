//! Creating records.

use bizorm_core::{ArgumentError, Error, FieldMap, FieldType, Result, Value};
use bizorm_query::InsertBuilder;
use bizorm_session::DEFAULT_SLUG;

use crate::depends::ComputeDirective;

use super::{RecordCollection, triggers, write};

/// Values of a new record: the given ones, then `default_<field>` context
/// keys, then field defaults and the creation timestamps.
fn with_defaults(rc: &RecordCollection, data: FieldMap) -> Result<FieldMap> {
    let env = rc.env();
    let model = env.catalog().must_model(&rc.model)?;
    let mut values = FieldMap::new();
    for (key, value) in data {
        if key == "ID" || key == "id" {
            continue;
        }
        values.insert(model.must_field(&key)?.name(), value);
    }
    for field in model.fields() {
        if values.contains_key(field.name()) || field.is_computed() {
            continue;
        }
        if let Some(value) = env.context().get(&format!("default_{}", field.json())) {
            values.insert(field.name(), value.clone());
        } else if let Some(value) = field.default_value(env) {
            values.insert(field.name(), value);
        }
    }
    let now = chrono::Utc::now().naive_utc();
    for name in ["CreateDate", "WriteDate"] {
        if model.has_field(name) && !values.contains_key(name) {
            values.insert(name, now);
        }
    }
    Ok(values)
}

/// Creates the embedded parents the record does not reference yet, from
/// the values given for their proxy fields.
fn embed_parents(rc: &RecordCollection, values: &mut FieldMap) -> Result<()> {
    let env = rc.env();
    let model = env.catalog().must_model(&rc.model)?;
    for via in model.fields().iter().filter(|f| f.def.embed) {
        if values.get(via.name()).is_some_and(|v| !v.is_null()) {
            continue;
        }
        let Some(target) = via.target() else {
            continue;
        };
        let prefix = format!("{}.", via.name());
        let mut parent = FieldMap::new();
        for field in model.fields() {
            let Some(rest) = field.related_path().and_then(|p| p.strip_prefix(prefix.as_str())) else {
                continue;
            };
            if let Some(value) = values.remove(field.name()) {
                parent.insert(rest, value);
            }
        }
        let id = write::create_nested(env, target, parent)?;
        tracing::trace!(model = %rc.model, via = via.name(), id, "Created embedded parent");
        values.insert(via.name(), id);
    }
    Ok(())
}

/// `Create` of the base mixin.
#[tracing::instrument(level = "debug", skip(rc, data), fields(model = %rc.model))]
pub(crate) fn create(rc: &RecordCollection, data: FieldMap) -> Result<RecordCollection> {
    let env = rc.env();
    let catalog = env.catalog_arc();
    let model = catalog.must_model(&rc.model)?;
    if model.is_mixin() {
        return Err(Error::Argument(ArgumentError::new(
            &rc.model,
            "Create",
            "mixins have no records",
        )));
    }
    let mut values = with_defaults(rc, data)?;
    embed_parents(rc, &mut values)?;

    let mut insert = InsertBuilder::new(model.table());
    let mut row = FieldMap::new();
    let mut post = FieldMap::new();
    let mut keys = Vec::new();
    for (name, value) in values {
        let field = model.must_field(&name)?;
        match field.column() {
            Some(column) if !field.is_computed() => {
                let value = write::column_value(env, field, value)?;
                if let (true, Some(target)) = (field.field_type().is_fk_relation(), value.as_i64()) {
                    keys.push((field.name().to_string(), target));
                }
                insert = insert.value(column, value.clone());
                row.insert(field.json(), value);
            }
            _ => {
                post.insert(name, value);
            }
        }
    }
    let (sql, params) = insert.build(env.dialect());
    let id = env.insert(&sql, &params).map_err(|e| model.translate(e))?;
    tracing::debug!(model = %rc.model, id, "Created record");

    let mut seed = FieldMap::new();
    for field in model.fields() {
        if field.is_computed() || field.is_related() {
            continue;
        }
        if field.column().is_some() {
            seed.insert(field.json(), row.get(field.json()).cloned().unwrap_or(Value::Null));
        } else if field.field_type().is_x2many() || field.field_type() == FieldType::Rev2One {
            seed.insert(field.json(), Value::Ids(Vec::new()));
        }
    }
    env.cache()
        .add_record(catalog.as_ref(), &rc.model, id, &seed, DEFAULT_SLUG);

    let record = rc.browse_one(id);
    let mut applied = write::apply(&record, &[id], post)?;
    for field in model.fields() {
        if row.contains_key(field.json()) || field.constraint().is_some() {
            applied.touch(field);
        }
    }
    for (fk, target) in keys {
        applied.key_targets(&rc.model, &fk, vec![target]);
    }
    write::propagate(&record, &applied)?;

    for field in model.fields().iter().filter(|f| f.is_stored_computed()) {
        let Some(compute) = field.compute() else {
            continue;
        };
        let directive = ComputeDirective {
            model: rc.model.clone(),
            field: field.name().to_string(),
            compute: compute.to_string(),
            stored: true,
            path: String::new(),
        };
        triggers::run_directive(env, &directive, &[id])?;
    }

    write::check_constraints(&record, &applied)?;
    Ok(record)
}
