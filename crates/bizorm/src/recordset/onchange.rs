//! Onchange simulation.

use bizorm_core::{ArgumentError, Error, FieldMap, Result};

use crate::methods::Arg;

use super::{RecordCollection, triggers, write};

/// `Onchange` of the base mixin: applies `values` inside a rolled back
/// savepoint, runs the onchange methods of `fields` and returns the values
/// they set, plus the computed fields depending on anything changed.
#[tracing::instrument(level = "debug", skip(rc, values), fields(model = %rc.model))]
pub(crate) fn onchange(rc: &RecordCollection, values: FieldMap, fields: &[String]) -> Result<FieldMap> {
    let env = rc.env();
    let catalog = env.catalog_arc();
    let model = catalog.must_model(&rc.model)?;

    // Values of computed fields without an inverse cannot be entered.
    let entered: FieldMap = values
        .into_iter()
        .filter(|(k, _)| {
            model
                .field(k)
                .is_some_and(|f| !f.is_computed() || f.inverse().is_some())
        })
        .collect();
    let mut changed: Vec<String> = Vec::new();
    for key in entered.keys() {
        if let Some(field) = model.field(key) {
            changed.push(field.name().to_string());
            changed.push(field.json().to_string());
        }
    }

    env.rollback_scope(|| {
        let ids = rc.ids()?;
        let record = match ids.as_slice() {
            [] => {
                let id = write::create_nested(env, &rc.model, entered.clone())?;
                rc.browse_one(id)
            }
            [id] => {
                let record = rc.browse_one(*id);
                record.call_internal("Write", vec![Arg::Map(entered.clone())])?;
                record
            }
            _ => {
                return Err(Error::Argument(ArgumentError::new(
                    &rc.model,
                    "Onchange",
                    "onchange runs on a single record",
                )));
            }
        };

        let mut result = FieldMap::new();
        for name in fields {
            let field = model.must_field(name)?;
            if let Some(method) = field.onchange() {
                result.merge(record.call_internal(method, Vec::new())?.as_map()?);
            }
        }
        let writable: FieldMap = result
            .iter()
            .filter(|(k, _)| {
                model
                    .field(k)
                    .is_some_and(|f| !f.is_computed() || f.inverse().is_some())
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for key in writable.keys() {
            if let Some(field) = model.field(key) {
                changed.push(field.name().to_string());
                changed.push(field.json().to_string());
            }
        }
        if !writable.is_empty() {
            record.call_internal("Write", vec![Arg::Map(writable)])?;
        }

        for field in model.fields().iter().filter(|f| f.is_computed()) {
            if result.contains_key(field.name()) {
                continue;
            }
            let affected = field
                .depends()
                .iter()
                .any(|d| changed.iter().any(|c| d.split('.').next() == Some(c.as_str())));
            if affected {
                result.insert(field.name(), triggers::compute_field(&record, field)?);
            }
        }
        tracing::debug!(model = %rc.model, values = result.len(), "Onchange evaluated");
        Ok(result)
    })
}
