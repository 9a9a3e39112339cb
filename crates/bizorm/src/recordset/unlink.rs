//! Deleting records.

use bizorm_query::{Condition, DeleteBuilder};

use crate::security::Permission;

use super::{RecordCollection, load, search, triggers, write};

/// `Unlink` of the base mixin. Returns the number of deleted rows.
#[tracing::instrument(level = "debug", skip(rc), fields(model = %rc.model))]
pub(crate) fn unlink(rc: &RecordCollection) -> bizorm_core::Result<u64> {
    let ids = rc.ids()?;
    if ids.is_empty() {
        return Ok(0);
    }
    search::check_row_access(rc, &ids, Permission::Unlink, "Unlink")?;
    let env = rc.env();
    let catalog = env.catalog_arc();
    let model = catalog.must_model(&rc.model)?;
    let rc = rc.browse(&ids);

    // Dependencies have to be resolved while the rows still exist.
    let dependents = triggers::capture_dependents(env, &rc.model, &ids)?;
    let keys: Vec<String> = model
        .fields()
        .iter()
        .filter(|f| f.column().is_some() && f.field_type().is_fk_relation())
        .map(|f| f.name().to_string())
        .collect();
    let mut referenced = Vec::new();
    if !keys.is_empty() {
        load::load(&rc, &keys)?;
        for name in keys {
            let field = model.must_field(&name)?;
            let targets = write::sorted(write::cached_ids(env, &catalog, &rc.model, &ids, field.json()));
            if !targets.is_empty() {
                referenced.push((name, targets));
            }
        }
    }

    let (sql, params) = DeleteBuilder::new(model.table())
        .where_in("id", &ids)
        .build(env.dialect());
    let deleted = env.execute(&sql, &params).map_err(|e| model.translate(e))?;
    {
        let mut cache = env.cache();
        for id in &ids {
            cache.invalidate_record(catalog.as_ref(), &rc.model, *id);
        }
        cache.invalidate_references(catalog.as_ref(), &rc.model, &ids);
    }
    tracing::debug!(model = %rc.model, deleted, "Deleted records");

    for (directive, affected) in dependents {
        let survivors = env
            .pool(&directive.model)?
            .search(Condition::ids(&affected))
            .fetch_unrestricted()?;
        if !survivors.is_empty() {
            triggers::run_directive(env, &directive, &survivors)?;
        }
    }
    for (fk, targets) in referenced {
        triggers::process_reverse_triggers(env, &rc.model, &fk, &targets)?;
    }
    Ok(deleted)
}
