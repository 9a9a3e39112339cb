//! Desired schema of the catalog and database synchronization.

use std::collections::{BTreeMap, BTreeSet};

use bizorm_core::{Connection, Result};
use bizorm_schema::{Adapter, ColumnSpec, ConstraintSpec, IndexSpec, SchemaSync, SyncReport, TableSpec};

use crate::catalog::Catalog;
use crate::model::Model;
use crate::sequence::boot_name;

/// Table of one persisted model.
pub(crate) fn table_spec(catalog: &Catalog, adapter: &dyn Adapter, model: &Model) -> TableSpec {
    let table = model.table();
    let mut spec = TableSpec::new(table).column(ColumnSpec::id(adapter.id_type_sql()));
    for field in model.fields() {
        let Some(column) = field.column() else {
            continue;
        };
        let Some(sql_type) = adapter.type_sql(field.field_type(), field.def.size) else {
            continue;
        };
        let mut col = ColumnSpec::new(column, sql_type);
        if field.required() {
            col = col.not_null();
        }
        let fk_table = field
            .target()
            .filter(|_| field.field_type().is_fk_relation())
            .and_then(|t| catalog.model(t))
            .map(|t| t.table().to_string());
        if let Some(target) = &fk_table {
            col = col.references(target.as_str(), field.def.on_delete);
        }
        spec = spec.column(col);
        if field.def.unique {
            spec = spec.index(IndexSpec::unique_for_column(table, column));
        } else if field.def.index || fk_table.is_some() {
            spec = spec.index(IndexSpec::for_column(table, column));
        }
    }
    for constraint in model.sql_constraints() {
        spec = spec.constraint(ConstraintSpec::new(&constraint.db_name, &constraint.sql));
    }
    spec
}

/// Tables of every persisted model, referenced tables first.
pub(crate) fn table_specs(catalog: &Catalog, adapter: &dyn Adapter) -> Vec<TableSpec> {
    let models: BTreeMap<&str, &Model> = catalog
        .persisted_models()
        .map(|m| (m.name(), m))
        .collect();
    let mut ordered: Vec<&Model> = Vec::new();
    let mut visited: BTreeSet<&str> = BTreeSet::new();

    fn visit<'a>(
        name: &'a str,
        models: &BTreeMap<&'a str, &'a Model>,
        visited: &mut BTreeSet<&'a str>,
        ordered: &mut Vec<&'a Model>,
    ) {
        if !visited.insert(name) {
            return;
        }
        let Some(model) = models.get(name) else {
            return;
        };
        for field in model.fields() {
            if field.column().is_some() && field.field_type().is_fk_relation() {
                if let Some(target) = field.target() {
                    if let Some((key, _)) = models.get_key_value(target) {
                        visit(key, models, visited, ordered);
                    }
                }
            }
        }
        ordered.push(model);
    }

    for name in models.keys() {
        visit(name, &models, &mut visited, &mut ordered);
    }
    ordered
        .into_iter()
        .map(|m| table_spec(catalog, adapter, m))
        .collect()
}

/// Reconciles the database with the catalog and creates the boot
/// sequences. Tables of removed models are left alone.
pub(crate) fn sync(catalog: &Catalog, adapter: &dyn Adapter, conn: &mut dyn Connection) -> Result<SyncReport> {
    let specs = table_specs(catalog, adapter);
    let report = SchemaSync::new(adapter).run(conn, &specs)?;

    let existing: BTreeSet<String> = adapter
        .list_sequences(conn)?
        .into_iter()
        .map(|s| s.name)
        .collect();
    for seq in &catalog.sequences {
        let db_name = boot_name(&seq.name);
        if existing.contains(&db_name) {
            continue;
        }
        adapter.create_sequence(conn, &db_name, seq.start, seq.increment)?;
        tracing::debug!(sequence = %seq.name, "Created boot sequence");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldDef;
    use crate::registry::Registry;
    use bizorm_core::OnDelete;

    struct NoAdapter;

    // Only the type mapping is exercised here.
    impl bizorm_schema::DdlGenerator for NoAdapter {
        fn dialect_name(&self) -> &'static str {
            "test"
        }

        fn generate(&self, _op: &bizorm_schema::SchemaOperation) -> Vec<String> {
            Vec::new()
        }
    }

    impl bizorm_schema::Introspector for NoAdapter {
        fn list_tables(&self, _conn: &mut dyn Connection) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn table_info(&self, _conn: &mut dyn Connection, _table: &str) -> Result<Option<TableSpec>> {
            Ok(None)
        }
    }

    impl bizorm_schema::SequenceOps for NoAdapter {
        fn create_sequence(&self, _: &mut dyn Connection, _: &str, _: i64, _: i64) -> Result<()> {
            Ok(())
        }

        fn alter_sequence(&self, _: &mut dyn Connection, _: &str, _: Option<i64>, _: Option<i64>) -> Result<()> {
            Ok(())
        }

        fn drop_sequence(&self, _: &mut dyn Connection, _: &str) -> Result<()> {
            Ok(())
        }

        fn next_value(&self, _: &mut dyn Connection, _: &str) -> Result<i64> {
            Ok(1)
        }

        fn list_sequences(&self, _: &mut dyn Connection) -> Result<Vec<bizorm_schema::SequenceInfo>> {
            Ok(Vec::new())
        }
    }

    impl Adapter for NoAdapter {
        fn as_dialect(&self) -> &dyn bizorm_core::Dialect {
            &bizorm_core::GenericDialect
        }

        fn type_sql(&self, field_type: bizorm_core::FieldType, _size: Option<u32>) -> Option<String> {
            field_type.has_column().then(|| field_type.as_str().to_uppercase())
        }

        fn id_type_sql(&self) -> String {
            "SERIAL".to_string()
        }
    }

    #[test]
    fn test_specs_follow_foreign_keys() {
        let mut r = Registry::new();
        r.new_model("Partner").unwrap();
        r.new_model("Company").unwrap();
        r.add_fields(
            "Partner",
            [
                FieldDef::char("Email").unique().required(),
                FieldDef::many2one("Company", "Company").on_delete(OnDelete::Cascade),
                FieldDef::many2many("Tags", "Company"),
            ],
        )
        .unwrap();
        let catalog = r.bootstrap().unwrap();
        let specs = table_specs(&catalog, &NoAdapter);
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        let company = names.iter().position(|n| *n == "company").unwrap();
        let partner = names.iter().position(|n| *n == "partner").unwrap();
        let link = names.iter().position(|n| *n == "company_partner_rel").unwrap();
        assert!(company < partner);
        assert!(partner < link);

        let partner = &specs[partner];
        assert!(!partner.get_column("email").unwrap().nullable);
        assert!(partner.get_index("partner_email_key").is_some());
        assert!(partner.get_index("partner_company_id_index").is_some());
        assert!(partner.get_column("tags_ids").is_none());
        assert_eq!(specs[link].constraints.len(), 1);
    }
}
