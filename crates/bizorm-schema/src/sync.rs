//! Schema synchronization.
//!
//! [`SchemaSync`] reconciles the database with the desired tables: missing
//! tables are created, then each existing table is diffed and altered one
//! operation at a time, re-reading the table after every step so that
//! operations implemented by rebuilding the table always start from the
//! current layout.
//!
//! Synchronization runs outside of a transaction: some dialects need to
//! toggle session settings (foreign key enforcement) around table rebuilds.

use std::collections::HashSet;

use bizorm_core::{Connection, Result};

use crate::adapter::Adapter;
use crate::diff::{SchemaOperation, diff_table};
use crate::spec::TableSpec;

/// What a synchronization run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<String>,
    /// Descriptions of the applied operations.
    pub applied: Vec<String>,
    /// Operations the adapter could not perform.
    pub skipped: Vec<String>,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.applied.is_empty()
    }
}

pub struct SchemaSync<'a> {
    adapter: &'a dyn Adapter,
}

impl<'a> SchemaSync<'a> {
    pub fn new(adapter: &'a dyn Adapter) -> Self {
        Self { adapter }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(tables = desired.len()))]
    pub fn run(&self, conn: &mut dyn Connection, desired: &[TableSpec]) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let existing: HashSet<String> = self.adapter.list_tables(conn)?.into_iter().collect();

        for table in desired.iter().filter(|t| !existing.contains(&t.name)) {
            let op = SchemaOperation::CreateTable(table.clone());
            self.apply(conn, &op)?;
            report.created.push(table.name.clone());
        }

        for table in desired.iter().filter(|t| existing.contains(&t.name)) {
            self.sync_table(conn, table, &mut report)?;
        }

        tracing::info!(
            created = report.created.len(),
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            "Schema synchronized"
        );
        Ok(report)
    }

    fn sync_table(
        &self,
        conn: &mut dyn Connection,
        desired: &TableSpec,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut done: HashSet<String> = HashSet::new();
        loop {
            let actual = self.adapter.table_info(conn, &desired.name)?;
            let next = diff_table(desired, actual.as_ref())
                .into_iter()
                .find(|op| !done.contains(&op.describe()));
            let Some(op) = next else {
                return Ok(());
            };
            let key = op.describe();
            if self.apply(conn, &op)? {
                report.applied.push(key.clone());
            } else {
                tracing::warn!(
                    dialect = self.adapter.dialect_name(),
                    operation = %key,
                    "Schema operation not supported, skipped"
                );
                report.skipped.push(key.clone());
            }
            // an operation that does not converge is attempted once
            done.insert(key);
        }
    }

    /// Runs the statements of `op`; `false` when the adapter produced none.
    fn apply(&self, conn: &mut dyn Connection, op: &SchemaOperation) -> Result<bool> {
        let statements = self.adapter.generate(op);
        if statements.is_empty() {
            return Ok(false);
        }
        tracing::debug!(operation = %op.describe(), statements = statements.len(), "Applying schema operation");
        for sql in &statements {
            tracing::debug!(target: "bizorm::sql", sql = %sql, "ddl");
            conn.execute(sql, &[])?;
        }
        Ok(true)
    }
}
