//! Sequences emulated with a bookkeeping table.
//!
//! SQLite has no sequence objects. Each sequence is a row of
//! `bizorm_sequences` holding the last value handed out; `next_value`
//! advances it with a single UPDATE so concurrent transactions serialize on
//! the database write lock.

use bizorm_core::{Connection, Error, Result, Value};
use bizorm_schema::{SequenceInfo, SequenceOps};

use crate::adapter::SqliteAdapter;

pub(crate) const SEQUENCE_TABLE: &str = "bizorm_sequences";

fn ensure_table(conn: &mut dyn Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS \"bizorm_sequences\" (\
         \"name\" TEXT PRIMARY KEY, \"value\" INTEGER NOT NULL, \
         \"increment\" INTEGER NOT NULL, \"start\" INTEGER NOT NULL)",
        &[],
    )?;
    Ok(())
}

fn unknown(name: &str) -> Error {
    Error::user(format!("sequence '{}' does not exist", name))
}

impl SequenceOps for SqliteAdapter {
    fn create_sequence(
        &self,
        conn: &mut dyn Connection,
        name: &str,
        start: i64,
        increment: i64,
    ) -> Result<()> {
        ensure_table(conn)?;
        let created = conn.execute(
            "INSERT OR IGNORE INTO \"bizorm_sequences\" (\"name\", \"value\", \"increment\", \"start\") \
             VALUES (?1, ?2, ?3, ?4)",
            &[
                Value::from(name),
                Value::Int(start - increment),
                Value::Int(increment),
                Value::Int(start),
            ],
        )?;
        tracing::debug!(sequence = name, start, increment, created = created > 0, "Create sequence");
        Ok(())
    }

    fn alter_sequence(
        &self,
        conn: &mut dyn Connection,
        name: &str,
        increment: Option<i64>,
        restart: Option<i64>,
    ) -> Result<()> {
        ensure_table(conn)?;
        if let Some(increment) = increment {
            let n = conn.execute(
                "UPDATE \"bizorm_sequences\" SET \"increment\" = ?2 WHERE \"name\" = ?1",
                &[Value::from(name), Value::Int(increment)],
            )?;
            if n == 0 {
                return Err(unknown(name));
            }
        }
        if let Some(restart) = restart {
            let n = conn.execute(
                "UPDATE \"bizorm_sequences\" SET \"value\" = ?2 - \"increment\", \"start\" = ?2 \
                 WHERE \"name\" = ?1",
                &[Value::from(name), Value::Int(restart)],
            )?;
            if n == 0 {
                return Err(unknown(name));
            }
        }
        Ok(())
    }

    fn drop_sequence(&self, conn: &mut dyn Connection, name: &str) -> Result<()> {
        ensure_table(conn)?;
        conn.execute(
            "DELETE FROM \"bizorm_sequences\" WHERE \"name\" = ?1",
            &[Value::from(name)],
        )?;
        Ok(())
    }

    fn next_value(&self, conn: &mut dyn Connection, name: &str) -> Result<i64> {
        ensure_table(conn)?;
        let n = conn.execute(
            "UPDATE \"bizorm_sequences\" SET \"value\" = \"value\" + \"increment\" WHERE \"name\" = ?1",
            &[Value::from(name)],
        )?;
        if n == 0 {
            return Err(unknown(name));
        }
        let rows = conn.query(
            "SELECT \"value\" FROM \"bizorm_sequences\" WHERE \"name\" = ?1",
            &[Value::from(name)],
        )?;
        rows.first()
            .and_then(|r| r.get_i64(0))
            .ok_or_else(|| unknown(name))
    }

    fn list_sequences(&self, conn: &mut dyn Connection) -> Result<Vec<SequenceInfo>> {
        ensure_table(conn)?;
        let rows = conn.query(
            "SELECT \"name\", \"start\", \"increment\" FROM \"bizorm_sequences\" ORDER BY \"name\"",
            &[],
        )?;
        Ok(rows
            .iter()
            .filter_map(|r| {
                Some(SequenceInfo {
                    name: r.get(0)?.as_str()?.to_string(),
                    start: r.get_i64(1)?,
                    increment: r.get_i64(2)?,
                })
            })
            .collect())
    }
}
