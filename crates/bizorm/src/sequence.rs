//! Database sequences.
//!
//! Boot sequences are declared on the registry, created by
//! `sync_database` and cannot be altered or dropped. Runtime sequences are
//! created from an environment and live in their own namespace.

use bizorm_core::{ArgumentError, Error, Result, snake_case};
use bizorm_core::validate::check_declaration_name;

use crate::environment::Environment;

/// Database name of a boot sequence.
pub(crate) fn boot_name(name: &str) -> String {
    format!("{}_bootseq", snake_case(name))
}

/// Database name of a runtime sequence.
pub(crate) fn runtime_name(name: &str) -> String {
    format!("{}_manseq", snake_case(name))
}

#[derive(Debug, Clone)]
pub struct Sequence {
    env: Environment,
    name: String,
    db_name: String,
    boot: bool,
}

impl Sequence {
    pub(crate) fn create(env: &Environment, name: &str, start: i64, increment: i64) -> Result<Self> {
        if let Some(message) = check_declaration_name(name) {
            return Err(Error::Argument(ArgumentError::new(name, "create_sequence", message)));
        }
        if env.catalog().sequences.iter().any(|s| s.name == name) {
            return Err(Error::Argument(ArgumentError::new(
                name,
                "create_sequence",
                "a boot sequence already uses this name",
            )));
        }
        let db_name = runtime_name(name);
        let increment = if increment == 0 { 1 } else { increment };
        env.with_conn(|conn| env.adapter().create_sequence(conn, &db_name, start, increment))?;
        tracing::debug!(sequence = name, start, increment, "Created runtime sequence");
        Ok(Self {
            env: env.clone(),
            name: name.to_string(),
            db_name,
            boot: false,
        })
    }

    pub(crate) fn get(env: &Environment, name: &str) -> Result<Self> {
        if env.catalog().sequences.iter().any(|s| s.name == name) {
            return Ok(Self {
                env: env.clone(),
                name: name.to_string(),
                db_name: boot_name(name),
                boot: true,
            });
        }
        let db_name = runtime_name(name);
        let exists = env
            .with_conn(|conn| env.adapter().list_sequences(conn))?
            .iter()
            .any(|s| s.name == db_name);
        if !exists {
            return Err(Error::Argument(ArgumentError::new(name, "sequence", "unknown sequence")));
        }
        Ok(Self {
            env: env.clone(),
            name: name.to_string(),
            db_name,
            boot: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_boot(&self) -> bool {
        self.boot
    }

    pub fn next_value(&self) -> Result<i64> {
        self.env
            .with_conn(|conn| self.env.adapter().next_value(conn, &self.db_name))
    }

    fn ensure_runtime(&self, operation: &str) -> Result<()> {
        if self.boot {
            return Err(Error::Argument(ArgumentError::new(
                &self.name,
                operation,
                "boot sequences cannot be modified",
            )));
        }
        Ok(())
    }

    /// Changes the increment and/or restarts at `restart`.
    pub fn alter(&self, increment: Option<i64>, restart: Option<i64>) -> Result<()> {
        self.ensure_runtime("alter")?;
        self.env.with_conn(|conn| {
            self.env
                .adapter()
                .alter_sequence(conn, &self.db_name, increment, restart)
        })
    }

    pub fn drop_sequence(self) -> Result<()> {
        self.ensure_runtime("drop")?;
        self.env
            .with_conn(|conn| self.env.adapter().drop_sequence(conn, &self.db_name))?;
        tracing::debug!(sequence = %self.name, "Dropped runtime sequence");
        Ok(())
    }
}
