//! Join planning.
//!
//! Every relation hop of every field path becomes one LEFT JOIN, keyed by the
//! storage path leading to it so that two paths sharing a prefix share the
//! joins. Aliases are derived from the path (`user__profile_id`); aliases
//! longer than the dialect's identifier limit are replaced by `T<n>` and the
//! replacement is recorded in the substitution map.

use std::collections::{BTreeMap, HashMap};

use bizorm_core::{Dialect, Value};

/// A planned `LEFT JOIN table AS alias ON ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableJoin {
    pub table: String,
    pub alias: String,
    /// ON clause with `?` parameter markers.
    pub on: String,
    pub params: Vec<Value>,
}

/// The FROM clause of a statement under construction.
#[derive(Debug, Clone)]
pub struct JoinPlan {
    root_table: String,
    root_alias: String,
    joins: Vec<TableJoin>,
    by_key: HashMap<String, usize>,
    substitutions: BTreeMap<String, String>,
    max_len: usize,
}

impl JoinPlan {
    pub fn new(root_table: &str, max_identifier_length: usize) -> Self {
        let mut plan = Self {
            root_table: root_table.to_string(),
            root_alias: String::new(),
            joins: Vec::new(),
            by_key: HashMap::new(),
            substitutions: BTreeMap::new(),
            max_len: max_identifier_length,
        };
        plan.root_alias = plan.short_alias(root_table.to_string());
        plan
    }

    pub fn root_alias(&self) -> &str {
        &self.root_alias
    }

    pub fn joins(&self) -> &[TableJoin] {
        &self.joins
    }

    /// Long alias → synthetic alias replacements made so far.
    pub fn substitutions(&self) -> &BTreeMap<String, String> {
        &self.substitutions
    }

    /// Returns `long` when it fits the identifier limit, else a `T<n>` alias.
    pub fn short_alias(&mut self, long: String) -> String {
        if long.len() <= self.max_len {
            return long;
        }
        if let Some(short) = self.substitutions.get(&long) {
            return short.clone();
        }
        let short = format!("T{}", self.substitutions.len());
        self.substitutions.insert(long, short.clone());
        short
    }

    /// Alias of the join registered under `key`, if any.
    pub fn alias_for(&self, key: &str) -> Option<&str> {
        self.by_key.get(key).map(|&i| self.joins[i].alias.as_str())
    }

    /// Registers a join under `key` unless one exists, returning its alias.
    ///
    /// `make_on` receives the join's alias and returns the ON clause and its
    /// parameters.
    pub fn add(
        &mut self,
        key: &str,
        table: &str,
        long_alias: String,
        make_on: impl FnOnce(&str) -> (String, Vec<Value>),
    ) -> String {
        if let Some(alias) = self.alias_for(key) {
            return alias.to_string();
        }
        let alias = self.short_alias(long_alias);
        let (on, params) = make_on(&alias);
        self.by_key.insert(key.to_string(), self.joins.len());
        self.joins.push(TableJoin {
            table: table.to_string(),
            alias: alias.clone(),
            on,
            params,
        });
        alias
    }

    /// Renders `FROM ... LEFT JOIN ...` and returns the join parameters.
    pub fn from_clause(&self, dialect: &dyn Dialect) -> (String, Vec<Value>) {
        let mut sql = format!(
            "FROM {} AS {}",
            dialect.quote_identifier(&self.root_table),
            dialect.quote_identifier(&self.root_alias)
        );
        let mut params = Vec::new();
        for join in &self.joins {
            sql.push_str(&format!(
                " LEFT JOIN {} AS {} ON {}",
                dialect.quote_identifier(&join.table),
                dialect.quote_identifier(&join.alias),
                join.on
            ));
            params.extend(join.params.iter().cloned());
        }
        (sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bizorm_core::GenericDialect;

    #[test]
    fn test_joins_are_deduplicated_by_key() {
        let mut plan = JoinPlan::new("user", 63);
        let a = plan.add("profile_id", "profile", "user__profile_id".into(), |alias| {
            (format!("{}.id = user.profile_id", alias), vec![])
        });
        let b = plan.add("profile_id", "profile", "user__profile_id".into(), |_| {
            unreachable!("join must be reused")
        });
        assert_eq!(a, b);
        assert_eq!(plan.joins().len(), 1);
    }

    #[test]
    fn test_long_aliases_are_shortened() {
        let mut plan = JoinPlan::new("user", 16);
        let alias = plan.add(
            "profile_id.address_id",
            "address",
            "user__profile_id__address_id".into(),
            |_| (String::from("1 = 1"), vec![]),
        );
        assert_eq!(alias, "T0");
        assert_eq!(
            plan.substitutions().get("user__profile_id__address_id"),
            Some(&"T0".to_string())
        );
        assert_eq!(plan.short_alias("user__profile_id__address_id".into()), "T0");
    }

    #[test]
    fn test_from_clause_collects_join_params() {
        let mut plan = JoinPlan::new("user", 63);
        plan.add("ctx", "user_name_context", "user__ctx".into(), |alias| {
            (format!("{}.slug = ?", alias), vec![Value::from("lang=fr")])
        });
        let (sql, params) = plan.from_clause(&GenericDialect);
        assert_eq!(
            sql,
            "FROM \"user\" AS \"user\" LEFT JOIN \"user_name_context\" AS \"user__ctx\" ON user__ctx.slug = ?"
        );
        assert_eq!(params, vec![Value::from("lang=fr")]);
    }
}
