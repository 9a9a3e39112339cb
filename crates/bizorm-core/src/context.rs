//! Environment context and context slugs.
//!
//! A [`Context`] carries ambient parameters of an environment (active
//! language, company, `default_<field>` overrides...). Fields whose value
//! varies with such parameters are cached and persisted under a *context
//! slug* built from the evaluated parameters. The empty slug is the
//! default/fallback value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Key/value parameters attached to an environment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(BTreeMap<String, Value>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Merges `other` into a copy of `self`, `other` winning.
    #[must_use]
    pub fn merged(&self, other: &Context) -> Context {
        let mut out = self.clone();
        for (k, v) in &other.0 {
            out.0.insert(k.clone(), v.clone());
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builds a context slug from evaluated `(key, value)` pairs.
    ///
    /// Pairs are sorted by key; null values are skipped, so an evaluation
    /// yielding only nulls maps to the default (empty) slug.
    pub fn slug<'a, I>(pairs: I) -> String
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        let mut parts: Vec<(&str, String)> = pairs
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k, slug_part(v)))
            .collect();
        parts.sort();
        parts
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn slug_part(value: &Value) -> String {
    match value {
        Value::Text(s) => s.replace(['&', '='], "_"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_is_sorted_and_skips_nulls() {
        let lang = Value::from("fr_FR");
        let company = Value::Int(3);
        let none = Value::Null;
        let slug = Context::slug([("lang", &lang), ("company", &company), ("user", &none)]);
        assert_eq!(slug, "company=3&lang=fr_FR");
    }

    #[test]
    fn test_all_null_slug_is_default() {
        let none = Value::Null;
        assert_eq!(Context::slug([("lang", &none)]), "");
    }

    #[test]
    fn test_merged_other_wins() {
        let base = Context::new().with("lang", "en_US").with("tz", "UTC");
        let over = Context::new().with("lang", "fr_FR");
        let merged = base.merged(&over);
        assert_eq!(merged.get_str("lang"), Some("fr_FR"));
        assert_eq!(merged.get_str("tz"), Some("UTC"));
    }
}
