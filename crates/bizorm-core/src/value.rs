//! Dynamic field values.
//!
//! Every field value travelling between the record runtime, the cache and the
//! database driver is a [`Value`]. Relation fields carry ids: a many-to-one
//! holds `Int(id)` or `Null`, a one-to-many / many-to-many holds `Ids`.
//! `Create` carries nested "create this related record" directives.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, TypeError};

/// A dynamically typed field value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL / absent value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit integer, also used for record ids.
    Int(i64),
    /// Double precision float.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary payload.
    Bytes(Vec<u8>),
    /// Calendar date.
    Date(NaiveDate),
    /// Date and time without time zone.
    DateTime(NaiveDateTime),
    /// Ordered list of record ids (x2many values, `in` arguments).
    Ids(Vec<i64>),
    /// Generic list, used for `in` arguments that are not ids.
    List(Vec<Value>),
    /// Nested records to create and link through a relation field.
    Create(Vec<FieldMap>),
}

impl Value {
    /// Returns true for `Null`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for the scalar "zero" values treated like NULL in
    /// equality conditions: `Null`, `false` and the empty string.
    pub fn is_empty_like(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Returns true when this value designates "no related record".
    pub fn is_empty_relation(&self) -> bool {
        match self {
            Value::Null | Value::Bool(false) | Value::Int(0) => true,
            Value::Ids(ids) => ids.is_empty(),
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Ids(ids) if ids.len() == 1 => Some(ids[0]),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Null => Some(false),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Interprets the value as a set of record ids.
    ///
    /// `Null`, `false` and `0` give an empty list; a single id gives a
    /// one-element list.
    pub fn to_ids(&self) -> Option<Vec<i64>> {
        match self {
            Value::Null | Value::Bool(false) => Some(Vec::new()),
            Value::Int(0) => Some(Vec::new()),
            Value::Int(id) => Some(vec![*id]),
            Value::Ids(ids) => Some(ids.clone()),
            Value::List(items) => items.iter().map(Value::as_i64).collect(),
            _ => None,
        }
    }

    /// Flattens `Ids` and `List` into their elements; scalars become a
    /// one-element list.
    pub fn to_list(&self) -> Vec<Value> {
        match self {
            Value::Ids(ids) => ids.iter().map(|id| Value::Int(*id)).collect(),
            Value::List(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        }
    }

    /// Value comparison used by recomputation: id lists compare as sets and
    /// every "no related record" spelling compares equal to `Null`.
    pub fn equivalent(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Ids(a), Value::Ids(b)) => {
                let mut a = a.clone();
                let mut b = b.clone();
                a.sort_unstable();
                a.dedup();
                b.sort_unstable();
                b.dedup();
                a == b
            }
            (Value::Ids(ids), Value::Null) | (Value::Null, Value::Ids(ids)) => ids.is_empty(),
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64 - b).abs() < f64::EPSILON
            }
            (a, b) => a == b,
        }
    }

    /// Short name of the variant, used in type errors.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Ids(_) => "ids",
            Value::List(_) => "list",
            Value::Create(_) => "create",
        }
    }

    /// Converts a JSON value the way callers hand data to the runtime:
    /// arrays of integers become `Ids`, objects become a single `Create`
    /// directive and arrays of objects a multi-record `Create`.
    pub fn from_json(json: serde_json::Value) -> Result<Value> {
        Ok(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    return Err(Error::Type(TypeError::new("number", n.to_string())));
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                if items.iter().all(serde_json::Value::is_i64) {
                    Value::Ids(items.iter().filter_map(serde_json::Value::as_i64).collect())
                } else if items.iter().all(serde_json::Value::is_object) {
                    let maps = items
                        .into_iter()
                        .map(FieldMap::from_json)
                        .collect::<Result<Vec<_>>>()?;
                    Value::Create(maps)
                } else {
                    Value::List(
                        items
                            .into_iter()
                            .map(Value::from_json)
                            .collect::<Result<Vec<_>>>()?,
                    )
                }
            }
            obj @ serde_json::Value::Object(_) => Value::Create(vec![FieldMap::from_json(obj)?]),
        })
    }

    /// Renders the value as JSON (dates as ISO strings).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::from(b.clone()),
            Value::Date(d) => serde_json::Value::String(d.to_string()),
            Value::DateTime(dt) => serde_json::Value::String(dt.to_string()),
            Value::Ids(ids) => serde_json::Value::from(ids.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Create(maps) => {
                serde_json::Value::Array(maps.iter().map(FieldMap::to_json).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Date(d) => write!(f, "{d}"),
            Value::DateTime(dt) => write!(f, "{dt}"),
            Value::Ids(ids) => {
                let parts: Vec<String> = ids.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Create(maps) => write!(f, "<create {} record(s)>", maps.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::Ids(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<FieldMap> for Value {
    fn from(v: FieldMap) -> Self {
        Value::Create(vec![v])
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

// ============================================================================
// FieldMap
// ============================================================================

/// An ordered map of field names (or paths) to values.
///
/// Keys may be declared field names (`"Profile"`), storage names
/// (`"profile_id"`) or dotted paths (`"profile_id.age"`); the record
/// runtime normalizes them before use.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap(BTreeMap<String, Value>);

impl FieldMap {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merges `other` into `self`, `other` winning on conflicts.
    pub fn merge(&mut self, other: FieldMap) {
        self.0.extend(other.0);
    }

    /// Builds a field map from a JSON object.
    pub fn from_json(json: serde_json::Value) -> Result<FieldMap> {
        match json {
            serde_json::Value::Object(obj) => {
                let mut map = FieldMap::new();
                for (k, v) in obj {
                    map.insert(k, Value::from_json(v)?);
                }
                Ok(map)
            }
            serde_json::Value::Null => Ok(FieldMap::new()),
            other => Err(Error::Type(TypeError::new("object", other.to_string()))),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
    }
}

impl IntoIterator for FieldMap {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a FieldMap {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_like_values() {
        assert!(Value::Null.is_empty_like());
        assert!(Value::Bool(false).is_empty_like());
        assert!(Value::from("").is_empty_like());
        assert!(!Value::Int(0).is_empty_like());
        assert!(!Value::from("x").is_empty_like());
    }

    #[test]
    fn test_to_ids() {
        assert_eq!(Value::Null.to_ids(), Some(vec![]));
        assert_eq!(Value::Int(4).to_ids(), Some(vec![4]));
        assert_eq!(Value::Ids(vec![1, 2]).to_ids(), Some(vec![1, 2]));
        assert_eq!(Value::from("x").to_ids(), None);
    }

    #[test]
    fn test_equivalent_ids_as_sets() {
        assert!(Value::Ids(vec![3, 1, 2]).equivalent(&Value::Ids(vec![1, 2, 3])));
        assert!(Value::Ids(vec![]).equivalent(&Value::Null));
        assert!(!Value::Ids(vec![1]).equivalent(&Value::Ids(vec![2])));
        assert!(Value::Int(2).equivalent(&Value::Float(2.0)));
    }

    #[test]
    fn test_from_json_permissive() {
        let v = Value::from_json(serde_json::json!([1, 2, 3])).unwrap();
        assert_eq!(v, Value::Ids(vec![1, 2, 3]));

        let v = Value::from_json(serde_json::json!({"Name": "Jane"})).unwrap();
        match v {
            Value::Create(maps) => {
                assert_eq!(maps.len(), 1);
                assert_eq!(maps[0].get("Name"), Some(&Value::from("Jane")));
            }
            other => panic!("unexpected {other:?}"),
        }

        let v = Value::from_json(serde_json::json!(["a", 1])).unwrap();
        assert_eq!(v, Value::List(vec![Value::from("a"), Value::Int(1)]));
    }

    #[test]
    fn test_field_map_from_json() {
        let map = FieldMap::from_json(serde_json::json!({"Age": 23, "Name": "Jane"})).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("Age"), Some(&Value::Int(23)));
        assert!(FieldMap::from_json(serde_json::json!(3)).is_err());
    }

    #[test]
    fn test_field_map_builder() {
        let map = FieldMap::new().with("Name", "Jane").with("Age", 23);
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["Age".to_string(), "Name".to_string()]);
    }
}
