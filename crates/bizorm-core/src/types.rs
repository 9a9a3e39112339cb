//! Field type tags.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, TypeError};
use crate::identifiers::snake_case;
use crate::value::Value;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];

/// The type of a model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Binary,
    Boolean,
    Char,
    Date,
    DateTime,
    Float,
    Html,
    Integer,
    Selection,
    Text,
    /// Foreign key to another model.
    Many2One,
    /// Unique foreign key to another model.
    One2One,
    /// Reverse side of a `One2One` on the target model.
    Rev2One,
    /// Reverse side of a `Many2One` on the target model.
    One2Many,
    /// Link through a two-column link model.
    Many2Many,
}

impl FieldType {
    pub const fn as_str(self) -> &'static str {
        match self {
            FieldType::Binary => "binary",
            FieldType::Boolean => "boolean",
            FieldType::Char => "char",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::Float => "float",
            FieldType::Html => "html",
            FieldType::Integer => "integer",
            FieldType::Selection => "selection",
            FieldType::Text => "text",
            FieldType::Many2One => "many2one",
            FieldType::One2One => "one2one",
            FieldType::Rev2One => "rev2one",
            FieldType::One2Many => "one2many",
            FieldType::Many2Many => "many2many",
        }
    }

    pub const fn is_relation(self) -> bool {
        matches!(
            self,
            FieldType::Many2One
                | FieldType::One2One
                | FieldType::Rev2One
                | FieldType::One2Many
                | FieldType::Many2Many
        )
    }

    /// Relation stored as a foreign key column on this model.
    pub const fn is_fk_relation(self) -> bool {
        matches!(self, FieldType::Many2One | FieldType::One2One)
    }

    /// Relation stored as a foreign key on the target model.
    pub const fn is_reverse_relation(self) -> bool {
        matches!(self, FieldType::One2Many | FieldType::Rev2One)
    }

    pub const fn is_x2many(self) -> bool {
        matches!(self, FieldType::One2Many | FieldType::Many2Many)
    }

    /// Whether a stored field of this type owns a column in the model table.
    pub const fn has_column(self) -> bool {
        !matches!(
            self,
            FieldType::One2Many | FieldType::Rev2One | FieldType::Many2Many
        )
    }

    pub const fn is_textual(self) -> bool {
        matches!(
            self,
            FieldType::Char | FieldType::Text | FieldType::Html | FieldType::Selection
        )
    }

    /// Value compared against in the NULL-equivalence rule of conditions.
    ///
    /// Types without a meaningful scalar zero return `Null`.
    pub fn zero_value(self) -> Value {
        match self {
            FieldType::Char | FieldType::Text | FieldType::Html | FieldType::Selection => {
                Value::Text(String::new())
            }
            FieldType::Boolean => Value::Bool(false),
            FieldType::Integer => Value::Int(0),
            FieldType::Float => Value::Float(0.0),
            FieldType::One2Many | FieldType::Many2Many => Value::Ids(Vec::new()),
            _ => Value::Null,
        }
    }

    /// Default storage name for a field declared as `name`.
    pub fn default_json_name(self, name: &str) -> String {
        let base = snake_case(name);
        match self {
            FieldType::Many2One | FieldType::One2One => format!("{}_id", base),
            FieldType::One2Many | FieldType::Many2Many => format!("{}_ids", base),
            _ => base,
        }
    }

    /// Converts a driver-level value into the canonical value for this type.
    pub fn coerce(self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(if self.is_x2many() {
                Value::Ids(Vec::new())
            } else {
                Value::Null
            });
        }
        let mismatch = |v: &Value| Error::Type(TypeError::new(self.as_str(), v.type_name()));
        Ok(match self {
            FieldType::Boolean => match value {
                Value::Bool(_) => value,
                Value::Int(i) => Value::Bool(i != 0),
                Value::Text(ref s) => Value::Bool(matches!(s.as_str(), "1" | "t" | "true")),
                ref other => return Err(mismatch(other)),
            },
            FieldType::Integer => match value {
                Value::Int(_) => value,
                Value::Bool(b) => Value::Int(i64::from(b)),
                Value::Float(f) => Value::Int(f as i64),
                Value::Text(ref s) => s.parse::<i64>().map(Value::Int).map_err(|_| mismatch(&value))?,
                ref other => return Err(mismatch(other)),
            },
            FieldType::Float => match value {
                Value::Float(_) => value,
                Value::Int(i) => Value::Float(i as f64),
                Value::Text(ref s) => {
                    s.parse::<f64>().map(Value::Float).map_err(|_| mismatch(&value))?
                }
                ref other => return Err(mismatch(other)),
            },
            FieldType::Char | FieldType::Text | FieldType::Html | FieldType::Selection => {
                match value {
                    Value::Text(_) => value,
                    Value::Int(i) => Value::Text(i.to_string()),
                    Value::Float(f) => Value::Text(f.to_string()),
                    Value::Bytes(b) => Value::Text(String::from_utf8_lossy(&b).into_owned()),
                    ref other => return Err(mismatch(other)),
                }
            }
            FieldType::Binary => match value {
                Value::Bytes(_) => value,
                Value::Text(s) => Value::Bytes(s.into_bytes()),
                ref other => return Err(mismatch(other)),
            },
            FieldType::Date => match value {
                Value::Date(_) => value,
                Value::DateTime(dt) => Value::Date(dt.date()),
                Value::Text(ref s) => parse_date(s).ok_or_else(|| mismatch(&value))?,
                ref other => return Err(mismatch(other)),
            },
            FieldType::DateTime => match value {
                Value::DateTime(_) => value,
                Value::Date(d) => Value::DateTime(d.and_time(chrono::NaiveTime::MIN)),
                Value::Text(ref s) => parse_datetime(s).ok_or_else(|| mismatch(&value))?,
                ref other => return Err(mismatch(other)),
            },
            FieldType::Many2One | FieldType::One2One | FieldType::Rev2One => match value {
                Value::Int(0) => Value::Null,
                Value::Int(_) => value,
                Value::Ids(ref ids) if ids.is_empty() => Value::Null,
                Value::Ids(ref ids) if ids.len() == 1 => Value::Int(ids[0]),
                ref other => return Err(mismatch(other)),
            },
            FieldType::One2Many | FieldType::Many2Many => match value.to_ids() {
                Some(ids) => Value::Ids(ids),
                None => return Err(mismatch(&value)),
            },
        })
    }
}

fn parse_date(s: &str) -> Option<Value> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .or_else(|| parse_naive_datetime(s).map(|dt| dt.date()))
        .map(Value::Date)
}

fn parse_datetime(s: &str) -> Option<Value> {
    parse_naive_datetime(s)
        .or_else(|| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .map(Value::DateTime)
}

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happens to rows referencing a deleted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OnDelete {
    #[default]
    SetNull,
    Cascade,
    Restrict,
}

impl OnDelete {
    pub const fn as_sql(self) -> &'static str {
        match self {
            OnDelete::SetNull => "SET NULL",
            OnDelete::Cascade => "CASCADE",
            OnDelete::Restrict => "RESTRICT",
        }
    }
}
