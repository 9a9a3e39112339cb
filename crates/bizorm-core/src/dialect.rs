//! SQL dialect capabilities used when generating statements.

use crate::error::Error;
use crate::identifiers::quote_ident;
use crate::operator::Operator;
use crate::value::Value;

/// Database-specific SQL spelling.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Placeholder for the parameter at 1-based `index`.
    fn placeholder(&self, index: usize) -> String;

    fn quote_identifier(&self, ident: &str) -> String {
        quote_ident(ident)
    }

    /// Longest identifier the database accepts.
    fn max_identifier_length(&self) -> usize {
        63
    }

    /// SQL operator for a condition operator (`In`/`NotIn` excluded).
    fn operator_sql(&self, op: Operator) -> &'static str {
        match op {
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::Like | Operator::Contains => "LIKE",
            Operator::NotContains => "NOT LIKE",
            Operator::ILike | Operator::IContains => "ILIKE",
            Operator::NotIContains => "NOT ILIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Lower => "<",
            Operator::LowerOrEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
        }
    }

    /// Rewrites a condition argument for the operator (substring wrapping).
    fn operator_arg(&self, op: Operator, arg: Value) -> Value {
        if op.is_substring() {
            if let Value::Text(s) = arg {
                return Value::Text(format!("%{}%", s));
            }
        }
        arg
    }

    /// Whether `err` is a transient serialization conflict worth retrying.
    fn is_serialization_error(&self, err: &Error) -> bool {
        err.is_serialization()
    }

    /// Trailing LIMIT/OFFSET clause, with a leading space when non-empty.
    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut out = String::new();
        if let Some(limit) = limit {
            out.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = offset {
            out.push_str(&format!(" OFFSET {}", offset));
        }
        out
    }

    /// Statement inserting a row with only default values.
    fn insert_default_values(&self, table: &str) -> String {
        format!("INSERT INTO {} DEFAULT VALUES", self.quote_identifier(table))
    }
}

/// PostgreSQL-style dialect (`$n` placeholders), used when no driver is
/// involved such as in statement-generation tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericDialect;

impl Dialect for GenericDialect {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substring_argument_wrapping() {
        let d = GenericDialect;
        assert_eq!(
            d.operator_arg(Operator::IContains, Value::from("Jane")),
            Value::from("%Jane%")
        );
        assert_eq!(
            d.operator_arg(Operator::ILike, Value::from("Ja%")),
            Value::from("Ja%")
        );
    }

    #[test]
    fn test_generic_placeholders() {
        assert_eq!(GenericDialect.placeholder(3), "$3");
        assert_eq!(GenericDialect.quote_identifier("user"), "\"user\"");
    }
}
