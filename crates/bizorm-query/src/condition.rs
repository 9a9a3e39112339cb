//! Condition trees.
//!
//! A [`Condition`] is an ordered list of predicates. Each predicate is a
//! leaf (`path operator argument`) or a nested condition, joined to the
//! previous predicate with AND or OR and optionally negated with NOT.
//!
//! Printing keeps the predicates in order and never regroups them, so the
//! text form evaluates exactly like the generated SQL:
//!
//! ```ignore
//! let cond = Condition::new()
//!     .and("Name", Operator::Contains, "Jane")
//!     .or("Age", Operator::GreaterOrEqual, 18);
//! assert_eq!(cond.to_string(), r#"Name like "Jane" OR Age >= 18"#);
//! assert_eq!(cond.to_string().parse::<Condition>()?, cond);
//! ```

use std::fmt;

use bizorm_core::{Operator, Value};
use serde::{Deserialize, Serialize};

/// How a predicate joins the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combinator {
    And,
    Or,
}

impl Combinator {
    pub const fn as_str(self) -> &'static str {
        match self {
            Combinator::And => "AND",
            Combinator::Or => "OR",
        }
    }
}

/// Body of a predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Term {
    Leaf {
        /// Dotted field path, e.g. `Profile.Age`.
        path: String,
        operator: Operator,
        arg: Value,
    },
    Group(Condition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub combinator: Combinator,
    pub negated: bool,
    pub term: Term,
}

/// An ordered list of predicates. The empty condition matches everything.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Condition {
    predicates: Vec<Predicate>,
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-leaf condition.
    pub fn leaf(path: impl Into<String>, operator: Operator, arg: impl Into<Value>) -> Self {
        Self::new().and(path, operator, arg)
    }

    /// `ID in ids`.
    pub fn ids(ids: &[i64]) -> Self {
        Self::leaf("ID", Operator::In, Value::Ids(ids.to_vec()))
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    fn push(mut self, combinator: Combinator, negated: bool, term: Term) -> Self {
        if let Term::Group(ref g) = term {
            if g.is_empty() {
                return self;
            }
        }
        let combinator = if self.predicates.is_empty() {
            Combinator::And
        } else {
            combinator
        };
        self.predicates.push(Predicate {
            combinator,
            negated,
            term,
        });
        self
    }

    fn leaf_term(path: impl Into<String>, operator: Operator, arg: impl Into<Value>) -> Term {
        Term::Leaf {
            path: path.into(),
            operator,
            arg: arg.into(),
        }
    }

    #[must_use]
    pub fn and(self, path: impl Into<String>, operator: Operator, arg: impl Into<Value>) -> Self {
        self.push(Combinator::And, false, Self::leaf_term(path, operator, arg))
    }

    #[must_use]
    pub fn or(self, path: impl Into<String>, operator: Operator, arg: impl Into<Value>) -> Self {
        self.push(Combinator::Or, false, Self::leaf_term(path, operator, arg))
    }

    #[must_use]
    pub fn and_not(
        self,
        path: impl Into<String>,
        operator: Operator,
        arg: impl Into<Value>,
    ) -> Self {
        self.push(Combinator::And, true, Self::leaf_term(path, operator, arg))
    }

    #[must_use]
    pub fn or_not(
        self,
        path: impl Into<String>,
        operator: Operator,
        arg: impl Into<Value>,
    ) -> Self {
        self.push(Combinator::Or, true, Self::leaf_term(path, operator, arg))
    }

    #[must_use]
    pub fn and_cond(self, cond: Condition) -> Self {
        self.push(Combinator::And, false, Term::Group(cond))
    }

    #[must_use]
    pub fn or_cond(self, cond: Condition) -> Self {
        self.push(Combinator::Or, false, Term::Group(cond))
    }

    #[must_use]
    pub fn and_not_cond(self, cond: Condition) -> Self {
        self.push(Combinator::And, true, Term::Group(cond))
    }

    #[must_use]
    pub fn or_not_cond(self, cond: Condition) -> Self {
        self.push(Combinator::Or, true, Term::Group(cond))
    }

    /// ANDs two conditions, grouping each side so neither regroups the other.
    #[must_use]
    pub fn intersect(self, other: Condition) -> Self {
        match (self.is_empty(), other.is_empty()) {
            (true, _) => other,
            (_, true) => self,
            _ => Condition::new().and_cond(self).and_cond(other),
        }
    }

    /// Every leaf path, depth first.
    pub fn paths(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a str>) {
        for p in &self.predicates {
            match &p.term {
                Term::Leaf { path, .. } => out.push(path),
                Term::Group(g) => g.collect_paths(out),
            }
        }
    }

    pub(crate) fn from_predicates(predicates: Vec<Predicate>) -> Self {
        Self { predicates }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.predicates.iter().enumerate() {
            if i > 0 {
                write!(f, " {} ", p.combinator.as_str())?;
            }
            if p.negated {
                write!(f, "NOT ")?;
            }
            match &p.term {
                Term::Leaf {
                    path,
                    operator,
                    arg,
                } => {
                    write!(f, "{} {} ", path, operator)?;
                    write_literal(f, arg)?;
                }
                Term::Group(g) => write!(f, "({})", g)?,
            }
        }
        Ok(())
    }
}

/// Writes a value in the literal syntax understood by the condition parser.
pub(crate) fn write_literal(f: &mut impl fmt::Write, value: &Value) -> fmt::Result {
    match value {
        Value::Null | Value::Create(_) => write!(f, "null"),
        Value::Bool(b) => write!(f, "{}", b),
        Value::Int(i) => write!(f, "{}", i),
        Value::Float(v) => write!(f, "{:?}", v),
        Value::Text(s) => write_string(f, s),
        Value::Bytes(b) => {
            let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
            write!(f, "bytes(\"{}\")", hex)
        }
        Value::Date(d) => write!(f, "date(\"{}\")", d),
        Value::DateTime(dt) => write!(f, "datetime(\"{}\")", dt),
        Value::Ids(ids) => {
            write!(f, "[")?;
            for (i, id) in ids.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", id)?;
            }
            write!(f, "]")
        }
        Value::List(items) => {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_literal(f, item)?;
            }
            write!(f, "]")
        }
    }
}

fn write_string(f: &mut impl fmt::Write, s: &str) -> fmt::Result {
    match serde_json::to_string(s) {
        Ok(quoted) => write!(f, "{}", quoted),
        Err(_) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_keeps_order_and_combinators() {
        let cond = Condition::new()
            .and("Name", Operator::Contains, "Jane")
            .or("Age", Operator::GreaterOrEqual, 18);
        assert_eq!(cond.to_string(), r#"Name like "Jane" OR Age >= 18"#);
    }

    #[test]
    fn test_first_combinator_is_normalized() {
        let a = Condition::new().or("Age", Operator::Greater, 3);
        let b = Condition::new().and("Age", Operator::Greater, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_nested_groups_and_negation() {
        let inner = Condition::new()
            .and("Active", Operator::Equals, true)
            .or_not("Tags", Operator::In, vec![1_i64, 2]);
        let cond = Condition::new()
            .and("Profile.Age", Operator::Lower, 30)
            .and_not_cond(inner);
        assert_eq!(
            cond.to_string(),
            "Profile.Age < 30 AND NOT (Active = true OR NOT Tags in [1, 2])"
        );
        assert_eq!(cond.paths(), vec!["Profile.Age", "Active", "Tags"]);
    }

    #[test]
    fn test_empty_group_is_skipped() {
        let cond = Condition::new()
            .and("Name", Operator::Equals, "x")
            .or_cond(Condition::new());
        assert_eq!(cond.predicates().len(), 1);
    }

    #[test]
    fn test_intersect_groups_both_sides() {
        let a = Condition::leaf("A", Operator::Equals, 1).or("B", Operator::Equals, 2);
        let b = Condition::leaf("C", Operator::Equals, 3);
        assert_eq!(a.intersect(b).to_string(), "(A = 1 OR B = 2) AND (C = 3)");
        let only = Condition::leaf("C", Operator::Equals, 3);
        assert_eq!(Condition::new().intersect(only.clone()), only);
    }

    #[test]
    fn test_string_literals_are_escaped() {
        let cond = Condition::leaf("Name", Operator::Equals, "say \"hi\"");
        assert_eq!(cond.to_string(), r#"Name = "say \"hi\"""#);
    }
}
