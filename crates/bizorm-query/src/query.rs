//! Query description: condition, ordering, paging and grouping.

use std::fmt;
use std::str::FromStr;

use bizorm_core::{Error, ParseError};
use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// One ORDER BY entry, e.g. `Profile.Age desc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub path: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            descending: false,
        }
    }

    pub fn desc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            descending: true,
        }
    }
}

impl FromStr for OrderBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let bad = |message: &str| {
            Error::Parse(ParseError {
                position: 0,
                message: format!("{} in order '{}'", message, s),
            })
        };
        let path = parts.next().ok_or_else(|| bad("missing field"))?;
        let descending = match parts.next().map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => false,
            Some("desc") => true,
            Some(_) => return Err(bad("invalid direction")),
        };
        if parts.next().is_some() {
            return Err(bad("unexpected token"));
        }
        Ok(Self {
            path: path.to_string(),
            descending,
        })
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.path,
            if self.descending { "desc" } else { "asc" }
        )
    }
}

/// Aggregate function of a grouped read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    pub const fn as_sql(self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Avg => "AVG",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub path: String,
    pub func: AggregateFunc,
}

impl Aggregate {
    pub fn new(path: impl Into<String>, func: AggregateFunc) -> Self {
        Self {
            path: path.into(),
            func,
        }
    }
}

/// Everything a record collection needs to fetch its ids.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    pub condition: Condition,
    pub order: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub group_by: Vec<String>,
}

impl Query {
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn order_by(mut self, order: Vec<OrderBy>) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn group_by(mut self, paths: Vec<String>) -> Self {
        self.group_by = paths;
        self
    }

    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty()
    }
}
