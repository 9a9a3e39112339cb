//! Comparison operators usable in conditions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ParseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Equals,
    NotEquals,
    /// Case-sensitive pattern match, argument used verbatim.
    Like,
    /// Case-sensitive substring match.
    Contains,
    NotContains,
    /// Case-insensitive pattern match, argument used verbatim.
    ILike,
    /// Case-insensitive substring match.
    IContains,
    NotIContains,
    In,
    NotIn,
    Lower,
    LowerOrEqual,
    Greater,
    GreaterOrEqual,
}

impl Operator {
    pub const ALL: [Operator; 14] = [
        Operator::Equals,
        Operator::NotEquals,
        Operator::Like,
        Operator::Contains,
        Operator::NotContains,
        Operator::ILike,
        Operator::IContains,
        Operator::NotIContains,
        Operator::In,
        Operator::NotIn,
        Operator::Lower,
        Operator::LowerOrEqual,
        Operator::Greater,
        Operator::GreaterOrEqual,
    ];

    /// Token used when printing and parsing conditions.
    pub const fn as_str(self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::Like => "=like",
            Operator::Contains => "like",
            Operator::NotContains => "not like",
            Operator::ILike => "=ilike",
            Operator::IContains => "ilike",
            Operator::NotIContains => "not ilike",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::Lower => "<",
            Operator::LowerOrEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
        }
    }

    pub const fn is_negative(self) -> bool {
        matches!(
            self,
            Operator::NotEquals | Operator::NotContains | Operator::NotIContains | Operator::NotIn
        )
    }

    /// Operators taking a list argument.
    pub const fn is_multi(self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    /// Substring operators whose argument gets wrapped in `%...%`.
    pub const fn is_substring(self) -> bool {
        matches!(
            self,
            Operator::Contains | Operator::NotContains | Operator::IContains | Operator::NotIContains
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        Operator::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == normalized)
            .ok_or_else(|| {
                Error::Parse(ParseError {
                    position: 0,
                    message: format!("unknown operator '{}'", s),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_tokens_round_trip() {
        for op in Operator::ALL {
            assert_eq!(op.as_str().parse::<Operator>().unwrap(), op);
        }
    }

    #[test]
    fn test_operator_whitespace_normalized() {
        assert_eq!("not   in".parse::<Operator>().unwrap(), Operator::NotIn);
        assert!("~=".parse::<Operator>().is_err());
    }

    #[test]
    fn test_operator_classes() {
        assert!(Operator::NotIn.is_negative());
        assert!(Operator::In.is_multi());
        assert!(Operator::IContains.is_substring());
        assert!(!Operator::ILike.is_substring());
    }
}
