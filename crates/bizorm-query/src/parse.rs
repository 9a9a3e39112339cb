//! Parser for the printed form of a [`Condition`].
//!
//! Grammar:
//!
//! ```text
//! condition := predicate (("AND" | "OR") predicate)*
//! predicate := ["NOT"] ("(" condition ")" | path operator literal)
//! path      := ident ("." ident)*
//! literal   := string | number | true | false | null | list
//!            | date("...") | datetime("...") | bytes("hex")
//! ```

use std::str::FromStr;

use bizorm_core::{Error, FieldType, Operator, ParseError, Value};

use crate::condition::{Combinator, Condition, Predicate, Term};

/// Operator tokens, longest first so prefixes never shadow longer tokens.
const OPERATOR_TOKENS: [&str; 14] = [
    "not ilike",
    "not like",
    "not in",
    "=ilike",
    "=like",
    "ilike",
    "like",
    "in",
    "!=",
    "<=",
    ">=",
    "=",
    "<",
    ">",
];

impl FromStr for Condition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = Parser { input: s, pos: 0 };
        let cond = parser.condition()?;
        parser.skip_ws();
        if parser.pos < s.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(cond)
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Parse(ParseError {
            position: self.pos,
            message: message.into(),
        })
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn expect(&mut self, c: char) -> Result<(), Error> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", c)))
        }
    }

    /// Consumes `word` when it is followed by a non-identifier character.
    fn keyword(&mut self, word: &str) -> bool {
        let rest = self.rest();
        if !rest.starts_with(word) {
            return false;
        }
        let after = rest[word.len()..].chars().next();
        if after.is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            return false;
        }
        self.pos += word.len();
        true
    }

    fn condition(&mut self) -> Result<Condition, Error> {
        let mut predicates = Vec::new();
        loop {
            self.skip_ws();
            let combinator = if predicates.is_empty() {
                Combinator::And
            } else if self.keyword("AND") {
                Combinator::And
            } else if self.keyword("OR") {
                Combinator::Or
            } else {
                break;
            };
            self.skip_ws();
            let negated = self.keyword("NOT");
            self.skip_ws();
            let term = if self.peek() == Some('(') {
                self.pos += 1;
                let inner = self.condition()?;
                self.expect(')')?;
                if inner.is_empty() {
                    return Err(self.error("empty group"));
                }
                Term::Group(inner)
            } else {
                self.leaf()?
            };
            predicates.push(Predicate {
                combinator,
                negated,
                term,
            });
        }
        Ok(Condition::from_predicates(predicates))
    }

    fn leaf(&mut self) -> Result<Term, Error> {
        let path = self.path()?;
        self.skip_ws();
        let operator = self.operator()?;
        self.skip_ws();
        let arg = self.literal()?;
        Ok(Term::Leaf {
            path,
            operator,
            arg,
        })
    }

    fn path(&mut self) -> Result<String, Error> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(rest.len());
        let path = &rest[..len];
        if path.is_empty() || path.starts_with('.') || path.ends_with('.') || path.contains("..")
        {
            return Err(self.error("expected a field path"));
        }
        self.pos += len;
        Ok(path.to_string())
    }

    fn operator(&mut self) -> Result<Operator, Error> {
        for token in OPERATOR_TOKENS {
            let alphabetic = token.ends_with(|c: char| c.is_ascii_alphabetic());
            let matched = if alphabetic {
                self.keyword(token)
            } else if self.rest().starts_with(token) {
                self.pos += token.len();
                true
            } else {
                false
            };
            if matched {
                return token.parse();
            }
        }
        Err(self.error("expected an operator"))
    }

    fn literal(&mut self) -> Result<Value, Error> {
        self.skip_ws();
        match self.peek() {
            Some('"') => Ok(Value::Text(self.string()?)),
            Some('[') => self.list(),
            Some(c) if c == '-' || c == '+' || c.is_ascii_digit() => self.number(),
            Some(_) => {
                if self.keyword("null") {
                    Ok(Value::Null)
                } else if self.keyword("true") {
                    Ok(Value::Bool(true))
                } else if self.keyword("false") {
                    Ok(Value::Bool(false))
                } else if self.rest().starts_with("datetime(") {
                    self.pos += "datetime(".len();
                    let text = self.string()?;
                    self.expect(')')?;
                    FieldType::DateTime
                        .coerce(Value::Text(text))
                        .map_err(|_| self.error("invalid datetime literal"))
                } else if self.rest().starts_with("date(") {
                    self.pos += "date(".len();
                    let text = self.string()?;
                    self.expect(')')?;
                    FieldType::Date
                        .coerce(Value::Text(text))
                        .map_err(|_| self.error("invalid date literal"))
                } else if self.rest().starts_with("bytes(") {
                    self.pos += "bytes(".len();
                    let text = self.string()?;
                    self.expect(')')?;
                    decode_hex(&text)
                        .map(Value::Bytes)
                        .ok_or_else(|| self.error("invalid bytes literal"))
                } else {
                    Err(self.error("expected a literal"))
                }
            }
            None => Err(self.error("expected a literal, found end of input")),
        }
    }

    fn string(&mut self) -> Result<String, Error> {
        let rest = self.rest();
        if !rest.starts_with('"') {
            return Err(self.error("expected a string"));
        }
        let mut escaped = false;
        let mut end = None;
        for (i, c) in rest.char_indices().skip(1) {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                end = Some(i);
                break;
            }
        }
        let end = end.ok_or_else(|| self.error("unterminated string"))?;
        let raw = &rest[..=end];
        let value: String =
            serde_json::from_str(raw).map_err(|e| self.error(format!("bad string: {}", e)))?;
        self.pos += end + 1;
        Ok(value)
    }

    fn number(&mut self) -> Result<Value, Error> {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|&(i, c)| {
                !(c.is_ascii_digit()
                    || c == '.'
                    || c == 'e'
                    || c == 'E'
                    || ((c == '-' || c == '+')
                        && (i == 0 || rest[..i].ends_with(['e', 'E']))))
            })
            .map_or(rest.len(), |(i, _)| i);
        let text = &rest[..len];
        let value = if text.contains(['.', 'e', 'E']) {
            text.parse::<f64>().map(Value::Float).ok()
        } else {
            text.parse::<i64>().map(Value::Int).ok()
        };
        let value = value.ok_or_else(|| self.error(format!("invalid number '{}'", text)))?;
        self.pos += len;
        Ok(value)
    }

    fn list(&mut self) -> Result<Value, Error> {
        self.expect('[')?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(']') {
            self.pos += 1;
            return Ok(Value::Ids(Vec::new()));
        }
        loop {
            items.push(self.literal()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(']') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.error("expected ',' or ']'")),
            }
        }
        if items.iter().all(|v| matches!(v, Value::Int(_))) {
            Ok(Value::Ids(items.iter().filter_map(Value::as_i64).collect()))
        } else {
            Ok(Value::List(items))
        }
    }
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(text: &str) -> Condition {
        let cond: Condition = text.parse().unwrap();
        assert_eq!(cond.to_string(), text);
        cond
    }

    #[test]
    fn test_or_round_trip() {
        let built = Condition::new()
            .and("Name", Operator::Contains, "Jane")
            .or("Age", Operator::GreaterOrEqual, 18);
        let printed = built.to_string();
        let parsed: Condition = printed.parse().unwrap();
        assert_eq!(parsed, built);
        assert_eq!(parsed.to_string(), printed);
    }

    #[test]
    fn test_nested_round_trip() {
        let cond = round_trip(
            r#"Profile.Age < 30 AND NOT (Active = true OR NOT Tags in [1, 2]) OR Name not ilike "x""#,
        );
        let preds = cond.predicates();
        assert_eq!(preds.len(), 3);
        assert_eq!(preds[2].combinator, Combinator::Or);
        assert!(preds[1].negated);
    }

    #[test]
    fn test_literals_round_trip() {
        round_trip("Score = 1.5 AND Ratio = 2.0 AND Name = null");
        round_trip(r#"Code in ["a", "b"] AND Ids in []"#);
        round_trip(r#"Born = date("2020-02-29") AND Blob = bytes("00ff")"#);
        round_trip(r#"When >= datetime("2020-02-29 10:30:00")"#);
    }

    #[test]
    fn test_date_literal_value() {
        let cond: Condition = r#"Born = date("2020-02-29")"#.parse().unwrap();
        match &cond.predicates()[0].term {
            Term::Leaf { arg, .. } => assert_eq!(
                arg,
                &FieldType::Date.coerce(Value::from("2020-02-29")).unwrap()
            ),
            Term::Group(_) => panic!("expected leaf"),
        }
    }

    #[test]
    fn test_word_operators_need_boundaries() {
        let cond: Condition = "Name ilike \"a\"".parse().unwrap();
        match &cond.predicates()[0].term {
            Term::Leaf { operator, .. } => assert_eq!(*operator, Operator::IContains),
            Term::Group(_) => panic!("expected leaf"),
        }
        let cond: Condition = "Ids in[3]".parse().unwrap();
        assert_eq!(cond.to_string(), "Ids in [3]");
    }

    #[test]
    fn test_parse_errors_report_position() {
        let err = "Name = ".parse::<Condition>().unwrap_err();
        assert!(matches!(err, Error::Parse(ParseError { position: 7, .. })));
        assert!("Name ~ 3".parse::<Condition>().is_err());
        assert!("(Name = 3".parse::<Condition>().is_err());
        assert!("Name = 3 garbage".parse::<Condition>().is_err());
    }

    #[test]
    fn test_empty_input_is_empty_condition() {
        let cond: Condition = "  ".parse().unwrap();
        assert!(cond.is_empty());
    }
}
