//! Error types for the bizorm runtime.
//!
//! The taxonomy follows how failures are handled:
//!
//! - **Declaration** errors come from invalid model/field/method wiring and
//!   abort bootstrap.
//! - **Permission** errors are access-control denials.
//! - **Constraint** errors are database constraint violations translated
//!   through the model's constraint messages.
//! - **Query** errors come from the driver; those of kind
//!   [`QueryErrorKind::Serialization`] are retried at the transaction
//!   boundary.
//! - **RecursionDepthExceeded** signals a runaway override chain.
//!
//! A cache miss is never an error.

use std::fmt;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// The primary error type.
#[derive(Debug)]
pub enum Error {
    /// Invalid declarations detected during bootstrap.
    Declaration(DeclarationError),
    /// `bootstrap()` was called a second time.
    DoubleBootstrap,
    /// A declaration was attempted after bootstrap.
    Frozen(String),
    /// Access-control denial.
    Permission(PermissionError),
    /// Translated constraint violation.
    Constraint(ConstraintError),
    /// Driver-reported query failure.
    Query(QueryError),
    /// Connection-level failure.
    Connection(ConnectionError),
    /// The per-environment call depth ceiling was exceeded.
    RecursionDepthExceeded {
        model: String,
        method: String,
        limit: usize,
    },
    /// No model with this name.
    UnknownModel(String),
    /// No field with this name or storage name.
    UnknownField { model: String, field: String },
    /// No method with this name.
    UnknownMethod { model: String, method: String },
    /// An operation requiring exactly one record got another count.
    NotSingleton { model: String, count: usize },
    /// Bad arguments to a method call.
    Argument(ArgumentError),
    /// Condition text could not be parsed.
    Parse(ParseError),
    /// A value had the wrong type.
    Type(TypeError),
    /// Error raised by application code (constraint methods, overrides).
    User(String),
}

impl Error {
    /// Creates an application-level error.
    pub fn user(message: impl Into<String>) -> Self {
        Error::User(message.into())
    }

    /// Returns true when the database reported a serialization conflict.
    pub fn is_serialization(&self) -> bool {
        matches!(
            self,
            Error::Query(QueryError {
                kind: QueryErrorKind::Serialization | QueryErrorKind::Deadlock,
                ..
            })
        )
    }

    /// Returns true for database constraint violations (raw or translated).
    pub fn is_constraint(&self) -> bool {
        matches!(
            self,
            Error::Constraint(_)
                | Error::Query(QueryError {
                    kind: QueryErrorKind::Constraint,
                    ..
                })
        )
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, Error::Permission(_))
    }

    pub fn is_declaration(&self) -> bool {
        matches!(self, Error::Declaration(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Declaration(e) => write!(f, "declaration error: {}", e),
            Error::DoubleBootstrap => write!(f, "registry has already been bootstrapped"),
            Error::Frozen(what) => write!(f, "registry is frozen, cannot {}", what),
            Error::Permission(e) => write!(f, "permission denied: {}", e),
            Error::Constraint(e) => write!(f, "{}", e),
            Error::Query(e) => write!(f, "query error: {}", e),
            Error::Connection(e) => write!(f, "connection error: {}", e),
            Error::RecursionDepthExceeded {
                model,
                method,
                limit,
            } => write!(
                f,
                "maximum recursion depth ({}) exceeded while calling {}.{}",
                limit, model, method
            ),
            Error::UnknownModel(model) => write!(f, "unknown model '{}'", model),
            Error::UnknownField { model, field } => {
                write!(f, "unknown field '{}' in model '{}'", field, model)
            }
            Error::UnknownMethod { model, method } => {
                write!(f, "unknown method '{}' in model '{}'", method, model)
            }
            Error::NotSingleton { model, count } => write!(
                f,
                "expected a single {} record, got {}",
                model, count
            ),
            Error::Argument(e) => write!(f, "argument error: {}", e),
            Error::Parse(e) => write!(f, "parse error: {}", e),
            Error::Type(e) => write!(f, "type error: {}", e),
            Error::User(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Declaration errors
// ============================================================================

/// What kind of wiring problem a declaration error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationErrorKind {
    InvalidName,
    DuplicateModel,
    UnknownModel,
    UnknownField,
    UnknownMethod,
    IllegalOverride,
    UnresolvableRelation,
    SignatureMismatch,
    MixinCycle,
    InvalidPath,
}

#[derive(Debug, Clone)]
pub struct DeclarationError {
    pub kind: DeclarationErrorKind,
    pub model: String,
    /// Field or method concerned, when there is one.
    pub item: Option<String>,
    pub message: String,
}

impl DeclarationError {
    pub fn new(
        kind: DeclarationErrorKind,
        model: impl Into<String>,
        item: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            model: model.into(),
            item: item.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for DeclarationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.item {
            Some(item) => write!(f, "{}.{}: {}", self.model, item, self.message),
            None => write!(f, "{}: {}", self.model, self.message),
        }
    }
}

/// Shorthand for building a declaration error.
pub fn declaration_error(
    kind: DeclarationErrorKind,
    model: &str,
    item: Option<&str>,
    message: impl Into<String>,
) -> Error {
    Error::Declaration(DeclarationError::new(kind, model, item, message))
}

// ============================================================================
// Permission errors
// ============================================================================

#[derive(Debug, Clone)]
pub struct PermissionError {
    pub uid: i64,
    pub model: String,
    pub method: String,
    /// Calling method (`Model.Method`) when the call was nested.
    pub caller: Option<String>,
}

impl fmt::Display for PermissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user {} may not execute {}.{}",
            self.uid, self.model, self.method
        )?;
        if let Some(caller) = &self.caller {
            write!(f, " (called from {})", caller)?;
        }
        Ok(())
    }
}

// ============================================================================
// Constraint errors
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConstraintError {
    pub model: String,
    pub constraint: Option<String>,
    /// Model-authored message.
    pub message: String,
}

impl fmt::Display for ConstraintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

// ============================================================================
// Query errors
// ============================================================================

/// Classification of driver errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    Syntax,
    Constraint,
    Serialization,
    Deadlock,
    Database,
}

#[derive(Debug, Clone)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
    /// Constraint name reported by the driver, if any.
    pub constraint: Option<String>,
    pub sql: Option<String>,
}

impl QueryError {
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            constraint: None,
            sql: None,
        }
    }

    #[must_use]
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    #[must_use]
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(sql) = &self.sql {
            write!(f, " [sql: {}]", sql)?;
        }
        Ok(())
    }
}

/// Shorthand for a driver error with no SQL attached.
pub fn query_error_msg(kind: QueryErrorKind, message: impl Into<String>) -> Error {
    Error::Query(QueryError::new(kind, message))
}

// ============================================================================
// Other payloads
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConnectionError {
    pub message: String,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone)]
pub struct ArgumentError {
    pub model: String,
    pub method: String,
    pub message: String,
}

impl ArgumentError {
    pub fn new(model: &str, method: &str, message: impl Into<String>) -> Self {
        Self {
            model: model.to_string(),
            method: method.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.model, self.method, self.message)
    }
}

#[derive(Debug, Clone)]
pub struct ParseError {
    /// Byte offset in the input.
    pub position: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.position)
    }
}

#[derive(Debug, Clone)]
pub struct TypeError {
    pub expected: String,
    pub found: String,
}

impl TypeError {
    pub fn new(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, found {}", self.expected, self.found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_classification() {
        let err = query_error_msg(QueryErrorKind::Serialization, "could not serialize access");
        assert!(err.is_serialization());
        let err = query_error_msg(QueryErrorKind::Constraint, "unique violation");
        assert!(!err.is_serialization());
        assert!(err.is_constraint());
    }

    #[test]
    fn test_declaration_error_names_item() {
        let err = declaration_error(
            DeclarationErrorKind::UnknownMethod,
            "User",
            Some("ComputeAge"),
            "compute method does not exist",
        );
        assert_eq!(
            err.to_string(),
            "declaration error: User.ComputeAge: compute method does not exist"
        );
    }

    #[test]
    fn test_permission_error_mentions_user_and_caller() {
        let err = Error::Permission(PermissionError {
            uid: 7,
            model: "User".into(),
            method: "Write".into(),
            caller: Some("Partner.Sync".into()),
        });
        let text = err.to_string();
        assert!(text.contains("user 7"));
        assert!(text.contains("User.Write"));
        assert!(text.contains("Partner.Sync"));
    }

    #[test]
    fn test_query_error_with_sql() {
        let err = QueryError::new(QueryErrorKind::Syntax, "near FROM").with_sql("SELEC 1");
        assert_eq!(err.to_string(), "near FROM [sql: SELEC 1]");
    }
}
