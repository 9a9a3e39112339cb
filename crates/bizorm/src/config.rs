//! Runtime configuration.

use bizorm_core::IsolationLevel;

/// Methods whose execution is always checked against access control.
pub const DEFAULT_SENSITIVE_METHODS: [&str; 5] = ["Load", "Create", "Write", "Unlink", "Copy"];

/// Configuration of a [`Database`](crate::Database).
///
/// # Example
///
/// ```ignore
/// let config = RuntimeConfig::default()
///     .max_transaction_attempts(3)
///     .superuser_id(1);
/// let db = Database::new(catalog, adapter, source).with_config(config);
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Nested method calls allowed in one environment.
    pub max_recursion_depth: usize,
    /// Attempts of a transaction failing with a serialization error.
    pub max_transaction_attempts: u32,
    /// User bypassing access control.
    pub superuser_id: i64,
    /// Isolation level of the transactions opened by `execute`.
    pub isolation: IsolationLevel,
    /// Methods checked even when granted.
    pub sensitive_methods: Vec<String>,
    /// Single-record loads of one model before a warning is logged.
    pub load_warn_threshold: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: 100,
            max_transaction_attempts: 5,
            superuser_id: 1,
            isolation: IsolationLevel::Serializable,
            sensitive_methods: DEFAULT_SENSITIVE_METHODS
                .iter()
                .map(ToString::to_string)
                .collect(),
            load_warn_threshold: 10,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    #[must_use]
    pub fn max_transaction_attempts(mut self, attempts: u32) -> Self {
        self.max_transaction_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn superuser_id(mut self, uid: i64) -> Self {
        self.superuser_id = uid;
        self
    }

    #[must_use]
    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    #[must_use]
    pub fn sensitive_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive_methods = methods.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn load_warn_threshold(mut self, threshold: usize) -> Self {
        self.load_warn_threshold = threshold;
        self
    }

    pub fn is_sensitive(&self, method: &str) -> bool {
        self.sensitive_methods.iter().any(|m| m == method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_recursion_depth, 100);
        assert_eq!(config.max_transaction_attempts, 5);
        assert_eq!(config.superuser_id, 1);
        assert_eq!(config.isolation, IsolationLevel::Serializable);
        assert!(config.is_sensitive("Write"));
        assert!(!config.is_sensitive("ComputeAge"));
    }

    #[test]
    fn test_builder_keeps_one_attempt() {
        let config = RuntimeConfig::new()
            .max_transaction_attempts(0)
            .sensitive_methods(["Unlink"]);
        assert_eq!(config.max_transaction_attempts, 1);
        assert!(config.is_sensitive("Unlink"));
        assert!(!config.is_sensitive("Write"));
    }
}
