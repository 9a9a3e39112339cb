//! Name validation for declarations.
//!
//! Model, field and method names are CamelCase identifiers; storage names are
//! lowercase snake identifiers. Checks run at declaration time and again
//! during bootstrap for synthesized names.

use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use regex::Regex;

/// Pattern for model, field and method names.
pub const DECLARATION_NAME_PATTERN: &str = r"^[A-Z][A-Za-z0-9]*$";

/// Pattern for storage (column / table) names.
pub const STORAGE_NAME_PATTERN: &str = r"^[a-z_][a-z0-9_]*$";

/// Thread-safe cache of compiled patterns.
struct RegexCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        let regex = Regex::new(pattern)?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(RegexCache::new)
}

/// Checks `value` against `pattern`; an invalid pattern never matches.
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    match regex_cache().get_or_compile(pattern) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            tracing::warn!(
                pattern = pattern,
                error = %e,
                "Invalid regex pattern in validation, treating as non-match"
            );
            false
        }
    }
}

/// Returns an explanation when `name` is not a valid model/field/method name.
pub fn check_declaration_name(name: &str) -> Option<String> {
    if matches_pattern(name, DECLARATION_NAME_PATTERN) {
        None
    } else {
        Some(format!(
            "'{}' is not a valid name (expected CamelCase, e.g. 'PartnerCategory')",
            name
        ))
    }
}

/// Returns an explanation when `name` is not a valid storage name.
pub fn check_storage_name(name: &str) -> Option<String> {
    if matches_pattern(name, STORAGE_NAME_PATTERN) {
        None
    } else {
        Some(format!(
            "'{}' is not a valid storage name (expected snake_case)",
            name
        ))
    }
}
