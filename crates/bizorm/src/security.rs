//! Access-control collaborator.
//!
//! The runtime asks an [`AccessControl`] implementation two questions:
//! whether a user may execute a method (optionally only when called from a
//! given method), and which row filter restricts the records a user may see.
//! [`AllowAll`] answers yes to everything; [`AccessRules`] is a small
//! in-memory rule table for applications and tests.

use std::collections::{HashMap, HashSet};

use bizorm_query::Condition;

/// Kind of access a row filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Write,
    Unlink,
}

pub trait AccessControl: Send + Sync {
    /// Whether `uid` may execute `model.method`. `caller` is the calling
    /// method (`Model.Method`) for nested calls.
    fn may_execute(&self, uid: i64, model: &str, method: &str, caller: Option<&str>) -> bool;

    /// Condition restricting the records of `model` visible to `uid`.
    fn row_filter(&self, _uid: i64, _model: &str, _perm: Permission) -> Option<Condition> {
        None
    }
}

/// Grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn may_execute(&self, _uid: i64, _model: &str, _method: &str, _caller: Option<&str>) -> bool {
        true
    }
}

/// Group every user belongs to.
pub const EVERYONE: &str = "everyone";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Grant {
    group: String,
    model: String,
    method: String,
    /// Only when called from this method.
    caller: Option<String>,
}

/// Method grants per group, plus row filters per model.
///
/// ```ignore
/// let rules = AccessRules::new()
///     .add_user_to_group(7, "sales")
///     .allow_group("sales", "Partner", "Write")
///     .allow_from(EVERYONE, "Partner", "Load", "Partner.NameGet")
///     .row_rule("Partner", Permission::Read, Condition::new().and("Active", Operator::Equals, true));
/// ```
#[derive(Debug, Clone, Default)]
pub struct AccessRules {
    groups: HashMap<i64, HashSet<String>>,
    grants: HashSet<Grant>,
    rules: HashMap<(String, Permission), Condition>,
}

impl AccessRules {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn add_user_to_group(mut self, uid: i64, group: &str) -> Self {
        self.groups.entry(uid).or_default().insert(group.to_string());
        self
    }

    /// Lets everyone execute `model.method`.
    #[must_use]
    pub fn allow(self, model: &str, method: &str) -> Self {
        self.allow_group(EVERYONE, model, method)
    }

    #[must_use]
    pub fn allow_group(mut self, group: &str, model: &str, method: &str) -> Self {
        self.grants.insert(Grant {
            group: group.to_string(),
            model: model.to_string(),
            method: method.to_string(),
            caller: None,
        });
        self
    }

    /// Lets `group` execute `model.method` only from `caller`
    /// (`Model.Method`).
    #[must_use]
    pub fn allow_from(mut self, group: &str, model: &str, method: &str, caller: &str) -> Self {
        self.grants.insert(Grant {
            group: group.to_string(),
            model: model.to_string(),
            method: method.to_string(),
            caller: Some(caller.to_string()),
        });
        self
    }

    /// Restricts the records of `model` every non-superuser sees.
    #[must_use]
    pub fn row_rule(mut self, model: &str, perm: Permission, condition: Condition) -> Self {
        self.rules.insert((model.to_string(), perm), condition);
        self
    }

    fn groups_of(&self, uid: i64) -> impl Iterator<Item = &str> {
        std::iter::once(EVERYONE).chain(
            self.groups
                .get(&uid)
                .into_iter()
                .flat_map(|g| g.iter().map(String::as_str)),
        )
    }
}

impl AccessControl for AccessRules {
    fn may_execute(&self, uid: i64, model: &str, method: &str, caller: Option<&str>) -> bool {
        self.groups_of(uid).any(|group| {
            self.grants.iter().any(|g| {
                g.group == group
                    && g.model == model
                    && g.method == method
                    && (g.caller.is_none() || g.caller.as_deref() == caller)
            })
        })
    }

    fn row_filter(&self, _uid: i64, model: &str, perm: Permission) -> Option<Condition> {
        self.rules.get(&(model.to_string(), perm)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bizorm_core::Operator;

    #[test]
    fn test_group_grants() {
        let rules = AccessRules::new()
            .add_user_to_group(7, "sales")
            .allow_group("sales", "Partner", "Write")
            .allow("Partner", "Load");
        assert!(rules.may_execute(7, "Partner", "Write", None));
        assert!(!rules.may_execute(8, "Partner", "Write", None));
        assert!(rules.may_execute(8, "Partner", "Load", None));
        assert!(!rules.may_execute(7, "Partner", "Unlink", None));
    }

    #[test]
    fn test_caller_scoped_grant() {
        let rules = AccessRules::new().allow_from(EVERYONE, "Partner", "Load", "Partner.NameGet");
        assert!(rules.may_execute(3, "Partner", "Load", Some("Partner.NameGet")));
        assert!(!rules.may_execute(3, "Partner", "Load", Some("Partner.Other")));
        assert!(!rules.may_execute(3, "Partner", "Load", None));
    }

    #[test]
    fn test_row_rules() {
        let rules = AccessRules::new().row_rule(
            "Partner",
            Permission::Read,
            Condition::new().and("Active", Operator::Equals, true),
        );
        assert!(rules.row_filter(3, "Partner", Permission::Read).is_some());
        assert!(rules.row_filter(3, "Partner", Permission::Write).is_none());
        assert!(AllowAll.may_execute(3, "Anything", "Unlink", None));
    }
}
