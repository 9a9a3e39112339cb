//! Field dependency graph.
//!
//! Each `depends` path of a computed field is expanded into physical hops
//! (related fields replaced by the path they mirror). The last hop names the
//! field whose change matters; a [`ComputeDirective`] is registered against
//! it, carrying the path that leads from the computed field's model to the
//! changed records. When `User.Age` depends on `Profile.Age`, writing
//! `Profile.Age` on profiles `P` recomputes the users matching
//! `Profile in P`.

use std::collections::{BTreeMap, HashMap, VecDeque};

use bizorm_core::{ArgumentError, DeclarationErrorKind, Error, Result, declaration_error};

use crate::model::Model;

/// Related-field expansions allowed while walking one path.
pub(crate) const MAX_RELATED_EXPANSION: usize = 32;

/// Recomputation registered against a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeDirective {
    /// Model of the computed field.
    pub model: String,
    /// Computed field.
    pub field: String,
    /// Method computing the field.
    pub compute: String,
    pub stored: bool,
    /// Path from `model` to the records whose change triggers the directive;
    /// empty when they are the same records.
    pub path: String,
}

/// One physical hop of an expanded path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub model: String,
    pub field: String,
}

/// Expands `path` of `model` into physical hops, following related fields.
pub(crate) fn expand_path(
    models: &BTreeMap<String, Model>,
    model: &str,
    path: &str,
) -> Result<Vec<PathStep>> {
    let bad = |message: String| Error::Argument(ArgumentError::new(model, path, message));
    let mut parts: VecDeque<String> = path.split('.').map(str::to_string).collect();
    let mut current = model.to_string();
    let mut steps = Vec::new();
    let mut expansions = 0;

    while let Some(part) = parts.pop_front() {
        let m = models
            .get(&current)
            .ok_or_else(|| Error::UnknownModel(current.clone()))?;
        if part == "ID" || part == "id" {
            if !parts.is_empty() {
                return Err(bad("ID cannot be traversed".to_string()));
            }
            steps.push(PathStep {
                model: current,
                field: "ID".to_string(),
            });
            break;
        }
        let field = m.field(&part).ok_or_else(|| Error::UnknownField {
            model: current.clone(),
            field: part.clone(),
        })?;
        if let Some(related) = field.def.related.as_deref() {
            expansions += 1;
            if expansions > MAX_RELATED_EXPANSION {
                return Err(bad("related fields loop".to_string()));
            }
            for p in related.split('.').rev() {
                parts.push_front(p.to_string());
            }
            continue;
        }
        steps.push(PathStep {
            model: current.clone(),
            field: field.name().to_string(),
        });
        if !parts.is_empty() {
            current = field
                .target()
                .ok_or_else(|| bad(format!("'{}' is not a relation", field.name())))?
                .to_string();
        }
    }
    if steps.is_empty() {
        return Err(bad("empty path".to_string()));
    }
    Ok(steps)
}

/// Directives keyed by the (model, field) whose change triggers them.
pub(crate) type Dependencies = HashMap<(String, String), Vec<ComputeDirective>>;

/// Registers the directives of every computed field of `models`.
pub(crate) fn build(models: &BTreeMap<String, Model>) -> Result<Dependencies> {
    let mut deps: Dependencies = HashMap::new();
    for model in models.values().filter(|m| !m.is_mixin()) {
        for field in model.fields() {
            let Some(compute) = field.compute() else {
                continue;
            };
            for path in field.depends() {
                let steps = expand_path(models, model.name(), path).map_err(|e| {
                    declaration_error(
                        DeclarationErrorKind::InvalidPath,
                        model.name(),
                        Some(field.name()),
                        format!("depends path '{}': {}", path, e),
                    )
                })?;
                let Some((last, prefix)) = steps.split_last() else {
                    continue;
                };
                let directive = ComputeDirective {
                    model: model.name().to_string(),
                    field: field.name().to_string(),
                    compute: compute.to_string(),
                    stored: field.is_stored_computed(),
                    path: prefix
                        .iter()
                        .map(|s| s.field.as_str())
                        .collect::<Vec<_>>()
                        .join("."),
                };
                let entry = deps
                    .entry((last.model.clone(), last.field.clone()))
                    .or_default();
                if !entry.contains(&directive) {
                    tracing::debug!(
                        on = %format!("{}.{}", last.model, last.field),
                        recompute = %format!("{}.{}", directive.model, directive.field),
                        path = %directive.path,
                        "Register compute directive"
                    );
                    entry.push(directive);
                }
            }
        }
    }
    Ok(deps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{Field, FieldDef};
    use crate::model::ModelOptions;

    fn models() -> BTreeMap<String, Model> {
        let mut user = Model::new("User", ModelOptions::default());
        let mut profile_field = Field::from_def("User", FieldDef::one2one("Profile", "Profile"), None);
        profile_field.meta.target = Some("Profile".into());
        user.push_field(profile_field);
        user.push_field(Field::from_def(
            "User",
            FieldDef::integer("Age")
                .compute("ComputeAge")
                .stored()
                .depends(&["Profile", "Profile.Age"]),
            None,
        ));
        user.push_field(Field::from_def("User", FieldDef::related("ProfileAge", "Profile.Age"), None));
        user.push_field(Field::from_def(
            "User",
            FieldDef::integer("Decade").compute("ComputeDecade").depends(&["ProfileAge"]),
            None,
        ));
        let mut profile = Model::new("Profile", ModelOptions::default());
        profile.push_field(Field::from_def("Profile", FieldDef::integer("Age"), None));

        let mut models = BTreeMap::new();
        models.insert("User".to_string(), user);
        models.insert("Profile".to_string(), profile);
        models
    }

    #[test]
    fn test_expand_follows_related_fields() {
        let models = models();
        let steps = expand_path(&models, "User", "ProfileAge").unwrap();
        assert_eq!(
            steps,
            vec![
                PathStep { model: "User".into(), field: "Profile".into() },
                PathStep { model: "Profile".into(), field: "Age".into() },
            ]
        );
        assert!(expand_path(&models, "User", "Age.Profile").is_err());
        assert!(expand_path(&models, "User", "Missing").is_err());
    }

    #[test]
    fn test_directives_are_registered_on_the_last_hop() {
        let deps = build(&models()).unwrap();
        let on_age = &deps[&("Profile".to_string(), "Age".to_string())];
        assert_eq!(on_age.len(), 2);
        assert!(on_age.iter().all(|d| d.path == "Profile"));
        let stored = on_age.iter().find(|d| d.field == "Age").unwrap();
        assert!(stored.stored);
        assert_eq!(stored.compute, "ComputeAge");
        let on_profile = &deps[&("User".to_string(), "Profile".to_string())];
        assert_eq!(on_profile[0].path, "");
    }
}
