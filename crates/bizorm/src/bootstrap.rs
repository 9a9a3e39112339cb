//! Composition of declarations into the frozen catalog.
//!
//! Steps, in order, each fatal on error:
//!
//! 1. mixin injection: fields (first occurrence wins) and method layers
//!    (own layers, then later mixins, then earlier ones, then `BaseMixin`);
//! 2. relation linking, with synthesized many-to-many link models;
//! 3. embedding expansion into related proxy fields;
//! 4. related-field materialization from the terminal field;
//! 5. context-field expansion into `<Model><Field>Context` models;
//! 6. dependency graph build;
//! 7. signature validation of wired methods and default orders.

use std::collections::{BTreeMap, HashSet, VecDeque};

use bizorm_core::{
    ContextLink, DeclarationErrorKind, Error, FieldType, LinkMeta, OnDelete, Result,
    declaration_error,
};

use crate::catalog::Catalog;
use crate::depends::{self, MAX_RELATED_EXPANSION};
use crate::fields::{Field, FieldDef};
use crate::methods::{Layer, Method, MethodSignature};
use crate::model::{Model, ModelOptions, SqlConstraint};
use crate::registry::{BASE_MIXIN, MethodDecl, ModelDecl, Registry};

type Models = BTreeMap<String, Model>;

pub(crate) fn run(registry: &Registry) -> Result<Catalog> {
    let mut models: Models = BTreeMap::new();

    tracing::debug!(models = registry.decls.len(), "Bootstrap: injecting mixins");
    for decl in &registry.decls {
        let model = compose(registry, decl, true)?;
        models.insert(model.name.clone(), model);
    }

    tracing::debug!("Bootstrap: linking relations");
    link_relations(registry, &mut models)?;

    tracing::debug!("Bootstrap: expanding embedded fields");
    expand_embedded(&mut models)?;

    tracing::debug!("Bootstrap: materializing related fields");
    materialize_related(&mut models)?;

    tracing::debug!("Bootstrap: expanding contexted fields");
    expand_contexts(registry, &mut models)?;

    tracing::debug!("Bootstrap: building dependency graph");
    let dependencies = depends::build(&models)?;

    tracing::debug!("Bootstrap: validating signatures");
    validate(&models)?;

    let catalog = Catalog {
        models,
        sequences: registry.sequences.clone(),
        dependencies,
    };
    tracing::info!(
        models = catalog.models.len(),
        persisted = catalog.persisted_models().count(),
        directives = catalog.dependencies.values().map(Vec::len).sum::<usize>(),
        sequences = catalog.sequences.len(),
        "Registry bootstrapped"
    );
    Ok(catalog)
}

// ============================================================================
// Step 1: mixin injection
// ============================================================================

/// Declarations contributing to `decl`, most specific first.
fn lineage<'a>(registry: &'a Registry, decl: &'a ModelDecl) -> Result<Vec<&'a ModelDecl>> {
    fn walk<'a>(
        registry: &'a Registry,
        decl: &'a ModelDecl,
        stack: &mut Vec<String>,
        out: &mut Vec<&'a ModelDecl>,
    ) -> Result<()> {
        if stack.contains(&decl.name) {
            return Err(declaration_error(
                DeclarationErrorKind::MixinCycle,
                &decl.name,
                None,
                format!("mixin cycle through {}", stack.join(" -> ")),
            ));
        }
        if out.iter().any(|d| d.name == decl.name) {
            return Ok(());
        }
        out.push(decl);
        stack.push(decl.name.clone());
        for mixin in decl.mixins.iter().rev() {
            let m = registry.decl(mixin).ok_or_else(|| {
                declaration_error(
                    DeclarationErrorKind::UnknownModel,
                    &decl.name,
                    Some(mixin),
                    "unknown mixin",
                )
            })?;
            walk(registry, m, stack, out)?;
        }
        stack.pop();
        Ok(())
    }

    let mut out = Vec::new();
    walk(registry, decl, &mut Vec::new(), &mut out)?;
    if !decl.options.mixin {
        out.retain(|d| d.name != BASE_MIXIN);
        if let Some(base) = registry.decl(BASE_MIXIN) {
            out.push(base);
        }
    }
    Ok(out)
}

/// Builds the model of `decl` with everything its lineage contributes.
/// Synthesized models skip the `BaseMixin` fields.
fn compose(registry: &Registry, decl: &ModelDecl, base_fields: bool) -> Result<Model> {
    let lineage = lineage(registry, decl)?;
    let mut model = Model::new(&decl.name, decl.options);
    model.mixins = decl.mixins.clone();
    model.default_order = decl.default_order.clone();

    for source in &lineage {
        if source.name == BASE_MIXIN && !base_fields && source.name != decl.name {
            continue;
        }
        let from_mixin = (source.name != decl.name).then(|| source.name.clone());
        for def in &source.fields {
            if let Some(existing) = model.field(&def.name) {
                if existing.field_type().is_relation() != def.field_type.is_relation() {
                    return Err(declaration_error(
                        DeclarationErrorKind::IllegalOverride,
                        &decl.name,
                        Some(&def.name),
                        format!(
                            "{} field overrides a {} field of {}",
                            existing.field_type(),
                            def.field_type,
                            source.name
                        ),
                    ));
                }
                continue;
            }
            model.push_field(Field::from_def(&decl.name, def.clone(), from_mixin.clone()));
        }
        for (name, sql, message) in &source.sql_constraints {
            if !model.sql_constraints.iter().any(|c| &c.name == name) {
                model
                    .sql_constraints
                    .push(SqlConstraint::new(&model.table, name, sql, message));
            }
        }
        if model.default_order.is_empty() {
            model.default_order = source.default_order.clone();
        }
    }

    compose_methods(&decl.name, &lineage, &mut model)?;
    Ok(model)
}

fn compose_methods(model_name: &str, lineage: &[&ModelDecl], model: &mut Model) -> Result<()> {
    let mut names: Vec<&str> = Vec::new();
    for source in lineage {
        for m in &source.methods {
            if !names.contains(&m.name()) {
                names.push(m.name());
            }
        }
    }

    for name in names {
        let mut signature: Option<MethodSignature> = None;
        let mut layers = Vec::new();
        let mut granted = false;
        for source in lineage {
            granted |= source.grants.iter().any(|g| g == name);
            for m in source.methods.iter().rev().filter(|m| m.name() == name) {
                if let MethodDecl::Declare { signature: sig, .. } = m {
                    match &signature {
                        Some(existing) if existing != sig => {
                            return Err(declaration_error(
                                DeclarationErrorKind::SignatureMismatch,
                                model_name,
                                Some(name),
                                format!(
                                    "declared as {} in {} but {} elsewhere",
                                    sig, source.name, existing
                                ),
                            ));
                        }
                        _ => signature = Some(sig.clone()),
                    }
                }
                layers.push(Layer {
                    func: m.func().clone(),
                    origin: source.name.clone(),
                    from_mixin: source.name != model_name,
                });
            }
        }
        let Some(signature) = signature else {
            // a mixin may extend what a sibling mixin declares; the check
            // happens on the models that inherit both
            if model.is_mixin() {
                continue;
            }
            return Err(declaration_error(
                DeclarationErrorKind::UnknownMethod,
                model_name,
                Some(name),
                "extended method is never declared",
            ));
        };
        model.methods.insert(
            name.to_string(),
            Method {
                model: model_name.to_string(),
                name: name.to_string(),
                signature,
                layers,
                granted,
            },
        );
    }
    Ok(())
}

// ============================================================================
// Step 2: relation linking
// ============================================================================

fn unresolvable(model: &str, field: &str, message: impl Into<String>) -> Error {
    declaration_error(
        DeclarationErrorKind::UnresolvableRelation,
        model,
        Some(field),
        message,
    )
}

/// Default link model of a many-to-many between `a` and `b`.
fn link_model_name(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}{}Rel", first, second)
}

fn link_relations(registry: &Registry, models: &mut Models) -> Result<()> {
    let concrete: Vec<String> = models
        .values()
        .filter(|m| !m.is_mixin())
        .map(|m| m.name.clone())
        .collect();

    for name in &concrete {
        let fields: Vec<Field> = models[name]
            .fields
            .iter()
            .filter(|f| f.field_type().is_relation() && f.def.related.is_none())
            .cloned()
            .collect();
        for field in fields {
            let target = field
                .def
                .target
                .clone()
                .ok_or_else(|| unresolvable(name, field.name(), "relation without target"))?;
            match models.get(&target) {
                Some(t) if !t.is_mixin() => {}
                Some(_) => {
                    return Err(unresolvable(name, field.name(), format!("target {} is a mixin", target)));
                }
                None => {
                    return Err(unresolvable(name, field.name(), format!("unknown target model {}", target)));
                }
            }

            match field.field_type() {
                FieldType::One2Many | FieldType::Rev2One => {
                    let reverse = field.def.reverse_fk.clone().unwrap_or_default();
                    let fk_json = models[&target]
                        .field(&reverse)
                        .filter(|fk| fk.field_type().is_fk_relation() && fk.target() == Some(name.as_str()))
                        .map(|fk| fk.json().to_string())
                        .ok_or_else(|| {
                            unresolvable(
                                name,
                                field.name(),
                                format!("{}.{} is not a foreign key to {}", target, reverse, name),
                            )
                        })?;
                    set_meta(models, name, field.name(), |f| f.meta.reverse_fk = Some(fk_json));
                }
                FieldType::Many2Many => {
                    let link = link_many2many(registry, models, name, &field, &target)?;
                    set_meta(models, name, field.name(), |f| f.meta.link = Some(link));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn set_meta(models: &mut Models, model: &str, field: &str, f: impl FnOnce(&mut Field)) {
    if let Some(field) = models.get_mut(model).and_then(|m| m.field_mut(field)) {
        f(field);
    }
}

fn link_many2many(
    registry: &Registry,
    models: &mut Models,
    model: &str,
    field: &Field,
    target: &str,
) -> Result<LinkMeta> {
    let link_name = field
        .def
        .link_model
        .clone()
        .unwrap_or_else(|| link_model_name(model, target));
    let (ours, theirs) = match &field.def.link_fields {
        Some(pair) => pair.clone(),
        None if model == target => ("Model1".to_string(), "Model2".to_string()),
        None => (model.to_string(), target.to_string()),
    };
    if ours == theirs {
        return Err(unresolvable(model, field.name(), "link fields must differ"));
    }

    if !models.contains_key(&link_name) {
        let options = ModelOptions {
            system: true,
            ..ModelOptions::default()
        };
        let mut decl = ModelDecl {
            name: link_name.clone(),
            options,
            mixins: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            grants: Vec::new(),
            sql_constraints: Vec::new(),
            default_order: Vec::new(),
        };
        for (endpoint, endpoint_target) in [(&ours, model), (&theirs, target)] {
            decl.fields.push(
                FieldDef::many2one(endpoint.as_str(), endpoint_target)
                    .required()
                    .index()
                    .on_delete(OnDelete::Cascade),
            );
        }
        let columns = [
            FieldType::Many2One.default_json_name(&ours),
            FieldType::Many2One.default_json_name(&theirs),
        ];
        decl.sql_constraints.push((
            "pair_uniq".to_string(),
            format!("UNIQUE ({}, {})", columns[0], columns[1]),
            format!("{} is already linked", link_name),
        ));
        let link = compose(registry, &decl, false)?;
        tracing::debug!(link = %link_name, ours = %ours, theirs = %theirs, "Synthesized link model");
        models.insert(link_name.clone(), link);
    }

    let link = &models[&link_name];
    let endpoint = |name: &str, expected: &str| -> Result<String> {
        link.field(name)
            .filter(|f| f.field_type().is_fk_relation() && f.target() == Some(expected))
            .map(|f| f.json().to_string())
            .ok_or_else(|| {
                unresolvable(
                    model,
                    field.name(),
                    format!("{}.{} is not a link to {}", link_name, name, expected),
                )
            })
    };
    Ok(LinkMeta {
        model: link_name.clone(),
        ours: endpoint(&ours, model)?,
        theirs: endpoint(&theirs, target)?,
    })
}

// ============================================================================
// Step 3: embedding
// ============================================================================

fn expand_embedded(models: &mut Models) -> Result<()> {
    let names: Vec<String> = models
        .values()
        .filter(|m| !m.is_mixin())
        .map(|m| m.name.clone())
        .collect();
    let mut done: HashSet<String> = HashSet::new();
    for name in names {
        embed_model(models, &name, &mut done, &mut Vec::new())?;
    }
    Ok(())
}

fn embed_model(
    models: &mut Models,
    name: &str,
    done: &mut HashSet<String>,
    stack: &mut Vec<String>,
) -> Result<()> {
    if done.contains(name) {
        return Ok(());
    }
    if stack.iter().any(|s| s == name) {
        return Err(declaration_error(
            DeclarationErrorKind::IllegalOverride,
            name,
            None,
            format!("embedding cycle through {}", stack.join(" -> ")),
        ));
    }
    let embedded: Vec<(String, String)> = models[name]
        .fields
        .iter()
        .filter(|f| f.def.embed)
        .filter_map(|f| f.target().map(|t| (f.name().to_string(), t.to_string())))
        .collect();
    if embedded.is_empty() {
        done.insert(name.to_string());
        return Ok(());
    }

    stack.push(name.to_string());
    for (via, target) in embedded {
        embed_model(models, &target, done, stack)?;
        let proxies: Vec<FieldDef> = models[&target]
            .fields
            .iter()
            .filter(|g| g.target() != Some(name))
            .filter(|g| {
                let model = &models[name];
                !model.has_field(g.name()) && !model.has_field(g.json())
            })
            .map(|g| {
                FieldDef::related(g.name(), format!("{}.{}", via, g.name())).json_name(g.json())
            })
            .collect();
        tracing::debug!(model = name, via = %via, proxies = proxies.len(), "Embedded fields");
        if let Some(model) = models.get_mut(name) {
            for def in proxies {
                model.push_field(Field::from_def(name, def, None));
            }
        }
    }
    stack.pop();
    done.insert(name.to_string());
    Ok(())
}

// ============================================================================
// Step 4: related fields
// ============================================================================

/// Terminal field of a related path, related fields followed.
fn related_terminal(models: &Models, model: &str, field: &str, path: &str) -> Result<Field> {
    let bad = |message: String| {
        declaration_error(DeclarationErrorKind::InvalidPath, model, Some(field), message)
    };
    let mut parts: VecDeque<String> = path.split('.').map(str::to_string).collect();
    let mut current = model.to_string();
    let mut expansions = 0;
    while let Some(part) = parts.pop_front() {
        let f = models
            .get(&current)
            .and_then(|m| m.field(&part))
            .ok_or_else(|| bad(format!("unknown field {}.{} in path '{}'", current, part, path)))?;
        if let Some(related) = f.def.related.as_deref() {
            expansions += 1;
            if expansions > MAX_RELATED_EXPANSION {
                return Err(bad(format!("related path '{}' loops", path)));
            }
            for p in related.split('.').rev() {
                parts.push_front(p.to_string());
            }
            continue;
        }
        if parts.is_empty() {
            return Ok(f.clone());
        }
        current = f
            .target()
            .ok_or_else(|| bad(format!("'{}' in path '{}' is not a relation", part, path)))?
            .to_string();
    }
    Err(bad("empty related path".to_string()))
}

fn materialize_related(models: &mut Models) -> Result<()> {
    let mut updates = Vec::new();
    for model in models.values().filter(|m| !m.is_mixin()) {
        for field in model.fields.iter().filter(|f| f.def.related.is_some()) {
            let path = field.def.related.clone().unwrap_or_default();
            let terminal = related_terminal(models, &model.name, field.name(), &path)?;
            updates.push((model.name.clone(), field.name().to_string(), path, terminal));
        }
    }
    for (model, field, path, terminal) in updates {
        set_meta(models, &model, &field, |f| {
            f.meta.field_type = terminal.field_type();
            f.meta.target = terminal.meta.target.clone();
            f.meta.reverse_fk = terminal.meta.reverse_fk.clone();
            f.meta.link = terminal.meta.link.clone();
            f.meta.stored = false;
            f.meta.related_path = Some(path);
            f.def.field_type = terminal.field_type();
            f.def.target = terminal.def.target.clone();
            f.def.selection = terminal.def.selection.clone();
            f.def.size = terminal.def.size;
            f.def.compute = None;
            f.def.stored = false;
            f.def.onchange = None;
            f.def.constraint = None;
            f.related_stored = terminal.is_loaded_by_default();
        });
    }
    Ok(())
}

// ============================================================================
// Step 5: contexted fields
// ============================================================================

fn expand_contexts(registry: &Registry, models: &mut Models) -> Result<()> {
    let mut contexted = Vec::new();
    for model in models.values().filter(|m| !m.is_mixin()) {
        for field in model.fields.iter().filter(|f| !f.def.contexts.is_empty()) {
            if field.field_type().is_relation() && !field.field_type().is_fk_relation() {
                return Err(declaration_error(
                    DeclarationErrorKind::IllegalOverride,
                    &model.name,
                    Some(field.name()),
                    "only scalar and many-to-one fields can depend on the context",
                ));
            }
            contexted.push((model.name.clone(), field.clone()));
        }
    }

    for (model, field) in contexted {
        let holder = format!("{}{}Context", model, field.name());
        let mut value = field.def.clone();
        value.contexts.clear();
        value.compute = None;
        value.related = None;
        value.required = false;
        value.unique = false;
        value.default = None;
        value.json = Some(field.json().to_string());

        let decl = ModelDecl {
            name: holder.clone(),
            options: ModelOptions {
                system: true,
                context_holder: true,
                ..ModelOptions::default()
            },
            mixins: Vec::new(),
            fields: vec![
                FieldDef::many2one("Record", model.as_str())
                    .required()
                    .index()
                    .on_delete(OnDelete::Cascade),
                FieldDef::char("ContextSlug").required(),
                value,
            ],
            methods: Vec::new(),
            grants: Vec::new(),
            sql_constraints: vec![(
                "slug_uniq".to_string(),
                "UNIQUE (record_id, context_slug)".to_string(),
                format!("{} already has a value for this context", field.name()),
            )],
            default_order: Vec::new(),
        };
        let holder_model = compose(registry, &decl, false)?;
        tracing::debug!(model = %model, field = %field.name(), holder = %holder, "Synthesized context model");
        models.insert(holder.clone(), holder_model);

        let json = field.json().to_string();
        set_meta(models, &model, field.name(), |f| {
            f.meta.stored = false;
            f.meta.contexts = Some(ContextLink {
                model: holder,
                record: "record_id".to_string(),
                slug: "context_slug".to_string(),
                value: json,
            });
        });
    }
    Ok(())
}

// ============================================================================
// Step 7: signatures
// ============================================================================

fn check_wired(
    model: &Model,
    field: &Field,
    method: Option<&str>,
    expected: &MethodSignature,
    role: &str,
) -> Result<()> {
    let Some(method) = method else {
        return Ok(());
    };
    let Some(m) = model.method(method) else {
        return Err(declaration_error(
            DeclarationErrorKind::UnknownMethod,
            &model.name,
            Some(field.name()),
            format!("{} method {} does not exist", role, method),
        ));
    };
    if !m.signature.satisfies(expected) {
        return Err(declaration_error(
            DeclarationErrorKind::SignatureMismatch,
            &model.name,
            Some(field.name()),
            format!(
                "{} method {} has signature {}, expected {}",
                role, method, m.signature, expected
            ),
        ));
    }
    Ok(())
}

fn validate(models: &Models) -> Result<()> {
    for model in models.values().filter(|m| !m.is_mixin()) {
        for field in &model.fields {
            check_wired(model, field, field.compute(), &MethodSignature::compute(), "compute")?;
            check_wired(model, field, field.onchange(), &MethodSignature::onchange(), "onchange")?;
            check_wired(model, field, field.inverse(), &MethodSignature::inverse(), "inverse")?;
            check_wired(
                model,
                field,
                field.constraint(),
                &MethodSignature::constraint(),
                "constraint",
            )?;
            if field.inverse().is_some() && !field.is_computed() {
                return Err(declaration_error(
                    DeclarationErrorKind::IllegalOverride,
                    &model.name,
                    Some(field.name()),
                    "only computed fields can have an inverse",
                ));
            }
        }
        for order in &model.default_order {
            depends::expand_path(models, &model.name, &order.path).map_err(|e| {
                declaration_error(
                    DeclarationErrorKind::InvalidPath,
                    &model.name,
                    None,
                    format!("default order '{}': {}", order.path, e),
                )
            })?;
        }
    }
    Ok(())
}
