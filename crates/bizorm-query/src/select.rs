//! SQL generation for record searches and loads.
//!
//! [`SqlBuilder`] turns field paths and conditions of one model into SQL:
//!
//! - related fields are replaced by the path they mirror, recursively;
//! - every relation hop becomes a LEFT JOIN (see [`JoinPlan`]);
//! - many-to-many hops go through the link table, using the link metadata
//!   of the field to pick "our" and "their" columns;
//! - context-dependent fields read the value row of the current context
//!   slug, falling back to the default row;
//! - WHERE keeps the predicates and combinators exactly as given.
//!
//! Statements are assembled with `?` markers and renumbered with the
//! dialect's placeholders once all joins (and their parameters) are known.
//!
//! # Example
//!
//! ```ignore
//! let stmt = SqlBuilder::new(&catalog, &dialect, "User")?
//!     .select_ids(&Query::new(Condition::leaf("Profile.Age", Operator::Greater, 18)))?;
//! let rows = conn.query(&stmt.sql, &stmt.params)?;
//! ```

use std::collections::{BTreeMap, VecDeque};

use bizorm_core::{
    ArgumentError, Dialect, Error, FieldMeta, FieldType, MetaView, Operator, Result, TypeError,
    Value,
};

use crate::condition::{Condition, Term};
use crate::join::JoinPlan;
use crate::query::{Aggregate, OrderBy, Query};

/// Related-field expansions allowed while resolving one path.
const MAX_PATH_EXPANSION: usize = 32;

/// Provides the current context slug of context-dependent fields.
pub trait SlugSource {
    fn slug(&self, field: &FieldMeta) -> String;
}

/// Slug source that always selects the default value.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSlugs;

impl SlugSource for DefaultSlugs {
    fn slug(&self, _field: &FieldMeta) -> String {
        String::new()
    }
}

/// A rendered statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub sql: String,
    pub params: Vec<Value>,
    /// Semantic name of every selected column, in order (storage paths such
    /// as `profile_id.age`).
    pub columns: Vec<String>,
    /// Long alias → synthetic alias replacements.
    pub substitutions: BTreeMap<String, String>,
}

/// A field path resolved against the join plan.
#[derive(Debug, Clone)]
struct Resolved {
    expr: String,
    field: FieldMeta,
    json_path: String,
}

fn qcol(dialect: &dyn Dialect, alias: &str, column: &str) -> String {
    format!(
        "{}.{}",
        dialect.quote_identifier(alias),
        dialect.quote_identifier(column)
    )
}

fn invalid_path(model: &str, path: &str, message: &str) -> Error {
    Error::Argument(ArgumentError::new(
        model,
        "path",
        format!("'{}': {}", path, message),
    ))
}

/// Replaces `?` markers outside quoted sections with dialect placeholders.
pub fn rebind(sql: &str, dialect: &dyn Dialect) -> String {
    let mut out = String::with_capacity(sql.len() + 16);
    let mut quote: Option<char> = None;
    let mut index = 0;
    for c in sql.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                out.push(c);
            }
            Some(_) => out.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                out.push(c);
            }
            None if c == '?' => {
                index += 1;
                out.push_str(&dialect.placeholder(index));
            }
            None => out.push(c),
        }
    }
    out
}

/// Builds SELECT statements for one model.
pub struct SqlBuilder<'a> {
    meta: &'a dyn MetaView,
    dialect: &'a dyn Dialect,
    slugs: &'a dyn SlugSource,
    model: String,
    plan: JoinPlan,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(meta: &'a dyn MetaView, dialect: &'a dyn Dialect, model: &str) -> Result<Self> {
        let table = meta
            .table_name(model)
            .ok_or_else(|| Error::UnknownModel(model.to_string()))?;
        Ok(Self {
            meta,
            dialect,
            slugs: &DefaultSlugs,
            model: model.to_string(),
            plan: JoinPlan::new(table, dialect.max_identifier_length()),
        })
    }

    /// Uses `slugs` to select context-dependent values.
    #[must_use]
    pub fn with_slugs(mut self, slugs: &'a dyn SlugSource) -> Self {
        self.slugs = slugs;
        self
    }

    fn root_id(&self) -> String {
        qcol(self.dialect, self.plan.root_alias(), "id")
    }

    // ========================================================================
    // Path resolution
    // ========================================================================

    fn resolve(&mut self, path: &str) -> Result<Resolved> {
        let mut parts: VecDeque<String> = path.split('.').map(str::to_string).collect();
        let mut model = self.model.clone();
        let mut alias = self.plan.root_alias().to_string();
        let mut key = String::new();
        let mut json_path: Vec<String> = Vec::new();
        let mut expansions = 0;

        while let Some(part) = parts.pop_front() {
            let Some(field) = self.meta.field_meta(&model, &part).cloned() else {
                if parts.is_empty() && (part == "ID" || part == "id") {
                    json_path.push("id".to_string());
                    return Ok(Resolved {
                        expr: qcol(self.dialect, &alias, "id"),
                        field: FieldMeta::new(&model, "ID", "id", FieldType::Integer),
                        json_path: json_path.join("."),
                    });
                }
                return Err(Error::UnknownField { model, field: part });
            };

            if let Some(related) = &field.related_path {
                expansions += 1;
                if expansions > MAX_PATH_EXPANSION {
                    return Err(invalid_path(&self.model, path, "related fields loop"));
                }
                for p in related.split('.').rev() {
                    parts.push_front(p.to_string());
                }
                continue;
            }

            json_path.push(field.json.clone());
            if parts.is_empty() {
                let expr = self.terminal_expr(&alias, &key, &field, path)?;
                return Ok(Resolved {
                    expr,
                    field,
                    json_path: json_path.join("."),
                });
            }

            let (next_alias, next_model) = self.join_hop(&alias, &key, &field, path)?;
            key = if key.is_empty() {
                field.json.clone()
            } else {
                format!("{}.{}", key, field.json)
            };
            alias = next_alias;
            model = next_model;
        }
        Err(invalid_path(&self.model, path, "empty path"))
    }

    fn terminal_expr(
        &mut self,
        alias: &str,
        key: &str,
        field: &FieldMeta,
        path: &str,
    ) -> Result<String> {
        if field.contexts.is_some() {
            return self.contexted_expr(alias, key, field);
        }
        if let Some(column) = field.column() {
            return Ok(qcol(self.dialect, alias, column));
        }
        if field.field_type.is_reverse_relation() || field.field_type == FieldType::Many2Many {
            let (target_alias, _) = self.join_hop(alias, key, field, path)?;
            return Ok(qcol(self.dialect, &target_alias, "id"));
        }
        Err(invalid_path(&self.model, path, "field is not stored"))
    }

    /// Joins the target of relation `field` reached from `alias`.
    fn join_hop(
        &mut self,
        alias: &str,
        key: &str,
        field: &FieldMeta,
        path: &str,
    ) -> Result<(String, String)> {
        let d = self.dialect;
        let target = field
            .target
            .clone()
            .ok_or_else(|| invalid_path(&self.model, path, "traverses a non-relation field"))?;
        let target_table = self
            .meta
            .table_name(&target)
            .ok_or_else(|| Error::UnknownModel(target.clone()))?
            .to_string();
        let hop_key = if key.is_empty() {
            field.json.clone()
        } else {
            format!("{}.{}", key, field.json)
        };
        let long_alias = format!("{}__{}", alias, field.json);
        let parent_id = qcol(d, alias, "id");

        let joined = match field.field_type {
            FieldType::Many2One | FieldType::One2One => {
                let parent_fk = qcol(d, alias, &field.json);
                self.plan.add(&hop_key, &target_table, long_alias, |a| {
                    (format!("{} = {}", qcol(d, a, "id"), parent_fk), Vec::new())
                })
            }
            FieldType::One2Many | FieldType::Rev2One => {
                let fk = field
                    .reverse_fk
                    .clone()
                    .ok_or_else(|| invalid_path(&self.model, path, "missing reverse key"))?;
                self.plan.add(&hop_key, &target_table, long_alias, |a| {
                    (format!("{} = {}", qcol(d, a, &fk), parent_id), Vec::new())
                })
            }
            FieldType::Many2Many => {
                let link = field
                    .link
                    .clone()
                    .ok_or_else(|| invalid_path(&self.model, path, "missing link model"))?;
                let link_table = self
                    .meta
                    .table_name(&link.model)
                    .ok_or_else(|| Error::UnknownModel(link.model.clone()))?
                    .to_string();
                let link_alias = self.plan.add(
                    &format!("{}#link", hop_key),
                    &link_table,
                    format!("{}__link", long_alias),
                    |a| (format!("{} = {}", qcol(d, a, &link.ours), parent_id), Vec::new()),
                );
                let their_col = qcol(d, &link_alias, &link.theirs);
                self.plan.add(&hop_key, &target_table, long_alias, |a| {
                    (format!("{} = {}", qcol(d, a, "id"), their_col), Vec::new())
                })
            }
            _ => return Err(invalid_path(&self.model, path, "traverses a non-relation field")),
        };
        Ok((joined, target))
    }

    /// `COALESCE(<value for slug>, <default value>)` through the context table.
    fn contexted_expr(&mut self, alias: &str, key: &str, field: &FieldMeta) -> Result<String> {
        let d = self.dialect;
        let Some(ctx) = field.contexts.clone() else {
            return Err(invalid_path(&self.model, &field.name, "field has no contexts"));
        };
        let aux_table = self
            .meta
            .table_name(&ctx.model)
            .ok_or_else(|| Error::UnknownModel(ctx.model.clone()))?
            .to_string();
        let base_key = if key.is_empty() {
            field.json.clone()
        } else {
            format!("{}.{}", key, field.json)
        };
        let parent_id = qcol(d, alias, "id");
        let slug = self.slugs.slug(field);

        let default_alias = self.plan.add(
            &format!("{}#default", base_key),
            &aux_table,
            format!("{}__{}__default", alias, field.json),
            |a| {
                (
                    format!(
                        "{} = {} AND {} = ?",
                        qcol(d, a, &ctx.record),
                        parent_id,
                        qcol(d, a, &ctx.slug)
                    ),
                    vec![Value::Text(String::new())],
                )
            },
        );
        let default_value = qcol(d, &default_alias, &ctx.value);
        if slug.is_empty() {
            return Ok(default_value);
        }
        let slug_alias = self.plan.add(
            &format!("{}#ctx:{}", base_key, slug),
            &aux_table,
            format!("{}__{}__ctx", alias, field.json),
            |a| {
                (
                    format!(
                        "{} = {} AND {} = ?",
                        qcol(d, a, &ctx.record),
                        parent_id,
                        qcol(d, a, &ctx.slug)
                    ),
                    vec![Value::Text(slug.clone())],
                )
            },
        );
        Ok(format!(
            "COALESCE({}, {})",
            qcol(d, &slug_alias, &ctx.value),
            default_value
        ))
    }

    // ========================================================================
    // Clauses
    // ========================================================================

    fn where_sql(&mut self, cond: &Condition, params: &mut Vec<Value>) -> Result<String> {
        let mut sql = String::new();
        for (i, p) in cond.predicates().iter().enumerate() {
            if i > 0 {
                sql.push(' ');
                sql.push_str(p.combinator.as_str());
                sql.push(' ');
            }
            if p.negated {
                sql.push_str("NOT ");
            }
            match &p.term {
                Term::Leaf {
                    path,
                    operator,
                    arg,
                } => {
                    let leaf = self.leaf_sql(path, *operator, arg.clone(), params)?;
                    sql.push_str(&leaf);
                }
                Term::Group(group) => {
                    let inner = self.where_sql(group, params)?;
                    sql.push('(');
                    sql.push_str(&inner);
                    sql.push(')');
                }
            }
        }
        Ok(sql)
    }

    fn leaf_sql(
        &mut self,
        path: &str,
        op: Operator,
        arg: Value,
        params: &mut Vec<Value>,
    ) -> Result<String> {
        let resolved = self.resolve(path)?;
        let field_type = resolved.field.field_type;
        let relational = field_type.is_relation();
        let e = resolved.expr;

        if op.is_multi() {
            let items: Vec<Value> = if relational {
                arg.to_ids()
                    .ok_or_else(|| Error::Type(TypeError::new("ids", arg.type_name())))?
                    .into_iter()
                    .map(Value::Int)
                    .collect()
            } else {
                arg.to_list()
            };
            if items.is_empty() {
                return Ok(if op == Operator::In { "1 = 0" } else { "1 = 1" }.to_string());
            }
            let marks = vec!["?"; items.len()].join(", ");
            params.extend(items);
            return Ok(format!("{} {} ({})", e, self.dialect.operator_sql(op), marks));
        }

        let equality = matches!(op, Operator::Equals | Operator::NotEquals);
        if equality && relational {
            if arg.is_empty_relation() {
                return Ok(if op == Operator::Equals {
                    format!("{} IS NULL", e)
                } else {
                    format!("{} IS NOT NULL", e)
                });
            }
            if let Value::Ids(ids) = &arg {
                if ids.len() > 1 {
                    let multi = if op == Operator::Equals {
                        Operator::In
                    } else {
                        Operator::NotIn
                    };
                    let marks = vec!["?"; ids.len()].join(", ");
                    params.extend(ids.iter().map(|id| Value::Int(*id)));
                    return Ok(format!(
                        "{} {} ({})",
                        e,
                        self.dialect.operator_sql(multi),
                        marks
                    ));
                }
            }
        }
        if equality && !relational && arg.is_empty_like() {
            let zero = field_type.zero_value();
            if zero.is_null() {
                return Ok(if op == Operator::Equals {
                    format!("{} IS NULL", e)
                } else {
                    format!("{} IS NOT NULL", e)
                });
            }
            params.push(zero);
            return Ok(if op == Operator::Equals {
                format!("({} IS NULL OR {} = ?)", e, e)
            } else {
                format!("({} IS NOT NULL AND {} != ?)", e, e)
            });
        }

        let arg = match arg {
            Value::Ids(ids) if relational && ids.len() == 1 => Value::Int(ids[0]),
            other => other,
        };
        params.push(self.dialect.operator_arg(op, arg));
        Ok(format!("{} {} ?", e, self.dialect.operator_sql(op)))
    }

    fn order_exprs(&mut self, order: &[OrderBy]) -> Result<Vec<(String, bool)>> {
        if order.is_empty() {
            return Ok(vec![(self.root_id(), false)]);
        }
        order
            .iter()
            .map(|o| Ok((self.resolve(&o.path)?.expr, o.descending)))
            .collect()
    }

    fn order_clause(exprs: &[(String, bool)]) -> String {
        exprs
            .iter()
            .map(|(e, desc)| format!("{} {}", e, if *desc { "DESC" } else { "ASC" }))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn finish(&self, sql: &str, params: Vec<Value>, columns: Vec<String>) -> SelectStatement {
        tracing::trace!(
            target: "bizorm::sql",
            model = %self.model,
            joins = self.plan.joins().len(),
            params = params.len(),
            "built select"
        );
        SelectStatement {
            sql: rebind(sql, self.dialect),
            params,
            columns,
            substitutions: self.plan.substitutions().clone(),
        }
    }

    fn where_part(&mut self, cond: &Condition, params: &mut Vec<Value>) -> Result<String> {
        if cond.is_empty() {
            return Ok(String::new());
        }
        Ok(format!(" WHERE {}", self.where_sql(cond, params)?))
    }

    // ========================================================================
    // Statements
    // ========================================================================

    /// Ids matching the query, in order, with paging applied.
    pub fn select_ids(mut self, query: &Query) -> Result<SelectStatement> {
        let mut where_params = Vec::new();
        let where_sql = self.where_part(&query.condition, &mut where_params)?;
        let order = self.order_exprs(&query.order)?;
        let d = self.dialect;
        let id = self.root_id();

        let mut select = vec![format!("{} AS {}", id, d.quote_identifier("id"))];
        let mut columns = vec!["id".to_string()];
        for (i, (e, _)) in order.iter().enumerate() {
            if *e != id {
                let alias = format!("o{}", i);
                select.push(format!("{} AS {}", e, d.quote_identifier(&alias)));
                columns.push(alias);
            }
        }

        let (from, mut params) = self.plan.from_clause(d);
        params.extend(where_params);
        let sql = format!(
            "SELECT DISTINCT {} {}{} ORDER BY {}{}",
            select.join(", "),
            from,
            where_sql,
            Self::order_clause(&order),
            d.limit_offset(query.limit, query.offset)
        );
        Ok(self.finish(&sql, params, columns))
    }

    /// One id per group of `query.group_by`: the first record of each group
    /// in query order, ranked with `ROW_NUMBER()`.
    pub fn select_ids_grouped(mut self, query: &Query) -> Result<SelectStatement> {
        let mut where_params = Vec::new();
        let where_sql = self.where_part(&query.condition, &mut where_params)?;
        let order = self.order_exprs(&query.order)?;
        let groups = query
            .group_by
            .iter()
            .map(|g| Ok(self.resolve(g)?.expr))
            .collect::<Result<Vec<_>>>()?;
        let d = self.dialect;
        let id = self.root_id();

        let partition = if groups.is_empty() {
            String::new()
        } else {
            format!("PARTITION BY {} ", groups.join(", "))
        };
        let mut inner = vec![
            format!("{} AS {}", id, d.quote_identifier("id")),
            format!(
                "ROW_NUMBER() OVER ({}ORDER BY {}) AS {}",
                partition,
                Self::order_clause(&order),
                d.quote_identifier("group_rank")
            ),
        ];
        let mut outer_order = Vec::new();
        for (i, (e, desc)) in order.iter().enumerate() {
            let alias = format!("o{}", i);
            inner.push(format!("{} AS {}", e, d.quote_identifier(&alias)));
            outer_order.push((qcol(d, "ranked", &alias), *desc));
        }

        let (from, mut params) = self.plan.from_clause(d);
        params.extend(where_params);
        let sql = format!(
            "SELECT {} FROM (SELECT {} {}{}) AS {} WHERE {} = 1 ORDER BY {}{}",
            qcol(d, "ranked", "id"),
            inner.join(", "),
            from,
            where_sql,
            d.quote_identifier("ranked"),
            qcol(d, "ranked", "group_rank"),
            Self::order_clause(&outer_order),
            d.limit_offset(query.limit, query.offset)
        );
        Ok(self.finish(&sql, params, vec!["id".to_string()]))
    }

    /// `id` plus the given paths for the rows matching `condition`.
    pub fn select_fields(mut self, paths: &[String], condition: &Condition) -> Result<SelectStatement> {
        let d = self.dialect;
        let mut select = vec![format!("{} AS {}", self.root_id(), d.quote_identifier("id"))];
        let mut columns = vec!["id".to_string()];
        for path in paths {
            let resolved = self.resolve(path)?;
            if resolved.json_path == "id" || columns.contains(&resolved.json_path) {
                continue;
            }
            let alias = self.plan.short_alias(resolved.json_path.replace('.', "__"));
            select.push(format!("{} AS {}", resolved.expr, d.quote_identifier(&alias)));
            columns.push(resolved.json_path);
        }
        let mut where_params = Vec::new();
        let where_sql = self.where_part(condition, &mut where_params)?;
        let (from, mut params) = self.plan.from_clause(d);
        params.extend(where_params);
        let sql = format!("SELECT {} {}{}", select.join(", "), from, where_sql);
        Ok(self.finish(&sql, params, columns))
    }

    /// Number of distinct records matching `condition`.
    pub fn count(mut self, condition: &Condition) -> Result<SelectStatement> {
        let mut where_params = Vec::new();
        let where_sql = self.where_part(condition, &mut where_params)?;
        let d = self.dialect;
        let (from, mut params) = self.plan.from_clause(d);
        params.extend(where_params);
        let sql = format!(
            "SELECT COUNT(DISTINCT {}) AS {} {}{}",
            self.root_id(),
            d.quote_identifier("count"),
            from,
            where_sql
        );
        Ok(self.finish(&sql, params, vec!["count".to_string()]))
    }

    /// Aggregates per group of `query.group_by`.
    ///
    /// Columns are the group paths, then `__count`, then one column per
    /// aggregate named after its path.
    pub fn read_group(mut self, query: &Query, aggregates: &[Aggregate]) -> Result<SelectStatement> {
        let d = self.dialect;
        let mut where_params = Vec::new();
        let where_sql = self.where_part(&query.condition, &mut where_params)?;

        let mut select = Vec::new();
        let mut columns = Vec::new();
        let mut group_exprs = Vec::new();
        for g in &query.group_by {
            let resolved = self.resolve(g)?;
            let alias = self
                .plan
                .short_alias(format!("g__{}", resolved.json_path.replace('.', "__")));
            select.push(format!("{} AS {}", resolved.expr, d.quote_identifier(&alias)));
            columns.push(resolved.json_path);
            group_exprs.push(resolved.expr);
        }
        select.push(format!(
            "COUNT(DISTINCT {}) AS {}",
            self.root_id(),
            d.quote_identifier("__count")
        ));
        columns.push("__count".to_string());
        for (i, agg) in aggregates.iter().enumerate() {
            let resolved = self.resolve(&agg.path)?;
            select.push(format!(
                "{}({}) AS {}",
                agg.func.as_sql(),
                resolved.expr,
                d.quote_identifier(&format!("a{}", i))
            ));
            columns.push(resolved.json_path);
        }

        let mut order = Vec::new();
        for o in &query.order {
            let expr = self.resolve(&o.path)?.expr;
            if group_exprs.contains(&expr) {
                order.push((expr, o.descending));
            }
        }
        if order.is_empty() {
            order = group_exprs.iter().map(|e| (e.clone(), false)).collect();
        }

        let (from, mut params) = self.plan.from_clause(d);
        params.extend(where_params);
        let mut sql = format!("SELECT {} {}{}", select.join(", "), from, where_sql);
        if !group_exprs.is_empty() {
            sql.push_str(&format!(" GROUP BY {}", group_exprs.join(", ")));
            sql.push_str(&format!(" ORDER BY {}", Self::order_clause(&order)));
        }
        sql.push_str(&d.limit_offset(query.limit, query.offset));
        Ok(self.finish(&sql, params, columns))
    }
}
