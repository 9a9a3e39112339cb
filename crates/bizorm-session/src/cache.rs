//! Per-transaction record cache.
//!
//! Values are stored per model, record id, field storage name and context
//! slug. Relation fields are not stored as lists:
//!
//! - many-to-one values are plain ids;
//! - one-to-many and reverse one-to-one values are derived by scanning the
//!   cached rows of the target model for the reverse key, once the owner
//!   has been marked as loaded for that field;
//! - many-to-many values are derived from a pair-set per link model, pairs
//!   kept in the canonical order given by [`LinkMeta::pair`].
//!
//! Writing a relation fans out to the other side, so both sides always read
//! the same links. The cache is owned by one environment and is not shared
//! between threads.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use bizorm_core::{FieldMap, FieldMeta, FieldType, LinkMeta, MetaView, Value};

/// Slug of default (context-independent) values.
pub const DEFAULT_SLUG: &str = "";

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Value(Value),
    /// The x2many relation of this record is completely known.
    Loaded,
}

/// storage name → slug → slot
type Fields = HashMap<String, HashMap<String, Slot>>;

#[derive(Debug, Clone, Default)]
pub struct Cache {
    records: HashMap<String, HashMap<i64, Fields>>,
    links: HashMap<String, HashSet<(i64, i64)>>,
}

fn is_id(field: &str) -> bool {
    field == "id" || field == "ID"
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, model: &str, id: i64, json: &str, slug: &str) -> Option<&Slot> {
        self.records
            .get(model)?
            .get(&id)?
            .get(json)?
            .get(slug)
    }

    fn row_mut(&mut self, model: &str, id: i64) -> &mut Fields {
        self.records
            .entry(model.to_string())
            .or_default()
            .entry(id)
            .or_default()
    }

    fn put(&mut self, model: &str, id: i64, json: &str, slug: &str, slot: Slot) {
        self.row_mut(model, id)
            .entry(json.to_string())
            .or_default()
            .insert(slug.to_string(), slot);
    }

    fn clear_field(&mut self, model: &str, id: i64, json: &str) {
        if let Some(row) = self.records.get_mut(model).and_then(|rows| rows.get_mut(&id)) {
            row.remove(json);
        }
    }

    pub fn has_record(&self, model: &str, id: i64) -> bool {
        self.records
            .get(model)
            .is_some_and(|rows| rows.contains_key(&id))
    }

    /// Ids of the cached records of `model`, ascending.
    pub fn record_ids(&self, model: &str) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .records
            .get(model)
            .map(|rows| rows.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Cached records of `target` whose `fk` points at `id`, ascending.
    fn referencing(&self, target: &str, fk: &str, id: i64) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .records
            .get(target)
            .map(|rows| {
                rows.iter()
                    .filter(|(_, fields)| {
                        fields.get(fk).and_then(|s| s.get(DEFAULT_SLUG))
                            == Some(&Slot::Value(Value::Int(id)))
                    })
                    .map(|(rid, _)| *rid)
                    .collect()
            })
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Ids linked to `id` through `link`, ascending.
    fn linked(&self, link: &LinkMeta, id: i64) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .links
            .get(&link.model)
            .map(|pairs| {
                pairs
                    .iter()
                    .map(|p| link.split(*p))
                    .filter(|(ours, _)| *ours == id)
                    .map(|(_, theirs)| theirs)
                    .collect()
            })
            .unwrap_or_default();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Value of `path` (field name, storage name or dotted path) for record
    /// `id`, or `None` when the cache does not know it.
    ///
    /// A value missing under `slug` falls back to the default slug.
    pub fn get(&self, meta: &dyn MetaView, model: &str, id: i64, path: &str, slug: &str) -> Option<Value> {
        self.lookup(meta, model, id, path, slug, false)
    }

    fn lookup(
        &self,
        meta: &dyn MetaView,
        model: &str,
        id: i64,
        path: &str,
        slug: &str,
        strict: bool,
    ) -> Option<Value> {
        let parts: Vec<&str> = path.split('.').collect();
        let mut model = model.to_string();
        let mut id = id;
        for (i, part) in parts.iter().enumerate() {
            let value = self.field_value(meta, &model, id, part, slug, strict)?;
            if i + 1 == parts.len() {
                return Some(value);
            }
            let fm = meta.field_meta(&model, part)?;
            if !(fm.field_type.is_fk_relation() || fm.field_type == FieldType::Rev2One) {
                return None;
            }
            match value.as_i64() {
                Some(next) if next != 0 => {
                    model = fm.target.clone()?;
                    id = next;
                }
                _ => return Some(Value::Null),
            }
        }
        None
    }

    fn field_value(
        &self,
        meta: &dyn MetaView,
        model: &str,
        id: i64,
        field: &str,
        slug: &str,
        strict: bool,
    ) -> Option<Value> {
        if is_id(field) {
            return self.has_record(model, id).then_some(Value::Int(id));
        }
        let fm = meta.field_meta(model, field)?;
        if let Some(related) = &fm.related_path {
            return self.lookup(meta, model, id, related, slug, strict);
        }
        match fm.field_type {
            FieldType::One2Many | FieldType::Rev2One => {
                if self.slot(model, id, &fm.json, DEFAULT_SLUG) != Some(&Slot::Loaded) {
                    return None;
                }
                let ids = self.referencing(fm.target.as_deref()?, fm.reverse_fk.as_deref()?, id);
                Some(if fm.field_type == FieldType::Rev2One {
                    ids.first().map_or(Value::Null, |child| Value::Int(*child))
                } else {
                    Value::Ids(ids)
                })
            }
            FieldType::Many2Many => {
                if self.slot(model, id, &fm.json, DEFAULT_SLUG) != Some(&Slot::Loaded) {
                    return None;
                }
                Some(Value::Ids(self.linked(fm.link.as_ref()?, id)))
            }
            _ => {
                let slug = if fm.is_contexted() { slug } else { DEFAULT_SLUG };
                match self.slot(model, id, &fm.json, slug) {
                    Some(Slot::Value(v)) => Some(v.clone()),
                    Some(Slot::Loaded) => None,
                    None if !strict && !slug.is_empty() => {
                        match self.slot(model, id, &fm.json, DEFAULT_SLUG) {
                            Some(Slot::Value(v)) => Some(v.clone()),
                            _ => None,
                        }
                    }
                    None => None,
                }
            }
        }
    }

    /// True when every id has every field cached.
    ///
    /// With `strict`, contexted fields must be known for `slug` itself; the
    /// default value does not count.
    pub fn check_if_in_cache(
        &self,
        meta: &dyn MetaView,
        model: &str,
        ids: &[i64],
        fields: &[String],
        slug: &str,
        strict: bool,
    ) -> bool {
        ids.iter().all(|id| {
            fields
                .iter()
                .all(|f| self.lookup(meta, model, *id, f, slug, strict).is_some())
        })
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Records that `id` exists and stores the given values.
    pub fn add_record(
        &mut self,
        meta: &dyn MetaView,
        model: &str,
        id: i64,
        values: &FieldMap,
        slug: &str,
    ) {
        self.row_mut(model, id);
        for (path, value) in values.iter() {
            self.update_entry(meta, model, id, path, value.clone(), slug);
        }
    }

    /// Stores `value` at `path` of record `id`, walking many-to-one hops
    /// through cached ids. Returns false when the path could not be
    /// followed (unknown field or intermediate record not cached).
    pub fn update_entry(
        &mut self,
        meta: &dyn MetaView,
        model: &str,
        id: i64,
        path: &str,
        value: Value,
        slug: &str,
    ) -> bool {
        let parts: Vec<&str> = path.split('.').collect();
        let Some((last, hops)) = parts.split_last() else {
            return false;
        };
        let mut model = model.to_string();
        let mut id = id;
        for hop in hops {
            let Some(fm) = meta.field_meta(&model, hop) else {
                return false;
            };
            let next = self
                .field_value(meta, &model, id, hop, slug, false)
                .and_then(|v| v.as_i64());
            let (Some(next), Some(target)) = (next, fm.target.clone()) else {
                return false;
            };
            if next == 0 {
                return false;
            }
            model = target;
            id = next;
        }
        self.set_field(meta, &model, id, last, value, slug)
    }

    fn set_field(
        &mut self,
        meta: &dyn MetaView,
        model: &str,
        id: i64,
        field: &str,
        value: Value,
        slug: &str,
    ) -> bool {
        if is_id(field) {
            self.row_mut(model, id);
            return true;
        }
        let Some(fm) = meta.field_meta(model, field) else {
            return false;
        };
        if let Some(related) = &fm.related_path {
            return self.update_entry(meta, model, id, related, value, slug);
        }
        self.row_mut(model, id);
        match fm.field_type {
            FieldType::One2Many | FieldType::Rev2One => {
                let (Some(target), Some(fk)) = (fm.target.as_deref(), fm.reverse_fk.as_deref())
                else {
                    return false;
                };
                let children = value.to_ids().unwrap_or_default();
                for old in self.referencing(target, fk, id) {
                    if !children.contains(&old) {
                        self.put(target, old, fk, DEFAULT_SLUG, Slot::Value(Value::Null));
                    }
                }
                for child in &children {
                    self.put(target, *child, fk, DEFAULT_SLUG, Slot::Value(Value::Int(id)));
                }
                self.put(model, id, &fm.json, DEFAULT_SLUG, Slot::Loaded);
            }
            FieldType::Many2Many => {
                let Some(link) = &fm.link else {
                    return false;
                };
                let targets = value.to_ids().unwrap_or_default();
                let pairs = self.links.entry(link.model.clone()).or_default();
                pairs.retain(|p| link.split(*p).0 != id);
                for target in targets {
                    pairs.insert(link.pair(id, target));
                }
                self.put(model, id, &fm.json, DEFAULT_SLUG, Slot::Loaded);
            }
            FieldType::Many2One | FieldType::One2One => {
                let target = match value.to_ids() {
                    Some(ids) if ids.len() == 1 => Value::Int(ids[0]),
                    _ => Value::Null,
                };
                self.put(model, id, &fm.json, DEFAULT_SLUG, Slot::Value(target));
            }
            _ => {
                let slug = if fm.is_contexted() { slug } else { DEFAULT_SLUG };
                self.put(model, id, &fm.json, slug, Slot::Value(value));
            }
        }
        true
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Drops everything cached for record `id`, including its links.
    ///
    /// Other records may still hold stale references to it until reloaded.
    pub fn invalidate_record(&mut self, meta: &dyn MetaView, model: &str, id: i64) {
        let fields = meta.model_fields(model);
        let row = self.records.get_mut(model).and_then(|rows| rows.remove(&id));

        if let Some(row) = row {
            // parents listing this record lose their "complete" marker
            for fm in fields.iter().filter(|f| f.field_type.is_fk_relation()) {
                let parent = match row.get(&fm.json).and_then(|s| s.get(DEFAULT_SLUG)) {
                    Some(Slot::Value(Value::Int(parent))) => *parent,
                    _ => continue,
                };
                let Some(target) = fm.target.as_deref() else {
                    continue;
                };
                for reverse in reverse_fields(meta, target, model, &fm.json) {
                    self.clear_field(target, parent, &reverse);
                }
            }
        }
        for fm in fields.iter().filter(|f| f.field_type == FieldType::Many2Many) {
            self.drop_links(meta, fm, id);
        }
    }

    /// Drops one field of record `id`.
    pub fn remove_entry(&mut self, meta: &dyn MetaView, model: &str, id: i64, field: &str) {
        let Some(fm) = meta.field_meta(model, field) else {
            return;
        };
        if fm.field_type == FieldType::Many2Many {
            self.drop_links(meta, fm, id);
        }
        self.clear_field(model, id, &fm.json);
    }

    fn drop_links(&mut self, meta: &dyn MetaView, fm: &FieldMeta, id: i64) {
        let Some(link) = &fm.link else {
            return;
        };
        let others = self.linked(link, id);
        if let Some(pairs) = self.links.get_mut(&link.model) {
            pairs.retain(|p| link.split(*p).0 != id);
        }
        let Some(target) = fm.target.as_deref() else {
            return;
        };
        let reverse: Vec<String> = meta
            .model_fields(target)
            .into_iter()
            .filter(|g| {
                g.link
                    .as_ref()
                    .is_some_and(|l| l.model == link.model && l.ours == link.theirs)
            })
            .map(|g| g.json.clone())
            .collect();
        for other in others {
            for json in &reverse {
                self.clear_field(target, other, json);
            }
        }
    }

    /// After deleting `ids` of `model`: drops every cached record pointing
    /// at them and every link touching them.
    pub fn invalidate_references(&mut self, meta: &dyn MetaView, model: &str, ids: &[i64]) {
        tracing::trace!(model, ids = ?ids, "Invalidating references");
        let deleted: HashSet<i64> = ids.iter().copied().collect();
        let models: Vec<String> = self.records.keys().cloned().collect();
        for other in &models {
            for fm in meta.model_fields(other) {
                if fm.target.as_deref() != Some(model) {
                    continue;
                }
                if fm.field_type.is_fk_relation() {
                    let stale: Vec<i64> = self
                        .records
                        .get(other)
                        .map(|rows| {
                            rows.iter()
                                .filter(|(_, f)| {
                                    matches!(
                                        f.get(&fm.json).and_then(|s| s.get(DEFAULT_SLUG)),
                                        Some(Slot::Value(Value::Int(t))) if deleted.contains(t)
                                    )
                                })
                                .map(|(rid, _)| *rid)
                                .collect()
                        })
                        .unwrap_or_default();
                    for rid in stale {
                        self.invalidate_record(meta, other, rid);
                    }
                } else if let Some(link) = &fm.link {
                    if let Some(pairs) = self.links.get_mut(&link.model) {
                        pairs.retain(|p| !deleted.contains(&link.split(*p).1));
                    }
                }
            }
        }
    }

    pub fn invalidate_all(&mut self) {
        tracing::debug!(models = self.records.len(), "Invalidating whole cache");
        self.records.clear();
        self.links.clear();
    }

    /// Human-readable dump, sorted, for debugging and test failures.
    pub fn debug_state(&self) -> String {
        let mut out = String::new();
        let mut models: Vec<&String> = self.records.keys().collect();
        models.sort();
        for model in models {
            let rows = &self.records[model];
            let mut ids: Vec<&i64> = rows.keys().collect();
            ids.sort();
            for id in ids {
                let _ = write!(out, "{}({}):", model, id);
                let mut fields: Vec<(&String, &HashMap<String, Slot>)> = rows[id].iter().collect();
                fields.sort_by(|a, b| a.0.cmp(b.0));
                for (json, slots) in fields {
                    let mut slugs: Vec<(&String, &Slot)> = slots.iter().collect();
                    slugs.sort_by(|a, b| a.0.cmp(b.0));
                    for (slug, slot) in slugs {
                        let shown = match slot {
                            Slot::Value(v) => v.to_string(),
                            Slot::Loaded => "<loaded>".to_string(),
                        };
                        if slug.is_empty() {
                            let _ = write!(out, " {}={}", json, shown);
                        } else {
                            let _ = write!(out, " {}[{}]={}", json, slug, shown);
                        }
                    }
                }
                out.push('\n');
            }
        }
        let mut links: Vec<&String> = self.links.keys().collect();
        links.sort();
        for link in links {
            let mut pairs: Vec<&(i64, i64)> = self.links[link].iter().collect();
            pairs.sort();
            let _ = writeln!(out, "{}: {:?}", link, pairs);
        }
        out
    }
}

/// One-to-many / reverse one-to-one fields of `target` mirroring the
/// many-to-one `fk` of `model`.
fn reverse_fields(meta: &dyn MetaView, target: &str, model: &str, fk: &str) -> Vec<String> {
    meta.model_fields(target)
        .into_iter()
        .filter(|g| {
            g.field_type.is_reverse_relation()
                && g.target.as_deref() == Some(model)
                && g.reverse_fk.as_deref() == Some(fk)
        })
        .map(|g| g.json.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bizorm_core::ContextLink;

    struct Meta {
        fields: Vec<FieldMeta>,
    }

    fn rel(model: &str, name: &str, json: &str, ft: FieldType, target: &str) -> FieldMeta {
        let mut f = FieldMeta::new(model, name, json, ft);
        f.target = Some(target.to_string());
        f
    }

    impl Meta {
        fn new() -> Self {
            let mut posts = rel("User", "Posts", "posts_ids", FieldType::One2Many, "Post");
            posts.reverse_fk = Some("user_id".into());
            let mut tags = rel("User", "Tags", "tags_ids", FieldType::Many2Many, "Tag");
            tags.link = Some(LinkMeta {
                model: "TagUserRel".into(),
                ours: "user_id".into(),
                theirs: "tag_id".into(),
            });
            let mut users = rel("Tag", "Users", "users_ids", FieldType::Many2Many, "User");
            users.link = Some(LinkMeta {
                model: "TagUserRel".into(),
                ours: "tag_id".into(),
                theirs: "user_id".into(),
            });
            let mut age = FieldMeta::new("User", "ProfileAge", "profile_age", FieldType::Integer);
            age.stored = false;
            age.related_path = Some("Profile.Age".into());
            let mut bio = FieldMeta::new("User", "Bio", "bio", FieldType::Char);
            bio.contexts = Some(ContextLink {
                model: "UserBioContext".into(),
                record: "record_id".into(),
                slug: "context_slug".into(),
                value: "bio".into(),
            });
            Self {
                fields: vec![
                    FieldMeta::new("User", "Name", "name", FieldType::Char),
                    rel("User", "Profile", "profile_id", FieldType::Many2One, "Profile"),
                    posts,
                    tags,
                    age,
                    bio,
                    FieldMeta::new("Profile", "Age", "age", FieldType::Integer),
                    FieldMeta::new("Post", "Title", "title", FieldType::Char),
                    rel("Post", "User", "user_id", FieldType::Many2One, "User"),
                    FieldMeta::new("Tag", "Name", "name", FieldType::Char),
                    users,
                ],
            }
        }
    }

    impl MetaView for Meta {
        fn table_name(&self, _model: &str) -> Option<&str> {
            None
        }

        fn field_meta(&self, model: &str, field: &str) -> Option<&FieldMeta> {
            self.fields
                .iter()
                .find(|f| f.model == model && (f.name == field || f.json == field))
        }

        fn model_fields(&self, model: &str) -> Vec<&FieldMeta> {
            self.fields.iter().filter(|f| f.model == model).collect()
        }
    }

    fn values(pairs: &[(&str, Value)]) -> FieldMap {
        pairs
            .iter()
            .fold(FieldMap::new(), |map, (k, v)| map.with(*k, v.clone()))
    }

    #[test]
    fn test_scalar_and_path_reads() {
        let meta = Meta::new();
        let mut cache = Cache::new();
        cache.add_record(&meta, "Profile", 7, &values(&[("age", Value::Int(30))]), "");
        cache.add_record(
            &meta,
            "User",
            1,
            &values(&[("name", Value::from("Jane")), ("profile_id", Value::Int(7))]),
            "",
        );
        assert_eq!(cache.get(&meta, "User", 1, "Name", ""), Some(Value::from("Jane")));
        assert_eq!(cache.get(&meta, "User", 1, "Profile.Age", ""), Some(Value::Int(30)));
        assert_eq!(cache.get(&meta, "User", 1, "ProfileAge", ""), Some(Value::Int(30)));
        assert_eq!(cache.get(&meta, "User", 1, "ID", ""), Some(Value::Int(1)));
        assert_eq!(cache.get(&meta, "User", 2, "Name", ""), None);

        // writing through a path lands on the profile
        assert!(cache.update_entry(&meta, "User", 1, "profile_id.age", Value::Int(31), ""));
        assert_eq!(cache.get(&meta, "Profile", 7, "Age", ""), Some(Value::Int(31)));
    }

    #[test]
    fn test_null_many2one_path_reads_null() {
        let meta = Meta::new();
        let mut cache = Cache::new();
        cache.add_record(&meta, "User", 1, &values(&[("profile_id", Value::Null)]), "");
        assert_eq!(cache.get(&meta, "User", 1, "Profile.Age", ""), Some(Value::Null));
        assert!(!cache.update_entry(&meta, "User", 1, "profile_id.age", Value::Int(1), ""));
    }

    #[test]
    fn test_one2many_is_derived_from_children() {
        let meta = Meta::new();
        let mut cache = Cache::new();
        cache.update_entry(&meta, "User", 1, "Posts", Value::Ids(vec![11, 10]), "");
        assert_eq!(cache.get(&meta, "User", 1, "Posts", ""), Some(Value::Ids(vec![10, 11])));
        assert_eq!(cache.get(&meta, "Post", 10, "User", ""), Some(Value::Int(1)));

        // moving a post to another user updates both lists
        cache.update_entry(&meta, "User", 2, "Posts", Value::Ids(vec![]), "");
        cache.update_entry(&meta, "Post", 11, "User", Value::Int(2), "");
        assert_eq!(cache.get(&meta, "User", 1, "Posts", ""), Some(Value::Ids(vec![10])));
        assert_eq!(cache.get(&meta, "User", 2, "Posts", ""), Some(Value::Ids(vec![11])));

        // replacing the list detaches old children
        cache.update_entry(&meta, "User", 1, "Posts", Value::Ids(vec![]), "");
        assert_eq!(cache.get(&meta, "Post", 10, "User", ""), Some(Value::Null));
    }

    #[test]
    fn test_unloaded_one2many_is_a_miss() {
        let meta = Meta::new();
        let mut cache = Cache::new();
        cache.update_entry(&meta, "Post", 10, "User", Value::Int(1), "");
        assert_eq!(cache.get(&meta, "User", 1, "Posts", ""), None);
    }

    #[test]
    fn test_many2many_symmetry() {
        let meta = Meta::new();
        let mut cache = Cache::new();
        cache.update_entry(&meta, "User", 1, "Tags", Value::Ids(vec![5, 6]), "");
        cache.update_entry(&meta, "Tag", 5, "Users", Value::Ids(vec![1, 2]), "");
        assert_eq!(cache.get(&meta, "Tag", 5, "Users", ""), Some(Value::Ids(vec![1, 2])));
        assert_eq!(cache.get(&meta, "User", 1, "Tags", ""), Some(Value::Ids(vec![5, 6])));

        cache.update_entry(&meta, "User", 1, "Tags", Value::Ids(vec![6]), "");
        assert_eq!(cache.get(&meta, "Tag", 5, "Users", ""), Some(Value::Ids(vec![2])));
    }

    #[test]
    fn test_context_slug_falls_back_to_default() {
        let meta = Meta::new();
        let mut cache = Cache::new();
        cache.update_entry(&meta, "User", 1, "Bio", Value::from("hello"), "");
        assert_eq!(cache.get(&meta, "User", 1, "Bio", "lang=fr"), Some(Value::from("hello")));

        let fields = vec!["Bio".to_string()];
        assert!(cache.check_if_in_cache(&meta, "User", &[1], &fields, "lang=fr", false));
        assert!(!cache.check_if_in_cache(&meta, "User", &[1], &fields, "lang=fr", true));

        cache.update_entry(&meta, "User", 1, "Bio", Value::from("salut"), "lang=fr");
        assert_eq!(cache.get(&meta, "User", 1, "Bio", "lang=fr"), Some(Value::from("salut")));
        assert_eq!(cache.get(&meta, "User", 1, "Bio", ""), Some(Value::from("hello")));
        assert!(cache.check_if_in_cache(&meta, "User", &[1], &fields, "lang=fr", true));

        // non-contexted fields ignore the slug
        cache.update_entry(&meta, "User", 1, "Name", Value::from("Jane"), "lang=fr");
        let name = vec!["Name".to_string()];
        assert!(cache.check_if_in_cache(&meta, "User", &[1], &name, "lang=de", true));
    }

    #[test]
    fn test_check_requires_every_id_and_field() {
        let meta = Meta::new();
        let mut cache = Cache::new();
        cache.add_record(&meta, "User", 1, &values(&[("name", Value::from("a"))]), "");
        cache.add_record(&meta, "User", 2, &values(&[("profile_id", Value::Null)]), "");
        let fields = vec!["Name".to_string()];
        assert!(cache.check_if_in_cache(&meta, "User", &[1], &fields, "", false));
        assert!(!cache.check_if_in_cache(&meta, "User", &[1, 2], &fields, "", false));
    }

    #[test]
    fn test_invalidate_record_cleans_links_and_markers() {
        let meta = Meta::new();
        let mut cache = Cache::new();
        cache.update_entry(&meta, "User", 1, "Tags", Value::Ids(vec![5]), "");
        cache.update_entry(&meta, "Tag", 5, "Users", Value::Ids(vec![1]), "");
        cache.update_entry(&meta, "User", 1, "Posts", Value::Ids(vec![10]), "");

        cache.invalidate_record(&meta, "Post", 10);
        assert_eq!(cache.get(&meta, "User", 1, "Posts", ""), None);

        cache.invalidate_record(&meta, "User", 1);
        assert!(!cache.has_record("User", 1));
        assert_eq!(cache.get(&meta, "Tag", 5, "Users", ""), None);
    }

    #[test]
    fn test_remove_entry_and_references() {
        let meta = Meta::new();
        let mut cache = Cache::new();
        cache.add_record(&meta, "User", 1, &values(&[("name", Value::from("a")), ("profile_id", Value::Int(7))]), "");
        cache.add_record(&meta, "User", 2, &values(&[("profile_id", Value::Int(8))]), "");
        cache.remove_entry(&meta, "User", 1, "Name");
        assert_eq!(cache.get(&meta, "User", 1, "Name", ""), None);
        assert_eq!(cache.get(&meta, "User", 1, "Profile", ""), Some(Value::Int(7)));

        cache.invalidate_references(&meta, "Profile", &[7]);
        assert!(!cache.has_record("User", 1));
        assert!(cache.has_record("User", 2));
    }

    #[test]
    fn test_debug_state_is_sorted() {
        let meta = Meta::new();
        let mut cache = Cache::new();
        cache.add_record(&meta, "User", 2, &values(&[("name", Value::from("b"))]), "");
        cache.add_record(&meta, "User", 1, &values(&[("name", Value::from("a"))]), "");
        let state = cache.debug_state();
        let first = state.find("User(1)").unwrap();
        let second = state.find("User(2)").unwrap();
        assert!(first < second);
        cache.invalidate_all();
        assert_eq!(cache.debug_state(), "");
    }
}
