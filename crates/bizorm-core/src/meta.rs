//! Read-only view of model and field metadata.
//!
//! The query builder and the cache only need to know how fields are stored
//! and how relations connect models. [`MetaView`] exposes exactly that; the
//! frozen model catalog implements it.

use crate::types::FieldType;

/// Link model of a many-to-many field, seen from that field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMeta {
    /// Name of the link model.
    pub model: String,
    /// Storage name of the link column pointing at the field's own model.
    pub ours: String,
    /// Storage name of the link column pointing at the target model.
    pub theirs: String,
}

impl LinkMeta {
    /// Whether link pairs for this field are stored as `(our_id, their_id)`.
    ///
    /// Pairs are kept in canonical order, the endpoint whose column name
    /// sorts first coming first, so both sides of a relation read the same
    /// pair-set.
    pub fn ours_first(&self) -> bool {
        self.ours < self.theirs
    }

    /// Canonical pair for a link between `our_id` and `their_id`.
    pub fn pair(&self, our_id: i64, their_id: i64) -> (i64, i64) {
        if self.ours_first() {
            (our_id, their_id)
        } else {
            (their_id, our_id)
        }
    }

    /// Splits a canonical pair into `(our_id, their_id)`.
    pub fn split(&self, pair: (i64, i64)) -> (i64, i64) {
        if self.ours_first() { pair } else { (pair.1, pair.0) }
    }
}

/// Auxiliary storage of a field whose value depends on the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextLink {
    /// Name of the synthesized context-values model.
    pub model: String,
    /// Storage name of the column referencing the owner record.
    pub record: String,
    /// Storage name of the context slug column.
    pub slug: String,
    /// Storage name of the value column.
    pub value: String,
}

/// Storage-level description of one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMeta {
    pub model: String,
    pub name: String,
    /// Storage (column / cache) name.
    pub json: String,
    pub field_type: FieldType,
    /// Whether the field owns a column in the model table.
    pub stored: bool,
    /// Target model of relation fields.
    pub target: Option<String>,
    /// Storage name of the foreign key on the target model for
    /// `One2Many` / `Rev2One` fields.
    pub reverse_fk: Option<String>,
    /// Link model of `Many2Many` fields.
    pub link: Option<LinkMeta>,
    /// Dotted path (field names or storage names) mirrored by a related field.
    pub related_path: Option<String>,
    /// Context-values storage of a contexted field.
    pub contexts: Option<ContextLink>,
}

impl FieldMeta {
    /// Minimal metadata for a plain field.
    pub fn new(model: &str, name: &str, json: &str, field_type: FieldType) -> Self {
        Self {
            model: model.to_string(),
            name: name.to_string(),
            json: json.to_string(),
            field_type,
            stored: field_type.has_column(),
            target: None,
            reverse_fk: None,
            link: None,
            related_path: None,
            contexts: None,
        }
    }

    /// Column name when the field owns a column.
    pub fn column(&self) -> Option<&str> {
        (self.stored && self.field_type.has_column() && self.related_path.is_none())
            .then_some(self.json.as_str())
    }

    pub fn is_related(&self) -> bool {
        self.related_path.is_some()
    }

    pub fn is_contexted(&self) -> bool {
        self.contexts.is_some()
    }
}

/// Lookup of model tables and field metadata.
pub trait MetaView {
    /// Table name of a concrete model.
    fn table_name(&self, model: &str) -> Option<&str>;

    /// Field metadata looked up by declared name or storage name.
    fn field_meta(&self, model: &str, field: &str) -> Option<&FieldMeta>;

    /// Every field of a model (used when scanning for references).
    fn model_fields(&self, model: &str) -> Vec<&FieldMeta>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_pair_is_symmetric() {
        let from_user = LinkMeta {
            model: "TagUserRel".into(),
            ours: "user_id".into(),
            theirs: "tag_id".into(),
        };
        let from_tag = LinkMeta {
            model: "TagUserRel".into(),
            ours: "tag_id".into(),
            theirs: "user_id".into(),
        };
        // user 1 linked to tag 9, seen from both sides
        assert_eq!(from_user.pair(1, 9), from_tag.pair(9, 1));
        assert_eq!(from_user.split(from_user.pair(1, 9)), (1, 9));
        assert_eq!(from_tag.split(from_user.pair(1, 9)), (9, 1));
    }

    #[test]
    fn test_column_only_for_stored_columns() {
        let name = FieldMeta::new("User", "Name", "name", FieldType::Char);
        assert_eq!(name.column(), Some("name"));

        let posts = FieldMeta::new("User", "Posts", "posts_ids", FieldType::One2Many);
        assert_eq!(posts.column(), None);

        let mut age = FieldMeta::new("User", "ProfileAge", "profile_age", FieldType::Integer);
        age.stored = false;
        age.related_path = Some("Profile.Age".into());
        assert_eq!(age.column(), None);
    }
}
