//! In-memory metadata for statement tests.

use std::collections::HashMap;

use bizorm_core::{ContextLink, FieldMeta, FieldType, LinkMeta, MetaView};

pub(crate) struct TestMeta {
    tables: HashMap<String, String>,
    fields: HashMap<String, Vec<FieldMeta>>,
}

fn relation(model: &str, name: &str, json: &str, ft: FieldType, target: &str) -> FieldMeta {
    let mut f = FieldMeta::new(model, name, json, ft);
    f.target = Some(target.to_string());
    f
}

impl TestMeta {
    /// User ─m2o→ Profile, User ─o2m→ Post, User ─m2m─ Tag, plus a related
    /// and a contexted field on User.
    pub(crate) fn sample() -> Self {
        let mut meta = Self {
            tables: HashMap::new(),
            fields: HashMap::new(),
        };
        for (model, table) in [
            ("User", "user"),
            ("Profile", "profile"),
            ("Post", "post"),
            ("Tag", "tag"),
            ("TagUserRel", "tag_user_rel"),
            ("UserBioContext", "user_bio_context"),
        ] {
            meta.tables.insert(model.to_string(), table.to_string());
        }

        let mut profile_age = FieldMeta::new("User", "ProfileAge", "profile_age", FieldType::Integer);
        profile_age.stored = false;
        profile_age.related_path = Some("Profile.Age".to_string());

        let mut posts = relation("User", "Posts", "posts_ids", FieldType::One2Many, "Post");
        posts.reverse_fk = Some("user_id".to_string());

        let mut tags = relation("User", "Tags", "tags_ids", FieldType::Many2Many, "Tag");
        tags.link = Some(LinkMeta {
            model: "TagUserRel".to_string(),
            ours: "user_id".to_string(),
            theirs: "tag_id".to_string(),
        });

        let mut bio = FieldMeta::new("User", "Bio", "bio", FieldType::Char);
        bio.stored = false;
        bio.contexts = Some(ContextLink {
            model: "UserBioContext".to_string(),
            record: "record_id".to_string(),
            slug: "context_slug".to_string(),
            value: "bio".to_string(),
        });

        meta.fields.insert(
            "User".to_string(),
            vec![
                FieldMeta::new("User", "Name", "name", FieldType::Char),
                FieldMeta::new("User", "Age", "age", FieldType::Integer),
                FieldMeta::new("User", "Active", "active", FieldType::Boolean),
                relation("User", "Profile", "profile_id", FieldType::Many2One, "Profile"),
                profile_age,
                posts,
                tags,
                bio,
            ],
        );
        meta.fields.insert(
            "Profile".to_string(),
            vec![
                FieldMeta::new("Profile", "Age", "age", FieldType::Integer),
                FieldMeta::new("Profile", "City", "city", FieldType::Char),
            ],
        );
        meta.fields.insert(
            "Post".to_string(),
            vec![
                FieldMeta::new("Post", "Title", "title", FieldType::Char),
                relation("Post", "User", "user_id", FieldType::Many2One, "User"),
            ],
        );

        let mut users = relation("Tag", "Users", "users_ids", FieldType::Many2Many, "User");
        users.link = Some(LinkMeta {
            model: "TagUserRel".to_string(),
            ours: "tag_id".to_string(),
            theirs: "user_id".to_string(),
        });
        meta.fields.insert(
            "Tag".to_string(),
            vec![FieldMeta::new("Tag", "Name", "name", FieldType::Char), users],
        );
        meta
    }
}

impl MetaView for TestMeta {
    fn table_name(&self, model: &str) -> Option<&str> {
        self.tables.get(model).map(String::as_str)
    }

    fn field_meta(&self, model: &str, field: &str) -> Option<&FieldMeta> {
        self.fields
            .get(model)?
            .iter()
            .find(|f| f.name == field || f.json == field)
    }

    fn model_fields(&self, model: &str) -> Vec<&FieldMeta> {
        self.fields
            .get(model)
            .map(|fs| fs.iter().collect())
            .unwrap_or_default()
    }
}
