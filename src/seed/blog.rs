use crate::model::{Catalog, EntityModel, PivotDef, RelationDef};

/// Blog domain used by the binary and the integration tests.
///
/// - post: belongs to an author, owns comments and a polymorphic image,
///   and is a member of categories
/// - comment: ordered by `position`, may reply through `child_comments`
/// - author: owns one profile
/// - image: points back at its owner through `imageable`
pub fn blog_catalog() -> Catalog {
    Catalog::new()
        .with(
            EntityModel::new("post", "posts")
                .fields(["title", "notes"])
                .rule("title", "required|string|max:255|unique")
                .rule("notes", "nullable|string")
                .syncable(["comments"])
                .with_timestamps()
                .relation(RelationDef::belongs_to("author", "author", "author_id"))
                .relation(RelationDef::has_many("comments", "comment", "post_id"))
                .relation(RelationDef::belongs_to_many(
                    "categories",
                    "category",
                    PivotDef::new("category_post", "post_id", "category_id"),
                ))
                .relation(RelationDef::morph_one(
                    "image",
                    "image",
                    "imageable_id",
                    "imageable_type",
                )),
        )
        .with(
            EntityModel::new("comment", "comments")
                .fields(["comment", "type"])
                .rule("comment", "required|string")
                .rule("type", "nullable|string")
                .order_by("position")
                .with_timestamps()
                .relation(RelationDef::belongs_to("author", "author", "author_id"))
                .relation(RelationDef::has_many("child_comments", "comment", "parent_id")),
        )
        .with(
            EntityModel::new("author", "authors")
                .fields(["name"])
                .rule("name", "required|string")
                .with_timestamps()
                .relation(RelationDef::has_one("profile", "profile", "author_id")),
        )
        .with(
            EntityModel::new("profile", "profiles")
                .fields(["bio"])
                .rule("bio", "nullable|string|max:1000"),
        )
        .with(
            EntityModel::new("category", "categories")
                .fields(["name"])
                .rule("name", "required|string")
                .with_timestamps(),
        )
        .with(
            EntityModel::new("image", "images")
                .fields(["url"])
                .rule("url", "required|string")
                .relation(RelationDef::morph_to(
                    "imageable",
                    "imageable_id",
                    "imageable_type",
                )),
        )
}

/// Tables backing [`blog_catalog`], for stores that need them created.
pub const BLOG_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS authors (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        created_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ
    )",
    "CREATE TABLE IF NOT EXISTS profiles (
        id BIGSERIAL PRIMARY KEY,
        author_id BIGINT NOT NULL REFERENCES authors (id) ON DELETE CASCADE,
        bio TEXT
    )",
    "CREATE TABLE IF NOT EXISTS posts (
        id BIGSERIAL PRIMARY KEY,
        author_id BIGINT REFERENCES authors (id),
        title TEXT NOT NULL,
        notes TEXT,
        created_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ
    )",
    "CREATE TABLE IF NOT EXISTS comments (
        id BIGSERIAL PRIMARY KEY,
        author_id BIGINT REFERENCES authors (id),
        parent_id BIGINT REFERENCES comments (id) ON DELETE CASCADE,
        post_id BIGINT REFERENCES posts (id) ON DELETE CASCADE,
        comment TEXT NOT NULL,
        type TEXT,
        position INTEGER,
        created_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ
    )",
    "CREATE TABLE IF NOT EXISTS categories (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        created_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ
    )",
    "CREATE TABLE IF NOT EXISTS category_post (
        post_id BIGINT NOT NULL REFERENCES posts (id) ON DELETE CASCADE,
        category_id BIGINT NOT NULL REFERENCES categories (id) ON DELETE CASCADE,
        PRIMARY KEY (post_id, category_id)
    )",
    "CREATE TABLE IF NOT EXISTS images (
        id BIGSERIAL PRIMARY KEY,
        url TEXT NOT NULL,
        imageable_id BIGINT,
        imageable_type TEXT
    )",
];

/// Spreadsheet domain with two levels of owned relations (`rows.cells`).
pub fn sheet_catalog() -> Catalog {
    Catalog::new()
        .with(
            EntityModel::new("table", "tables")
                .fields(["name"])
                .syncable(["rows.cells"])
                .relation(RelationDef::has_many("rows", "row", "table_id")),
        )
        .with(
            EntityModel::new("row", "rows")
                .order_by("position")
                .syncable(["cells"])
                .relation(RelationDef::has_many("cells", "cell", "row_id")),
        )
        .with(
            EntityModel::new("cell", "cells")
                .fields(["content", "text", "label"])
                .rule("content", "required_without:text")
                .rule("text", "required_without:content")
                .rule("label", "nullable|unique"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::DescriptorResolver;
    use crate::model::RelationKind;
    use std::sync::Arc;

    #[test]
    fn test_every_blog_relation_classifies() {
        let catalog = Arc::new(blog_catalog());
        let resolver = DescriptorResolver::new(Arc::clone(&catalog));
        let expected = [
            ("post", "author", RelationKind::Reference),
            ("post", "comments", RelationKind::OwnedMany),
            ("post", "categories", RelationKind::ManySet),
            ("post", "image", RelationKind::OwnedSingle),
            ("comment", "author", RelationKind::Reference),
            ("comment", "child_comments", RelationKind::OwnedMany),
            ("author", "profile", RelationKind::OwnedSingle),
            ("image", "imageable", RelationKind::Reference),
        ];
        for (entity_type, relation, kind) in expected {
            assert_eq!(resolver.resolve(entity_type, relation).unwrap().kind, kind);
        }
        assert_eq!(
            catalog.get("post").unwrap().syncable(),
            &["comments".to_string()]
        );
    }

    #[test]
    fn test_sheet_catalog_nests_owned_relations() {
        let catalog = Arc::new(sheet_catalog());
        let resolver = DescriptorResolver::new(catalog);
        assert_eq!(
            resolver.resolve("table", "rows").unwrap().kind,
            RelationKind::OwnedMany
        );
        assert_eq!(
            resolver.resolve("row", "cells").unwrap().kind,
            RelationKind::OwnedMany
        );
    }
}
