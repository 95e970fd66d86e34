use log::debug;

use crate::error::{SyncError, SyncResult};
use crate::logic::resolver::DescriptorResolver;
use crate::logic::validate::RuleRegistry;
use crate::model::{RelatedType, RelationKind, RelationPathTree, Rule, RuleSet, Syncable};

/// Flattens the declared rules of an entity type and every relation in a
/// [`RelationPathTree`] into one [`RuleSet`] keyed by dotted pattern.
pub struct RuleCompiler<'a> {
    resolver: &'a DescriptorResolver,
    registry: &'a RuleRegistry,
}

impl<'a> RuleCompiler<'a> {
    pub fn new(resolver: &'a DescriptorResolver, registry: &'a RuleRegistry) -> Self {
        Self { resolver, registry }
    }

    pub fn compile(&self, syncable: &dyn Syncable, tree: &RelationPathTree) -> SyncResult<RuleSet> {
        let model = syncable.model();
        let mut set = RuleSet::new();

        // Step 1: the entity's own field rules
        for (field, declared) in syncable.validation_rules() {
            for rule in Rule::parse_list(&declared)? {
                set.push(field.clone(), self.rewrite(rule, &model.name)?);
            }
        }

        // Step 2: one block per relation taking part in this sync
        for (relation, subtree) in tree.relations() {
            let descriptor = self.resolver.resolve(&model.name, relation)?;

            match descriptor.kind {
                RelationKind::OwnedMany | RelationKind::OwnedSingle => {
                    let related = self.resolver.related_model(&descriptor, None)?;
                    let related_model = related.model();
                    let prefix = if descriptor.kind == RelationKind::OwnedMany {
                        set.extend(relation, [Rule::Nullable, Rule::Array]);
                        let prefix = format!("{}.*", relation);
                        set.push(prefix.clone(), Rule::Object);
                        prefix
                    } else {
                        set.extend(relation, [Rule::Nullable, Rule::Object]);
                        relation.to_string()
                    };

                    let nested = self.compile(related.as_ref(), subtree)?;
                    set.merge_prefixed(&prefix, nested);
                    // A blank key marks a new item
                    set.extend(
                        format!("{}.{}", prefix, related_model.primary_key),
                        [
                            Rule::Nullable,
                            Rule::exists(&related_model.name, &related_model.primary_key),
                        ],
                    );
                }
                RelationKind::Reference => {
                    if descriptor.nullable {
                        set.push(relation, Rule::Nullable);
                    }
                    set.push(relation, Rule::Object);
                    // Polymorphic targets are only known per payload item
                    if let RelatedType::Fixed(_) = descriptor.related {
                        let related = self.resolver.related_model(&descriptor, None)?;
                        let related_model = related.model();
                        let presence = if descriptor.nullable {
                            Rule::Nullable
                        } else {
                            Rule::Required
                        };
                        set.extend(
                            format!("{}.{}", relation, related_model.primary_key),
                            [
                                presence,
                                Rule::exists(&related_model.name, &related_model.primary_key),
                            ],
                        );
                    }
                }
                RelationKind::ManySet => {
                    let related = self.resolver.related_model(&descriptor, None)?;
                    let related_model = related.model();
                    set.extend(relation, [Rule::Nullable, Rule::Array]);
                    set.push(format!("{}.*", relation), Rule::Object);
                    set.extend(
                        format!("{}.*.{}", relation, related_model.primary_key),
                        [
                            Rule::Nullable,
                            Rule::exists(&related_model.name, &related_model.primary_key),
                        ],
                    );
                }
            }
        }

        for (key, message) in syncable.validation_messages() {
            set.set_message(key, message);
        }

        debug!("Compiled {} rule patterns for {}", set.len(), model.name);
        Ok(set)
    }

    /// Swap `required`/`unique` for their existence-aware forms and pin store
    /// rules to a concrete entity type.
    fn rewrite(&self, rule: Rule, entity_type: &str) -> SyncResult<Rule> {
        let catalog = self.resolver.catalog();
        let known = |name: &str| -> SyncResult<()> {
            if catalog.contains(name) {
                Ok(())
            } else {
                Err(SyncError::configuration(format!(
                    "Rule on '{}' refers to unknown entity type '{}'",
                    entity_type, name
                )))
            }
        };

        Ok(match rule {
            Rule::Required => Rule::custom("required_exists", Vec::new()),
            Rule::Unique {
                entity_type: target,
                column,
            } => {
                let target = target.unwrap_or_else(|| entity_type.to_string());
                known(&target)?;
                Rule::custom("unique_exists", std::iter::once(target).chain(column).collect())
            }
            Rule::Exists {
                entity_type: target,
                column,
            } => {
                let target = target.unwrap_or_else(|| entity_type.to_string());
                known(&target)?;
                Rule::Exists {
                    entity_type: Some(target),
                    column,
                }
            }
            Rule::Custom { name, params } => {
                if !self.registry.contains(&name) {
                    return Err(SyncError::configuration(format!(
                        "Unknown validation rule '{}' on '{}'",
                        name, entity_type
                    )));
                }
                Rule::Custom { name, params }
            }
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Catalog, EntityModel, PivotDef, RelationDef};
    use std::sync::Arc;

    fn resolver() -> DescriptorResolver {
        DescriptorResolver::new(Arc::new(
            Catalog::new()
                .with(
                    EntityModel::new("post", "posts")
                        .rule("title", "required|max:255|unique")
                        .message("title.required", "A post needs a title")
                        .relation(RelationDef::has_many("comments", "comment", "post_id"))
                        .relation(RelationDef::belongs_to("author", "author", "author_id").not_null())
                        .relation(RelationDef::belongs_to_many(
                            "categories",
                            "category",
                            PivotDef::new("category_post", "post_id", "category_id"),
                        ))
                        .relation(RelationDef::has_one("profile", "profile", "post_id")),
                )
                .with(
                    EntityModel::new("comment", "comments")
                        .rule("comment", "required")
                        .relation(RelationDef::belongs_to("author", "author", "author_id")),
                )
                .with(EntityModel::new("author", "authors").rule("name", "required"))
                .with(EntityModel::new("category", "categories"))
                .with(EntityModel::new("profile", "profiles").rule("bio", "string"))
                .with(EntityModel::new("bad", "bads").rule("name", "slug_format")),
        ))
    }

    fn compile(resolver: &DescriptorResolver, entity_type: &str, paths: &[&str]) -> SyncResult<RuleSet> {
        let registry = RuleRegistry::default();
        let syncable = resolver.catalog().get(entity_type)?;
        RuleCompiler::new(resolver, &registry).compile(syncable.as_ref(), &RelationPathTree::parse(paths))
    }

    #[test]
    fn test_rewrites_existence_conditional_rules() {
        let resolver = resolver();
        let set = compile(&resolver, "post", &[]).unwrap();
        assert_eq!(
            set.describe("title"),
            vec!["required_exists", "max:255", "unique_exists:post"]
        );
        assert_eq!(set.message("title", "required"), Some("A post needs a title"));
    }

    #[test]
    fn test_owned_many_rules_are_prefixed_with_wildcard() {
        let resolver = resolver();
        let set = compile(&resolver, "post", &["comments.author"]).unwrap();
        assert_eq!(set.describe("comments"), vec!["nullable", "array"]);
        assert_eq!(set.describe("comments.*"), vec!["object"]);
        assert_eq!(set.describe("comments.*.comment"), vec!["required_exists"]);
        assert_eq!(set.describe("comments.*.id"), vec!["nullable", "exists:comment,id"]);
        assert_eq!(set.describe("comments.*.author"), vec!["nullable", "object"]);
        assert_eq!(
            set.describe("comments.*.author.id"),
            vec!["nullable", "exists:author,id"]
        );
        assert!(set.get("comments.*.author.name").is_none());
    }

    #[test]
    fn test_single_reference_and_membership_rules() {
        let resolver = resolver();
        let set = compile(&resolver, "post", &["profile", "author", "categories"]).unwrap();
        assert_eq!(set.describe("profile"), vec!["nullable", "object"]);
        assert_eq!(set.describe("profile.bio"), vec!["string"]);
        assert_eq!(set.describe("profile.id"), vec!["nullable", "exists:profile,id"]);
        assert_eq!(set.describe("author"), vec!["object"]);
        assert_eq!(set.describe("author.id"), vec!["required", "exists:author,id"]);
        assert_eq!(set.describe("categories"), vec!["nullable", "array"]);
        assert_eq!(
            set.describe("categories.*.id"),
            vec!["nullable", "exists:category,id"]
        );
    }

    #[test]
    fn test_unknown_rules_and_relations_fail() {
        let resolver = resolver();
        assert!(matches!(
            compile(&resolver, "bad", &[]),
            Err(SyncError::Configuration(_))
        ));
        assert!(matches!(
            compile(&resolver, "post", &["tags"]),
            Err(SyncError::Configuration(_))
        ));
    }
}
