use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::SyncResult;
use crate::logic::resolver::DescriptorResolver;
use crate::model::{payload_key, Id, Payload, RelationKind, RelationPathTree, SyncContext, Syncable};
use crate::store::traits::EntityRepository;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub struct Annotator;

impl Annotator {
    /// Build the [`SyncContext`] tree mirroring `payload` for the relations in
    /// `tree`. The root's key comes from the caller (the entity instance).
    ///
    /// An owned item only counts as stored when its key is among the children
    /// its parent currently owns; any other key marks a new record.
    pub fn annotate<'a>(
        resolver: &'a DescriptorResolver,
        repo: &'a mut dyn EntityRepository,
        syncable: &'a dyn Syncable,
        tree: &'a RelationPathTree,
        payload: &'a Payload,
        root_key: Option<Id>,
    ) -> BoxFuture<'a, SyncResult<SyncContext>> {
        Box::pin(async move {
            let model = syncable.model();
            let mut context =
                SyncContext::new(model.name.clone(), model.primary_key.clone(), root_key);

            for (relation, subtree) in tree.relations() {
                let Some(value) = payload.get(relation) else {
                    continue;
                };
                let descriptor = resolver.resolve(&model.name, relation)?;

                match descriptor.kind {
                    RelationKind::OwnedMany | RelationKind::OwnedSingle => {
                        let kind = descriptor.kind;
                        let handle = resolver.handle(descriptor, None)?;
                        let related = Arc::clone(handle.related());
                        let pk = related.model().primary_key.clone();
                        let owned = match root_key {
                            Some(parent_id) => handle.list_owned(&mut *repo, parent_id).await?,
                            None => Vec::new(),
                        };
                        let owned_key =
                            |item: &Payload| payload_key(item, &pk).filter(|id| owned.contains(id));

                        match (kind, value) {
                            (RelationKind::OwnedSingle, Value::Object(item)) => {
                                let child = Self::annotate(
                                    resolver,
                                    &mut *repo,
                                    related.as_ref(),
                                    subtree,
                                    item,
                                    owned_key(item),
                                )
                                .await?;
                                context.insert_single(relation, child);
                            }
                            (RelationKind::OwnedMany, Value::Array(items)) => {
                                let mut contexts = Vec::with_capacity(items.len());
                                for item in items {
                                    contexts.push(match item {
                                        Value::Object(item) => {
                                            Self::annotate(
                                                resolver,
                                                &mut *repo,
                                                related.as_ref(),
                                                subtree,
                                                item,
                                                owned_key(item),
                                            )
                                            .await?
                                        }
                                        _ => Self::leaf(related.as_ref(), None),
                                    });
                                }
                                context.insert_many(relation, contexts);
                            }
                            _ => {}
                        }
                    }
                    RelationKind::Reference => {
                        if let Value::Object(item) = value {
                            let related = resolver.related_model(&descriptor, Some(item))?;
                            let key = payload_key(item, &related.model().primary_key);
                            context.insert_single(relation, Self::leaf(related.as_ref(), key));
                        }
                    }
                    RelationKind::ManySet => {
                        if let Value::Array(items) = value {
                            let related = resolver.related_model(&descriptor, None)?;
                            let pk = &related.model().primary_key;
                            let contexts = items
                                .iter()
                                .map(|item| {
                                    let key = item.as_object().and_then(|item| payload_key(item, pk));
                                    Self::leaf(related.as_ref(), key)
                                })
                                .collect();
                            context.insert_many(relation, contexts);
                        }
                    }
                }
            }

            Ok(context)
        })
    }

    fn leaf(syncable: &dyn Syncable, key: Option<Id>) -> SyncContext {
        let model = syncable.model();
        SyncContext::new(model.name.clone(), model.primary_key.clone(), key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::model::{Catalog, ContextNode, EntityModel, RelationDef};
    use crate::store::{MemoryStore, Store};
    use serde_json::json;

    fn resolver() -> DescriptorResolver {
        DescriptorResolver::new(Arc::new(
            Catalog::new()
                .with(
                    EntityModel::new("post", "posts")
                        .relation(RelationDef::has_many("comments", "comment", "post_id")),
                )
                .with(
                    EntityModel::new("comment", "comments")
                        .relation(RelationDef::belongs_to("author", "author", "author_id")),
                )
                .with(EntityModel::new("author", "authors"))
                .with(
                    EntityModel::new("image", "images")
                        .relation(RelationDef::morph_to("imageable", "imageable_id", "imageable_type")),
                ),
        ))
    }

    async fn annotate(
        store: &MemoryStore,
        entity_type: &str,
        relations: &[&str],
        payload: serde_json::Value,
        root_key: Option<Id>,
    ) -> SyncResult<SyncContext> {
        let resolver = resolver();
        let syncable = resolver.catalog().get(entity_type).unwrap();
        let tree = RelationPathTree::parse(relations.iter().copied());
        let payload = payload.as_object().cloned().unwrap();
        let mut tx = store.begin().await.unwrap();
        Annotator::annotate(&resolver, &mut tx, syncable.as_ref(), &tree, &payload, root_key).await
    }

    #[tokio::test]
    async fn test_annotates_nested_existence() {
        let store = MemoryStore::new();
        let post_id = store.seed("posts", json!({}));
        let comment_id = store.seed("comments", json!({"post_id": post_id}));

        let ctx = annotate(
            &store,
            "post",
            &["comments.author"],
            json!({
                "comments": [
                    {"id": comment_id, "comment": "kept", "author": {"id": "2"}},
                    {"comment": "new"}
                ]
            }),
            Some(post_id),
        )
        .await
        .unwrap();

        assert!(ctx.exists);
        let Some(ContextNode::Many(comments)) = ctx.child("comments") else {
            panic!("expected comment contexts");
        };
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].pk, Some(comment_id));
        assert!(comments[0].exists);
        assert!(!comments[1].exists);

        let author = ctx.node_for_field("comments.0.author.name").unwrap();
        assert_eq!(author.entity_type, "author");
        assert_eq!(author.pk, Some(2));
    }

    #[tokio::test]
    async fn test_keys_of_other_parents_mark_new_items() {
        let store = MemoryStore::new();
        let first = store.seed("posts", json!({}));
        let second = store.seed("posts", json!({}));
        let foreign = store.seed("comments", json!({"post_id": first}));

        let ctx = annotate(
            &store,
            "post",
            &["comments"],
            json!({"comments": [{"id": foreign}]}),
            Some(second),
        )
        .await
        .unwrap();
        let child = ctx.node_for_field("comments.0.comment").unwrap();
        assert!(!child.exists);
        assert_eq!(child.pk, None);

        // A parent that is not stored yet owns nothing
        let ctx = annotate(&store, "post", &["comments"], json!({"comments": [{"id": foreign}]}), None)
            .await
            .unwrap();
        assert!(!ctx.node_for_field("comments.0.comment").unwrap().exists);
    }

    #[tokio::test]
    async fn test_relations_outside_tree_are_ignored() {
        let store = MemoryStore::new();
        let ctx = annotate(&store, "post", &[], json!({"comments": [{"id": 1}]}), None)
            .await
            .unwrap();
        assert!(ctx.child("comments").is_none());
        assert!(!ctx.exists);
    }

    #[tokio::test]
    async fn test_polymorphic_reference_without_discriminator_fails_fast() {
        let store = MemoryStore::new();
        let result = annotate(&store, "image", &["imageable"], json!({"imageable": {"id": 1}}), None).await;
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }
}
