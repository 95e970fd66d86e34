use log::{debug, info, warn};
use std::sync::Arc;

use crate::error::{SyncError, SyncResult};
use crate::logic::annotate::Annotator;
use crate::logic::compile::RuleCompiler;
use crate::logic::persist::Persister;
use crate::logic::resolver::{DescriptorResolver, DEFAULT_TYPE_DISCRIMINATOR};
use crate::logic::synchronize::GraphSynchronizer;
use crate::logic::validate::{RuleRegistry, Validator};
use crate::model::{Catalog, Entity, Payload, RelationPathTree, RuleSet, Syncable};
use crate::store::traits::{EntityRepository, Store, Transaction};

/// Tunables for a [`SaveAndSync`] instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Payload key naming the concrete type of a polymorphic reference
    pub type_discriminator: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            type_discriminator: DEFAULT_TYPE_DISCRIMINATOR.to_string(),
        }
    }
}

/// Parse dotted relation paths such as `["comments.author", "categories"]`.
pub fn parse_relation_paths<I, S>(paths: I) -> RelationPathTree
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    RelationPathTree::parse(paths)
}

/// Validates and persists an aggregate root together with its relations,
/// all inside one store transaction.
pub struct SaveAndSync {
    catalog: Arc<Catalog>,
    resolver: DescriptorResolver,
    registry: RuleRegistry,
}

impl SaveAndSync {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            resolver: DescriptorResolver::new(Arc::clone(&catalog)),
            catalog,
            registry: RuleRegistry::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.resolver = DescriptorResolver::new(Arc::clone(&self.catalog))
            .with_type_discriminator(options.type_discriminator);
        self
    }

    /// Replace the custom rule registry. The registry should still carry
    /// `required_exists` and `unique_exists`, which compiled rules refer to.
    pub fn with_registry(mut self, registry: RuleRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn resolver(&self) -> &DescriptorResolver {
        &self.resolver
    }

    pub fn compile_validation_rules(
        &self,
        entity_type: &str,
        tree: &RelationPathTree,
    ) -> SyncResult<RuleSet> {
        let syncable = self.catalog.get(entity_type)?;
        RuleCompiler::new(&self.resolver, &self.registry).compile(syncable.as_ref(), tree)
    }

    /// Apply a payload that has already been validated. Writes go through
    /// `repo`; committing is the caller's business.
    pub async fn synchronize(
        &self,
        repo: &mut dyn EntityRepository,
        entity: &mut Entity,
        tree: &RelationPathTree,
        payload: &Payload,
    ) -> SyncResult<()> {
        GraphSynchronizer::new(&self.resolver)
            .synchronize(repo, entity, tree, payload)
            .await
    }

    /// Validate `payload` against `entity` and the named relations, then
    /// persist the whole graph atomically.
    ///
    /// When `relations` is `None` the entity type's syncable relations are
    /// used. On any error nothing is written and `entity` is left as it was.
    pub async fn save_and_sync<S: Store>(
        &self,
        store: &S,
        entity: &mut Entity,
        relations: Option<&[&str]>,
        payload: Payload,
    ) -> SyncResult<()> {
        let syncable = self.catalog.get(&entity.entity_type)?;
        let tree = match relations {
            Some(paths) => parse_relation_paths(paths),
            None => parse_relation_paths(syncable.syncable()),
        };

        let snapshot = entity.clone();
        let mut tx = store.begin().await?;
        debug!(
            "Began sync of {} {:?} with relations {:?}",
            entity.entity_type,
            entity.id,
            tree.to_paths()
        );

        let outcome = self
            .run(&mut tx, syncable, entity, &tree, payload)
            .await;

        let outcome = match outcome {
            Ok(()) => tx.commit().await.map_err(SyncError::from),
            Err(error) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("Rollback of {} failed: {:#}", entity.entity_type, rollback);
                }
                Err(error)
            }
        };

        match outcome {
            Ok(()) => {
                info!("Synced {} #{}", entity.entity_type, entity.id.unwrap_or_default());
                Ok(())
            }
            Err(error) => {
                *entity = snapshot;
                Err(error.into_user_facing())
            }
        }
    }

    async fn run(
        &self,
        repo: &mut dyn EntityRepository,
        syncable: Arc<dyn Syncable>,
        entity: &mut Entity,
        tree: &RelationPathTree,
        payload: Payload,
    ) -> SyncResult<()> {
        // Step 1: existence tree, rules, validation. Nothing is written yet.
        let context = Annotator::annotate(
            &self.resolver,
            &mut *repo,
            syncable.as_ref(),
            tree,
            &payload,
            entity.id,
        )
        .await?;
        let rules = RuleCompiler::new(&self.resolver, &self.registry).compile(syncable.as_ref(), tree)?;
        let errors = Validator::new(&self.catalog, &self.registry)
            .validate(repo, &rules, &payload, &context)
            .await?;
        if !errors.is_empty() {
            info!(
                "Rejected {} payload: {} invalid fields",
                entity.entity_type,
                errors.len()
            );
            return Err(SyncError::Validation(errors));
        }

        // Step 2: root row, references first so its foreign keys are set
        let payload = syncable.before_sync(payload);
        entity.fill(syncable.model(), &payload);
        let synchronizer = GraphSynchronizer::new(&self.resolver);
        synchronizer
            .apply_references(repo, syncable.as_ref(), entity, tree, &payload, "")
            .await?;
        Persister::save(repo, syncable.model(), entity).await?;

        // Step 3: owned and membership relations
        synchronizer
            .sync_relations(repo, Arc::clone(&syncable), entity, tree, &payload, "")
            .await?;
        syncable.after_sync(entity, &payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityModel, RelationDef};
    use crate::store::MemoryStore;
    use serde_json::{json, Value};

    fn service() -> SaveAndSync {
        SaveAndSync::new(Arc::new(
            Catalog::new()
                .with(
                    EntityModel::new("post", "posts")
                        .fields(["title"])
                        .rule("title", "required")
                        .syncable(["comments"])
                        .relation(RelationDef::has_many("comments", "comment", "post_id")),
                )
                .with(
                    EntityModel::new("comment", "comments")
                        .fields(["comment"])
                        .rule("comment", "required"),
                ),
        ))
    }

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_defaults_to_syncable_relations() {
        let store = MemoryStore::new();
        let mut post = Entity::new("post");
        service()
            .save_and_sync(
                &store,
                &mut post,
                None,
                payload(json!({"title": "Hi", "comments": [{"comment": "a"}]})),
            )
            .await
            .unwrap();
        assert_eq!(post.id, Some(1));
        assert_eq!(store.count("comments"), 1);
    }

    #[tokio::test]
    async fn test_failed_sync_restores_entity() {
        let store = MemoryStore::new();
        let mut post = Entity::new("post");
        let error = service()
            .save_and_sync(
                &store,
                &mut post,
                None,
                payload(json!({"title": "Hi", "comments": [{"comment": ""}]})),
            )
            .await
            .unwrap_err();

        assert!(error.validation_errors().unwrap().contains("comments.0.comment"));
        assert_eq!(post, Entity::new("post"));
        assert_eq!(store.count("posts"), 0);
    }

    #[test]
    fn test_compile_validation_rules_for_named_type() {
        let rules = service()
            .compile_validation_rules("post", &parse_relation_paths(["comments"]))
            .unwrap();
        assert_eq!(rules.describe("comments.*.comment"), vec!["required_exists"]);
        assert!(matches!(
            service().compile_validation_rules("page", &RelationPathTree::new()),
            Err(SyncError::Configuration(_))
        ));
    }
}
