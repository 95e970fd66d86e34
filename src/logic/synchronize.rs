use itertools::Itertools;
use log::{debug, info};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{SyncError, SyncResult, ValidationErrors};
use crate::logic::persist::Persister;
use crate::logic::resolver::DescriptorResolver;
use crate::model::{
    join_path, payload_key, Entity, Id, Payload, RelationDescriptor, RelationKind,
    RelationPathTree, Syncable,
};
use crate::store::traits::EntityRepository;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Applies an already validated payload graph to storage.
pub struct GraphSynchronizer<'a> {
    resolver: &'a DescriptorResolver,
}

impl<'a> GraphSynchronizer<'a> {
    pub fn new(resolver: &'a DescriptorResolver) -> Self {
        Self { resolver }
    }

    /// Sync `entity` and every relation in `tree` from `payload`.
    ///
    /// Scalar fields are expected to be filled already; references are
    /// applied and the row is saved before owned relations are walked.
    pub async fn synchronize(
        &self,
        repo: &mut dyn EntityRepository,
        entity: &mut Entity,
        tree: &RelationPathTree,
        payload: &Payload,
    ) -> SyncResult<()> {
        let syncable = self.resolver.catalog().get(&entity.entity_type)?;
        self.apply_references(repo, syncable.as_ref(), entity, tree, payload, "")
            .await?;
        Persister::save(repo, syncable.model(), entity).await?;
        self.sync_relations(repo, syncable, entity, tree, payload, "")
            .await
    }

    /// Point or clear the foreign keys `entity` holds for the reference
    /// relations in `tree`. Must run before `entity` is saved.
    pub async fn apply_references(
        &self,
        repo: &mut dyn EntityRepository,
        syncable: &dyn Syncable,
        entity: &mut Entity,
        tree: &RelationPathTree,
        payload: &Payload,
        path: &str,
    ) -> SyncResult<()> {
        let model = syncable.model();
        for (relation, _) in tree.relations() {
            let descriptor = self.resolver.resolve(&model.name, relation)?;
            if descriptor.kind != RelationKind::Reference {
                continue;
            }
            let Some(value) = payload.get(relation) else {
                continue;
            };

            let item = match value {
                Value::Object(item) => item,
                Value::Null => {
                    if descriptor.nullable {
                        descriptor.clear(entity);
                    }
                    continue;
                }
                _ => return Err(shape_error(&join_path(path, relation), "an object")),
            };

            let handle = self.resolver.handle(Arc::clone(&descriptor), Some(item))?;
            let pk = handle.related().model().primary_key.clone();
            match payload_key(item, &pk) {
                Some(id) => {
                    let related = handle.load(repo, id).await?.ok_or_else(|| SyncError::NotFound {
                        path: join_path(&join_path(path, relation), &pk),
                        entity_type: handle.related().model().name.clone(),
                        id,
                    })?;
                    handle.associate(entity, &related)?;
                    debug!("Associated {}.{} with #{}", model.name, relation, id);
                }
                None if descriptor.nullable => handle.dissociate(entity),
                None => {}
            }
        }
        Ok(())
    }

    /// Walk the owned and membership relations of an already saved entity.
    pub fn sync_relations<'s>(
        &'s self,
        repo: &'s mut dyn EntityRepository,
        syncable: Arc<dyn Syncable>,
        entity: &'s mut Entity,
        tree: &'s RelationPathTree,
        payload: &'s Payload,
        path: &'s str,
    ) -> BoxFuture<'s, SyncResult<()>> {
        Box::pin(async move {
            let model = syncable.model();
            let parent_id = entity.id.ok_or_else(|| {
                SyncError::configuration(format!(
                    "{} must be saved before its relations are synced",
                    model.name
                ))
            })?;

            for (relation, subtree) in tree.relations() {
                let descriptor = self.resolver.resolve(&model.name, relation)?;
                let Some(value) = payload.get(relation) else {
                    continue;
                };
                let relation_path = join_path(path, relation);

                match descriptor.kind {
                    RelationKind::Reference => continue,
                    RelationKind::OwnedSingle | RelationKind::OwnedMany => {
                        self.sync_owned(
                            &mut *repo,
                            descriptor,
                            entity,
                            subtree,
                            value,
                            relation_path,
                        )
                        .await?;
                    }
                    RelationKind::ManySet => {
                        self.sync_membership(&mut *repo, descriptor, parent_id, value, &relation_path)
                            .await?;
                    }
                }
                entity.unset_relation(relation);
            }
            Ok(())
        })
    }

    fn sync_owned<'s>(
        &'s self,
        repo: &'s mut dyn EntityRepository,
        descriptor: Arc<RelationDescriptor>,
        parent: &'s mut Entity,
        subtree: &'s RelationPathTree,
        value: &'s Value,
        path: String,
    ) -> BoxFuture<'s, SyncResult<()>> {
        Box::pin(async move {
            let kind = descriptor.kind;
            let handle = self.resolver.handle(descriptor, None)?;
            let related = Arc::clone(handle.related());
            let pk = related.model().primary_key.clone();
            let parent_id = parent.id.ok_or_else(|| {
                SyncError::configuration(format!("Parent of '{}' is not saved", path))
            })?;

            // Step 1: normalize the payload into an ordered item list
            let items: Vec<&Payload> = match (kind, value) {
                (_, Value::Null) => Vec::new(),
                (RelationKind::OwnedSingle, Value::Object(item)) => vec![item],
                (RelationKind::OwnedMany, Value::Array(items)) => items
                    .iter()
                    .map(|item| item.as_object().ok_or_else(|| shape_error(&path, "a list of objects")))
                    .collect::<SyncResult<_>>()?,
                (RelationKind::OwnedSingle, _) => return Err(shape_error(&path, "an object")),
                _ => return Err(shape_error(&path, "an array")),
            };

            // Step 2: work out which stored children are no longer wanted
            let current = handle.list_owned(&mut *repo, parent_id).await?;
            let keys: Vec<Id> = items.iter().filter_map(|item| payload_key(item, &pk)).collect();
            let mut to_remove: Vec<Id> = current
                .iter()
                .copied()
                .filter(|id| !keys.contains(id))
                .collect();
            if kind == RelationKind::OwnedSingle {
                to_remove.truncate(1);
            }

            // Step 3: upsert every item in payload order
            let total = items.len();
            let (mut created, mut updated) = (0usize, 0usize);
            for (index, item) in items.into_iter().enumerate() {
                let item = related.before_sync(item.clone());
                let item_path = match kind {
                    RelationKind::OwnedMany => join_path(&path, &index.to_string()),
                    _ => path.clone(),
                };

                let existing = payload_key(&item, &pk).filter(|id| current.contains(id));
                let mut child = match existing {
                    Some(id) => handle.load(&mut *repo, id).await?.ok_or_else(|| {
                        SyncError::NotFound {
                            path: join_path(&item_path, &pk),
                            entity_type: related.model().name.clone(),
                            id,
                        }
                    })?,
                    None => handle.make(parent),
                };

                child.fill(related.model(), &item);
                if let Some(attribute) = related.order_attribute() {
                    child.set(attribute, Value::from((total - index) as i64));
                }
                self.apply_references(&mut *repo, related.as_ref(), &mut child, subtree, &item, &item_path)
                    .await?;

                let is_new = !child.exists();
                if handle.save(&mut *repo, &mut child).await? {
                    if is_new {
                        created += 1;
                    } else {
                        updated += 1;
                    }
                }
                related.after_sync(&child, &item);

                self.sync_relations(
                    &mut *repo,
                    Arc::clone(&related),
                    &mut child,
                    subtree,
                    &item,
                    &item_path,
                )
                .await?;
            }

            // Step 4: delete orphans one by one so delete hooks fire
            let mut deleted = 0usize;
            for id in to_remove {
                if handle.delete(&mut *repo, id).await? {
                    deleted += 1;
                }
            }

            info!(
                "Synced {}: {} created, {} updated, {} deleted",
                path, created, updated, deleted
            );
            Ok(())
        })
    }

    async fn sync_membership(
        &self,
        repo: &mut dyn EntityRepository,
        descriptor: Arc<RelationDescriptor>,
        parent_id: Id,
        value: &Value,
        path: &str,
    ) -> SyncResult<()> {
        let handle = self.resolver.handle(descriptor, None)?;
        let pk = &handle.related().model().primary_key;

        let ids: Vec<Id> = match value {
            Value::Null => Vec::new(),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_object)
                .filter_map(|item| payload_key(item, pk))
                .unique()
                .collect(),
            _ => return Err(shape_error(path, "an array")),
        };

        handle.sync_membership(repo, parent_id, &ids).await?;
        info!("Synced {}: {} members", path, ids.len());
        Ok(())
    }
}

fn shape_error(path: &str, expected: &str) -> SyncError {
    let mut errors = ValidationErrors::new();
    errors.add(path, format!("The {} must be {}.", path, expected));
    SyncError::Validation(errors)
}
