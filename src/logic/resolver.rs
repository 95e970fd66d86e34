use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{SyncError, SyncResult};
use crate::logic::persist::Persister;
use crate::model::{
    Association, Catalog, Entity, EntityModel, ForeignKeyOwner, Id, Payload, RelatedType,
    RelationDef, RelationDescriptor, RelationKind, Syncable,
};
use crate::store::traits::EntityRepository;

pub const DEFAULT_TYPE_DISCRIMINATOR: &str = "syncable_type";

/// Classifies declared relations into [`RelationKind`]s and hands out
/// accessor handles for them. Classification is cached per
/// (entity type, relation name).
pub struct DescriptorResolver {
    catalog: Arc<Catalog>,
    type_discriminator: String,
    cache: RwLock<HashMap<(String, String), Arc<RelationDescriptor>>>,
}

impl DescriptorResolver {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            type_discriminator: DEFAULT_TYPE_DISCRIMINATOR.to_string(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Payload key naming the concrete type of a polymorphic reference
    pub fn with_type_discriminator(mut self, key: impl Into<String>) -> Self {
        self.type_discriminator = key.into();
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn type_discriminator(&self) -> &str {
        &self.type_discriminator
    }

    pub fn resolve(&self, entity_type: &str, relation: &str) -> SyncResult<Arc<RelationDescriptor>> {
        let key = (entity_type.to_string(), relation.to_string());
        if let Some(descriptor) = self.cache.read().get(&key) {
            return Ok(Arc::clone(descriptor));
        }

        let owner = self.catalog.get(entity_type)?;
        let def = owner.model().relation_def(relation).ok_or_else(|| {
            SyncError::configuration(format!(
                "Relation '{}' is not declared on '{}'",
                relation, entity_type
            ))
        })?;
        let descriptor = Arc::new(self.classify(owner.model(), def)?);
        debug!(
            "Resolved {}.{} as {:?}",
            entity_type, relation, descriptor.kind
        );

        self.cache.write().insert(key, Arc::clone(&descriptor));
        Ok(descriptor)
    }

    fn classify(&self, owner: &EntityModel, def: &RelationDef) -> SyncResult<RelationDescriptor> {
        let fail = |reason: &str| {
            SyncError::configuration(format!(
                "Relation '{}.{}' {}",
                owner.name, def.name, reason
            ))
        };

        let (kind, foreign_key_owner) = match def.association {
            Association::BelongsTo | Association::MorphTo => {
                (RelationKind::Reference, ForeignKeyOwner::Parent)
            }
            Association::HasOne | Association::MorphOne => {
                (RelationKind::OwnedSingle, ForeignKeyOwner::Related)
            }
            Association::HasMany | Association::MorphMany => {
                (RelationKind::OwnedMany, ForeignKeyOwner::Related)
            }
            Association::BelongsToMany => (RelationKind::ManySet, ForeignKeyOwner::Pivot),
            Association::HasManyThrough => {
                return Err(fail("cannot be synchronized: intermediate relations have no single owner"))
            }
        };

        let related = match def.association {
            Association::MorphTo => RelatedType::Polymorphic,
            _ => {
                let name = def
                    .related
                    .clone()
                    .ok_or_else(|| fail("does not name its related entity type"))?;
                if !self.catalog.contains(&name) {
                    return Err(fail(
                        format!("points at unknown entity type '{}'", name).as_str(),
                    ));
                }
                RelatedType::Fixed(name)
            }
        };

        let polymorphic = matches!(
            def.association,
            Association::MorphTo | Association::MorphOne | Association::MorphMany
        );
        if polymorphic && def.type_column.is_none() {
            return Err(fail("is polymorphic but declares no type column"));
        }

        let foreign_key = match kind {
            RelationKind::ManySet => def
                .pivot
                .as_ref()
                .map(|pivot| pivot.parent_key.clone())
                .ok_or_else(|| fail("has no join table"))?,
            _ => def
                .foreign_key
                .clone()
                .ok_or_else(|| fail("has no foreign key"))?,
        };

        Ok(RelationDescriptor {
            name: def.name.clone(),
            kind,
            related,
            foreign_key_owner,
            foreign_key,
            type_column: if polymorphic {
                def.type_column.clone()
            } else {
                None
            },
            pivot: def.pivot.clone(),
            owner_alias: owner.morph_alias().to_string(),
            nullable: def.nullable,
        })
    }

    /// Entity type of a relation's related side. Polymorphic references read
    /// it from the item's type discriminator, which must be present.
    pub fn related_model(
        &self,
        descriptor: &RelationDescriptor,
        item: Option<&Payload>,
    ) -> SyncResult<Arc<dyn Syncable>> {
        match &descriptor.related {
            RelatedType::Fixed(name) => self.catalog.get(name),
            RelatedType::Polymorphic => {
                let alias = item
                    .and_then(|item| item.get(&self.type_discriminator))
                    .and_then(|value| value.as_str())
                    .filter(|alias| !alias.is_empty())
                    .ok_or_else(|| {
                        SyncError::configuration(format!(
                            "Unable to determine the entity type to sync for '{}': missing '{}'",
                            descriptor.name, self.type_discriminator
                        ))
                    })?;
                self.catalog.get_by_alias(alias)
            }
        }
    }

    pub fn handle(
        &self,
        descriptor: Arc<RelationDescriptor>,
        item: Option<&Payload>,
    ) -> SyncResult<RelationHandle> {
        let related = self.related_model(&descriptor, item)?;
        Ok(RelationHandle {
            descriptor,
            related,
        })
    }
}

/// Accessor bundle for one relation of one entity type.
pub struct RelationHandle {
    descriptor: Arc<RelationDescriptor>,
    related: Arc<dyn Syncable>,
}

impl RelationHandle {
    pub fn descriptor(&self) -> &RelationDescriptor {
        &self.descriptor
    }

    pub fn related(&self) -> &Arc<dyn Syncable> {
        &self.related
    }

    fn related_model(&self) -> &EntityModel {
        self.related.model()
    }

    pub async fn load(&self, repo: &mut dyn EntityRepository, id: Id) -> SyncResult<Option<Entity>> {
        Ok(repo.find(self.related_model(), id).await?)
    }

    /// A new, unsaved child whose foreign key points at `parent`
    pub fn make(&self, parent: &Entity) -> Entity {
        let mut child = Entity::new(self.related_model().name.clone());
        if let Some(parent_id) = parent.id {
            child.set(self.descriptor.foreign_key.clone(), parent_id.into());
        }
        if let Some(column) = &self.descriptor.type_column {
            child.set(column.clone(), self.descriptor.owner_alias.clone().into());
        }
        child
    }

    /// Create and persist a child owned by `parent`
    pub async fn create(
        &self,
        repo: &mut dyn EntityRepository,
        parent: &Entity,
        fields: &Payload,
    ) -> SyncResult<Entity> {
        let mut child = self.make(parent);
        child.fill(self.related_model(), fields);
        self.save(repo, &mut child).await?;
        Ok(child)
    }

    /// Fill and persist an existing related row
    pub async fn update(
        &self,
        repo: &mut dyn EntityRepository,
        id: Id,
        fields: &Payload,
    ) -> SyncResult<Entity> {
        let mut entity = self.load(repo, id).await?.ok_or_else(|| SyncError::NotFound {
            path: self.descriptor.name.clone(),
            entity_type: self.related_model().name.clone(),
            id,
        })?;
        entity.fill(self.related_model(), fields);
        self.save(repo, &mut entity).await?;
        Ok(entity)
    }

    pub async fn save(&self, repo: &mut dyn EntityRepository, entity: &mut Entity) -> SyncResult<bool> {
        Ok(Persister::save(repo, self.related_model(), entity).await?)
    }

    /// Delete one related row, loading it first so the delete hook sees it
    pub async fn delete(&self, repo: &mut dyn EntityRepository, id: Id) -> SyncResult<bool> {
        let Some(entity) = self.load(repo, id).await? else {
            return Ok(false);
        };
        let deleted = repo.delete(self.related_model(), id).await?;
        if deleted {
            self.related.deleted(&entity);
        }
        Ok(deleted)
    }

    /// Point `parent`'s foreign key at `related`
    pub fn associate(&self, parent: &mut Entity, related: &Entity) -> SyncResult<()> {
        let id = related.id.ok_or_else(|| {
            SyncError::configuration(format!(
                "Cannot associate '{}' with an unsaved {}",
                self.descriptor.name, related.entity_type
            ))
        })?;
        self.descriptor
            .point_at(parent, id, self.related_model().morph_alias());
        Ok(())
    }

    pub fn dissociate(&self, parent: &mut Entity) {
        self.descriptor.clear(parent);
    }

    pub async fn list_owned(&self, repo: &mut dyn EntityRepository, parent_id: Id) -> SyncResult<Vec<Id>> {
        Ok(repo
            .list_children(self.related_model(), &self.descriptor, parent_id)
            .await?)
    }

    pub async fn sync_membership(
        &self,
        repo: &mut dyn EntityRepository,
        parent_id: Id,
        ids: &[Id],
    ) -> SyncResult<()> {
        Ok(repo
            .sync_membership(&self.descriptor, parent_id, ids)
            .await?)
    }
}
