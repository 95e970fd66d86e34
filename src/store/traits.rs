use crate::model::{Entity, EntityModel, Fields, Id, RelationDescriptor};
use anyhow::Result;
use serde_json::Value;

/// Row-level operations a sync needs, scoped to one open transaction.
#[async_trait::async_trait]
pub trait EntityRepository: Send {
    /// Load a row by primary key
    async fn find(&mut self, model: &EntityModel, id: Id) -> Result<Option<Entity>>;
    /// Insert a row and return its generated primary key
    async fn insert(&mut self, model: &EntityModel, fields: &Fields) -> Result<Id>;
    /// Write the given columns of an existing row
    async fn update(&mut self, model: &EntityModel, id: Id, fields: &Fields) -> Result<()>;
    /// Delete a single row; returns false when it was already gone
    async fn delete(&mut self, model: &EntityModel, id: Id) -> Result<bool>;
    /// Primary keys of the rows owned by `parent_id` through an owned relation
    async fn list_children(
        &mut self,
        child: &EntityModel,
        relation: &RelationDescriptor,
        parent_id: Id,
    ) -> Result<Vec<Id>>;
    /// Replace the join-table membership of `parent_id` with exactly `related_ids`
    async fn sync_membership(
        &mut self,
        relation: &RelationDescriptor,
        parent_id: Id,
        related_ids: &[Id],
    ) -> Result<()>;
    /// Whether any row has `column` equal to `value`, ignoring row `ignore_id`
    async fn value_exists(
        &mut self,
        model: &EntityModel,
        column: &str,
        value: &Value,
        ignore_id: Option<Id>,
    ) -> Result<bool>;
}

/// An open unit of work; nothing written through it is visible until commit.
#[async_trait::async_trait]
pub trait Transaction: EntityRepository {
    async fn commit(self) -> Result<()>;
    async fn rollback(self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    type Tx: Transaction + 'static;

    async fn begin(&self) -> Result<Self::Tx>;
}
