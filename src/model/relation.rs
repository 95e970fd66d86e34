use crate::model::{Entity, Id};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a relation is declared on an entity model, in ORM terms.
///
/// The declaration is what schema authors write; the resolver classifies it
/// into a [`RelationKind`] that the synchronizer switches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Association {
    BelongsTo,
    MorphTo,
    HasOne,
    HasMany,
    MorphOne,
    MorphMany,
    BelongsToMany,
    HasManyThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// This entity holds a foreign key to one unowned entity
    Reference,
    /// One child holds a foreign key back to this entity
    OwnedSingle,
    /// Many children hold a foreign key back to this entity
    OwnedMany,
    /// Membership in a join table; both sides are independent
    ManySet,
}

impl RelationKind {
    pub fn is_owned(&self) -> bool {
        matches!(self, RelationKind::OwnedSingle | RelationKind::OwnedMany)
    }

    /// Whether the payload carries a single object rather than a sequence
    pub fn is_single(&self) -> bool {
        matches!(self, RelationKind::Reference | RelationKind::OwnedSingle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeyOwner {
    /// The foreign key column lives on this entity
    Parent,
    /// The foreign key column lives on the related entity
    Related,
    /// Both keys live on a join table
    Pivot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelatedType {
    Fixed(String),
    /// Resolved per payload item from its type discriminator
    Polymorphic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotDef {
    pub table: String,
    /// Join column pointing at the owning side
    pub parent_key: String,
    /// Join column pointing at the related side
    pub related_key: String,
}

impl PivotDef {
    pub fn new(
        table: impl Into<String>,
        parent_key: impl Into<String>,
        related_key: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            parent_key: parent_key.into(),
            related_key: related_key.into(),
        }
    }
}

/// A relation as declared on an [`EntityModel`](crate::model::EntityModel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Relation name; also the payload key carrying the related data
    pub name: String,
    pub association: Association,
    /// Related entity type; absent for `MorphTo`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    /// Column holding the polymorphic type alias
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pivot: Option<PivotDef>,
    /// Whether a reference may be cleared
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl RelationDef {
    fn declare(name: impl Into<String>, association: Association) -> Self {
        Self {
            name: name.into(),
            association,
            related: None,
            foreign_key: None,
            type_column: None,
            pivot: None,
            nullable: true,
        }
    }

    pub fn belongs_to(
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let mut def = Self::declare(name, Association::BelongsTo);
        def.related = Some(related.into());
        def.foreign_key = Some(foreign_key.into());
        def
    }

    pub fn morph_to(
        name: impl Into<String>,
        foreign_key: impl Into<String>,
        type_column: impl Into<String>,
    ) -> Self {
        let mut def = Self::declare(name, Association::MorphTo);
        def.foreign_key = Some(foreign_key.into());
        def.type_column = Some(type_column.into());
        def
    }

    pub fn has_one(
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let mut def = Self::declare(name, Association::HasOne);
        def.related = Some(related.into());
        def.foreign_key = Some(foreign_key.into());
        def
    }

    pub fn has_many(
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let mut def = Self::declare(name, Association::HasMany);
        def.related = Some(related.into());
        def.foreign_key = Some(foreign_key.into());
        def
    }

    pub fn morph_one(
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
        type_column: impl Into<String>,
    ) -> Self {
        let mut def = Self::has_one(name, related, foreign_key);
        def.association = Association::MorphOne;
        def.type_column = Some(type_column.into());
        def
    }

    pub fn morph_many(
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
        type_column: impl Into<String>,
    ) -> Self {
        let mut def = Self::has_many(name, related, foreign_key);
        def.association = Association::MorphMany;
        def.type_column = Some(type_column.into());
        def
    }

    pub fn belongs_to_many(
        name: impl Into<String>,
        related: impl Into<String>,
        pivot: PivotDef,
    ) -> Self {
        let mut def = Self::declare(name, Association::BelongsToMany);
        def.related = Some(related.into());
        def.pivot = Some(pivot);
        def
    }

    pub fn has_many_through(name: impl Into<String>, related: impl Into<String>) -> Self {
        let mut def = Self::declare(name, Association::HasManyThrough);
        def.related = Some(related.into());
        def
    }

    /// Mark a reference as mandatory: it can be re-pointed but not cleared
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// A classified relation, resolved once per (entity type, relation name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub name: String,
    pub kind: RelationKind,
    pub related: RelatedType,
    pub foreign_key_owner: ForeignKeyOwner,
    /// Foreign key column; for `ManySet` this is the pivot's parent key
    pub foreign_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pivot: Option<PivotDef>,
    /// Type alias of the entity owning this relation
    pub owner_alias: String,
    pub nullable: bool,
}

impl RelationDescriptor {
    pub fn is_polymorphic(&self) -> bool {
        self.related == RelatedType::Polymorphic
    }

    /// Point a `Reference` foreign key on `entity` at a related row.
    pub fn point_at(&self, entity: &mut Entity, related_id: Id, related_alias: &str) {
        entity.set(self.foreign_key.clone(), Value::from(related_id));
        if let Some(column) = &self.type_column {
            entity.set(column.clone(), Value::from(related_alias));
        }
    }

    /// Clear a `Reference` foreign key on `entity`.
    pub fn clear(&self, entity: &mut Entity) {
        entity.set(self.foreign_key.clone(), Value::Null);
        if let Some(column) = &self.type_column {
            entity.set(column.clone(), Value::Null);
        }
    }
}
