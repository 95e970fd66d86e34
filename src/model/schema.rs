use crate::error::{SyncError, SyncResult};
use crate::model::{Entity, Payload, RelationDef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Static description of one entity type: storage table, fillable fields,
/// declared relations and validation rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityModel {
    /// Entity type name, unique within a catalog (e.g. "post")
    pub name: String,
    pub table: String,
    pub primary_key: String,

    /// Fields that may be filled from a payload
    pub fields: Vec<String>,
    pub relations: Vec<RelationDef>,

    /// Declared rules per field, as pipe-separated rule strings
    pub rules: BTreeMap<String, String>,
    pub messages: BTreeMap<String, String>,

    /// Relation paths synced when the caller does not name any
    pub syncable: Vec<String>,

    /// Field recomputed from payload position on every sync
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_attribute: Option<String>,

    /// Maintain `created_at` / `updated_at`
    pub timestamps: bool,

    /// Type alias written to polymorphic type columns; defaults to `name`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl EntityModel {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: "id".to_string(),
            fields: Vec::new(),
            relations: Vec::new(),
            rules: BTreeMap::new(),
            messages: BTreeMap::new(),
            syncable: Vec::new(),
            order_attribute: None,
            timestamps: false,
            alias: None,
        }
    }

    pub fn primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn rule(mut self, field: impl Into<String>, declared: impl Into<String>) -> Self {
        self.rules.insert(field.into(), declared.into());
        self
    }

    pub fn message(mut self, key: impl Into<String>, message: impl Into<String>) -> Self {
        self.messages.insert(key.into(), message.into());
        self
    }

    pub fn syncable<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.syncable.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn order_by(mut self, attribute: impl Into<String>) -> Self {
        self.order_attribute = Some(attribute.into());
        self
    }

    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn morph_alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn relation_def(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }
}

/// Sync capability of an entity type.
///
/// Every [`EntityModel`] is `Syncable` with no-op hooks. Types that need
/// hooks wrap a model and delegate `model()` to it.
pub trait Syncable: Send + Sync {
    fn model(&self) -> &EntityModel;

    /// Relation paths synced when the caller does not name any
    fn syncable(&self) -> &[String] {
        &self.model().syncable
    }

    fn validation_rules(&self) -> BTreeMap<String, String> {
        self.model().rules.clone()
    }

    fn validation_messages(&self) -> BTreeMap<String, String> {
        self.model().messages.clone()
    }

    fn order_attribute(&self) -> Option<&str> {
        self.model().order_attribute.as_deref()
    }

    /// Transform a payload node before it is applied
    fn before_sync(&self, payload: Payload) -> Payload {
        payload
    }

    /// Called once the node's own row has been written
    fn after_sync(&self, _entity: &Entity, _payload: &Payload) {}

    /// Called for every owned child removed by a sync
    fn deleted(&self, _entity: &Entity) {}
}

impl Syncable for EntityModel {
    fn model(&self) -> &EntityModel {
        self
    }
}

/// Registry of the entity types a sync may touch.
#[derive(Clone, Default)]
pub struct Catalog {
    models: HashMap<String, Arc<dyn Syncable>>,
    aliases: HashMap<String, String>,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.models.keys().collect();
        names.sort();
        f.debug_struct("Catalog").field("models", &names).finish()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<M: Syncable + 'static>(&mut self, model: M) -> &mut Self {
        let name = model.model().name.clone();
        let alias = model.model().morph_alias().to_string();
        self.aliases.insert(alias, name.clone());
        self.models.insert(name, Arc::new(model));
        self
    }

    pub fn with<M: Syncable + 'static>(mut self, model: M) -> Self {
        self.register(model);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn get(&self, name: &str) -> SyncResult<Arc<dyn Syncable>> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::configuration(format!("Unknown entity type '{}'", name)))
    }

    /// Look up a type by polymorphic alias, falling back to its name.
    pub fn get_by_alias(&self, alias: &str) -> SyncResult<Arc<dyn Syncable>> {
        match self.aliases.get(alias) {
            Some(name) => self.get(name),
            None => self.get(alias).map_err(|_| {
                SyncError::configuration(format!(
                    "Unable to determine entity type for alias '{}'",
                    alias
                ))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_lookup_by_name_and_alias() {
        let catalog = Catalog::new()
            .with(EntityModel::new("post", "posts").alias("article"))
            .with(EntityModel::new("author", "authors"));

        assert!(catalog.contains("post"));
        assert_eq!(catalog.get_by_alias("article").unwrap().model().name, "post");
        assert_eq!(catalog.get_by_alias("author").unwrap().model().name, "author");
        assert!(matches!(
            catalog.get("missing"),
            Err(SyncError::Configuration(_))
        ));
        assert!(matches!(
            catalog.get_by_alias("missing"),
            Err(SyncError::Configuration(_))
        ));
    }

    #[test]
    fn test_model_defaults_delegate_through_syncable() {
        let model = EntityModel::new("comment", "comments")
            .fields(["comment"])
            .rule("comment", "required")
            .syncable(["author"])
            .order_by("position");

        assert_eq!(model.primary_key, "id");
        assert_eq!(model.morph_alias(), "comment");
        assert_eq!(Syncable::syncable(&model), &["author".to_string()]);
        assert_eq!(model.order_attribute(), Some("position"));
        assert_eq!(
            model.validation_rules().get("comment").map(String::as_str),
            Some("required")
        );
    }
}
