use crate::model::{EntityModel, Fields, Id, Payload};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A stored (or about to be stored) record of one entity type.
///
/// The entity remembers the field values it was loaded with so that saving an
/// existing record only writes the columns that actually changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: Option<Id>,
    pub fields: Fields,

    #[serde(skip)]
    original: Fields,

    /// Relation collections loaded onto this instance
    #[serde(skip)]
    relations: HashMap<String, Vec<Entity>>,
}

impl Entity {
    /// A new, not yet persisted entity
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: None,
            fields: Fields::new(),
            original: Fields::new(),
            relations: HashMap::new(),
        }
    }

    /// An entity as read from storage; the given fields become the clean state
    pub fn from_row(entity_type: impl Into<String>, id: Id, fields: Fields) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: Some(id),
            original: fields.clone(),
            fields,
            relations: HashMap::new(),
        }
    }

    pub fn exists(&self) -> bool {
        self.id.is_some()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Copy the fillable scalar fields of `payload` onto this entity.
    /// The primary key is never taken from the payload.
    pub fn fill(&mut self, model: &EntityModel, payload: &Payload) -> &mut Self {
        for field in &model.fields {
            if field == &model.primary_key {
                continue;
            }
            if let Some(value) = payload.get(field) {
                self.fields.insert(field.clone(), value.clone());
            }
        }
        self
    }

    /// Fields whose value differs from the last persisted state
    pub fn dirty(&self) -> Fields {
        self.fields
            .iter()
            .filter(|(key, value)| self.original.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.exists() || !self.dirty().is_empty()
    }

    /// Mark the current field values as persisted
    pub fn sync_original(&mut self) {
        self.original = self.fields.clone();
    }

    pub fn relation_loaded(&self, relation: &str) -> bool {
        self.relations.contains_key(relation)
    }

    pub fn relation(&self, relation: &str) -> Option<&[Entity]> {
        self.relations.get(relation).map(Vec::as_slice)
    }

    pub fn set_relation(&mut self, relation: impl Into<String>, entities: Vec<Entity>) {
        self.relations.insert(relation.into(), entities);
    }

    pub fn unset_relation(&mut self, relation: &str) {
        self.relations.remove(relation);
    }

    /// Payload-shaped view of this entity: its fields plus the primary key
    pub fn to_payload(&self, primary_key: &str) -> Payload {
        let mut payload = self.fields.clone();
        if let Some(id) = self.id {
            payload.insert(primary_key.to_string(), Value::from(id));
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post_model() -> EntityModel {
        EntityModel::new("post", "posts").fields(["id", "title", "notes"])
    }

    #[test]
    fn test_fill_only_copies_declared_fields() {
        let payload = json!({"id": 9, "title": "Hello", "secret": true, "comments": []});
        let mut entity = Entity::new("post");
        entity.fill(&post_model(), payload.as_object().unwrap());

        assert_eq!(entity.get("title"), Some(&json!("Hello")));
        assert!(entity.get("secret").is_none());
        assert!(entity.get("id").is_none());
        assert!(entity.id.is_none());
    }

    #[test]
    fn test_dirty_tracking() {
        let mut fields = Fields::new();
        fields.insert("title".into(), json!("Hello"));
        let mut entity = Entity::from_row("post", 1, fields);
        assert!(!entity.is_dirty());

        entity.set("title", json!("Hello"));
        assert!(!entity.is_dirty());

        entity.set("title", json!("Changed"));
        entity.set("notes", json!("new"));
        let dirty = entity.dirty();
        assert_eq!(dirty.len(), 2);
        assert!(entity.is_dirty());

        entity.sync_original();
        assert!(!entity.is_dirty());
    }

    #[test]
    fn test_new_entity_is_always_dirty() {
        assert!(Entity::new("post").is_dirty());
    }

    #[test]
    fn test_relation_cache() {
        let mut entity = Entity::new("post");
        assert!(!entity.relation_loaded("comments"));
        entity.set_relation("comments", vec![Entity::new("comment")]);
        assert_eq!(entity.relation("comments").map(|c| c.len()), Some(1));
        entity.unset_relation("comments");
        assert!(!entity.relation_loaded("comments"));
    }
}
