use anyhow::Result;
use chrono::Utc;
use log::debug;
use serde_json::Value;

use crate::model::{Entity, EntityModel, Fields};
use crate::store::traits::EntityRepository;

pub struct Persister;

impl Persister {
    /// Insert a new entity or write the changed fields of an existing one.
    ///
    /// Returns false when an existing entity had nothing to write; such a save
    /// touches neither the row nor its `updated_at`.
    pub async fn save(
        repo: &mut dyn EntityRepository,
        model: &EntityModel,
        entity: &mut Entity,
    ) -> Result<bool> {
        match entity.id {
            None => {
                if model.timestamps {
                    let now = Self::now();
                    entity.set("created_at", now.clone());
                    entity.set("updated_at", now);
                }
                let id = repo.insert(model, &entity.fields).await?;
                entity.id = Some(id);
                entity.sync_original();
                debug!("Created {} #{}", model.name, id);
                Ok(true)
            }
            Some(id) => {
                let mut dirty: Fields = entity.dirty();
                if dirty.is_empty() {
                    return Ok(false);
                }
                if model.timestamps {
                    let now = Self::now();
                    entity.set("updated_at", now.clone());
                    dirty.insert("updated_at".to_string(), now);
                }
                repo.update(model, id, &dirty).await?;
                entity.sync_original();
                debug!("Updated {} #{} ({} fields)", model.name, id, dirty.len());
                Ok(true)
            }
        }
    }

    fn now() -> Value {
        Value::String(Utc::now().to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store, Transaction};
    use serde_json::json;

    #[tokio::test]
    async fn test_save_inserts_then_updates_only_when_dirty() {
        let store = MemoryStore::new();
        let model = EntityModel::new("post", "posts")
            .fields(["title"])
            .with_timestamps();
        let mut tx = store.begin().await.unwrap();

        let mut post = Entity::new("post");
        post.set("title", json!("Hello"));
        assert!(Persister::save(&mut tx, &model, &mut post).await.unwrap());
        assert_eq!(post.id, Some(1));
        assert!(post.get("created_at").is_some());

        let stamped = post.get("updated_at").cloned();
        assert!(!Persister::save(&mut tx, &model, &mut post).await.unwrap());
        assert_eq!(post.get("updated_at").cloned(), stamped);

        post.set("title", json!("Changed"));
        assert!(Persister::save(&mut tx, &model, &mut post).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(store.row("posts", 1).unwrap()["title"], json!("Changed"));
    }
}
