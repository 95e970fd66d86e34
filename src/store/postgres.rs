use anyhow::{bail, Context, Result};
use log::debug;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres};

use crate::model::{value_text, Entity, EntityModel, Fields, Id, RelationDescriptor};
use crate::store::traits::{EntityRepository, Store, Transaction};

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Run idempotent DDL statements (`CREATE TABLE IF NOT EXISTS ...`) in order
    pub async fn apply_schema(&self, statements: &[&str]) -> Result<()> {
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema statement")?;
        }
        debug!("Applied {} schema statements", statements.len());
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        Ok(PgTransaction { tx })
    }
}

/// Quote an identifier taken from an entity model.
///
/// Identifiers come from schema declarations, never from payload keys that
/// have not been matched against a model's field list.
fn ident(name: &str) -> Result<String> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("Invalid SQL identifier '{}'", name);
    }
    Ok(format!("\"{}\"", name))
}

fn column_list(fields: &Fields) -> Result<Vec<String>> {
    fields.keys().map(|column| ident(column)).collect()
}

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl EntityRepository for PgTransaction {
    async fn find(&mut self, model: &EntityModel, id: Id) -> Result<Option<Entity>> {
        let sql = format!(
            "SELECT to_jsonb(t) FROM {} AS t WHERE t.{}::bigint = $1",
            ident(&model.table)?,
            ident(&model.primary_key)?
        );
        let row = sqlx::query_scalar::<Postgres, Value>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .with_context(|| format!("Failed to fetch {} #{}", model.name, id))?;

        let Some(Value::Object(mut fields)) = row else {
            return Ok(None);
        };
        fields.remove(&model.primary_key);
        Ok(Some(Entity::from_row(model.name.clone(), id, fields)))
    }

    async fn insert(&mut self, model: &EntityModel, fields: &Fields) -> Result<Id> {
        let table = ident(&model.table)?;
        let pk = ident(&model.primary_key)?;

        let sql = if fields.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING {}::bigint", table, pk)
        } else {
            let columns = column_list(fields)?.join(", ");
            format!(
                "INSERT INTO {table} ({columns}) \
                 SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1) \
                 RETURNING {pk}::bigint"
            )
        };

        let mut query = sqlx::query_scalar::<Postgres, Id>(&sql);
        if !fields.is_empty() {
            query = query.bind(Value::Object(fields.clone()));
        }
        let id = query
            .fetch_one(&mut *self.tx)
            .await
            .with_context(|| format!("Failed to insert {}", model.name))?;

        debug!("Inserted {} #{}", model.name, id);
        Ok(id)
    }

    async fn update(&mut self, model: &EntityModel, id: Id, fields: &Fields) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let table = ident(&model.table)?;
        let assignments = column_list(fields)?
            .iter()
            .map(|column| format!("{column} = r.{column}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {table} AS t SET {assignments} \
             FROM jsonb_populate_record(NULL::{table}, $1) AS r \
             WHERE t.{}::bigint = $2",
            ident(&model.primary_key)?
        );

        sqlx::query(&sql)
            .bind(Value::Object(fields.clone()))
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .with_context(|| format!("Failed to update {} #{}", model.name, id))?;

        Ok(())
    }

    async fn delete(&mut self, model: &EntityModel, id: Id) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {}::bigint = $1",
            ident(&model.table)?,
            ident(&model.primary_key)?
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .with_context(|| format!("Failed to delete {} #{}", model.name, id))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_children(
        &mut self,
        child: &EntityModel,
        relation: &RelationDescriptor,
        parent_id: Id,
    ) -> Result<Vec<Id>> {
        let pk = ident(&child.primary_key)?;
        let mut sql = format!(
            "SELECT {pk}::bigint FROM {} WHERE {}::bigint = $1",
            ident(&child.table)?,
            ident(&relation.foreign_key)?
        );
        if let Some(column) = &relation.type_column {
            sql.push_str(&format!(" AND {} = $2", ident(column)?));
        }
        sql.push_str(&format!(" ORDER BY {pk}"));

        let mut query = sqlx::query_scalar::<Postgres, Id>(&sql).bind(parent_id);
        if relation.type_column.is_some() {
            query = query.bind(relation.owner_alias.clone());
        }
        let ids = query
            .fetch_all(&mut *self.tx)
            .await
            .with_context(|| format!("Failed to list '{}' of #{}", relation.name, parent_id))?;

        Ok(ids)
    }

    async fn sync_membership(
        &mut self,
        relation: &RelationDescriptor,
        parent_id: Id,
        related_ids: &[Id],
    ) -> Result<()> {
        let Some(pivot) = &relation.pivot else {
            bail!("Relation '{}' has no join table", relation.name);
        };
        let table = ident(&pivot.table)?;
        let parent_key = ident(&pivot.parent_key)?;
        let related_key = ident(&pivot.related_key)?;

        sqlx::query(&format!(
            "DELETE FROM {table} WHERE {parent_key}::bigint = $1 \
             AND NOT ({related_key}::bigint = ANY($2))"
        ))
        .bind(parent_id)
        .bind(related_ids.to_vec())
        .execute(&mut *self.tx)
        .await
        .context("Failed to detach membership")?;

        sqlx::query(&format!(
            "INSERT INTO {table} ({parent_key}, {related_key}) \
             SELECT $1, ids.id FROM UNNEST($2::bigint[]) AS ids(id) \
             WHERE NOT EXISTS (SELECT 1 FROM {table} AS p \
             WHERE p.{parent_key}::bigint = $1 AND p.{related_key}::bigint = ids.id)"
        ))
        .bind(parent_id)
        .bind(related_ids.to_vec())
        .execute(&mut *self.tx)
        .await
        .context("Failed to attach membership")?;

        Ok(())
    }

    async fn value_exists(
        &mut self,
        model: &EntityModel,
        column: &str,
        value: &Value,
        ignore_id: Option<Id>,
    ) -> Result<bool> {
        let Some(text) = value_text(value) else {
            return Ok(false);
        };
        let pk = ident(&model.primary_key)?;
        let mut sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {}::text = $1",
            ident(&model.table)?,
            ident(column)?
        );
        if ignore_id.is_some() {
            sql.push_str(&format!(" AND {pk}::bigint <> $2"));
        }
        sql.push(')');

        let mut query = sqlx::query_scalar::<Postgres, bool>(&sql).bind(text);
        if let Some(id) = ignore_id {
            query = query.bind(id);
        }
        let exists = query
            .fetch_one(&mut *self.tx)
            .await
            .with_context(|| format!("Failed to probe {}.{}", model.table, column))?;

        Ok(exists)
    }
}

#[async_trait::async_trait]
impl Transaction for PgTransaction {
    async fn commit(self) -> Result<()> {
        self.tx.commit().await.context("Failed to commit transaction")
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back transaction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_quotes_and_rejects() {
        assert_eq!(ident("posts").unwrap(), "\"posts\"");
        assert_eq!(ident("author_id").unwrap(), "\"author_id\"");
        assert!(ident("").is_err());
        assert!(ident("posts; DROP TABLE x").is_err());
        assert!(ident("a\"b").is_err());
    }
}
