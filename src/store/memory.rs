use crate::model::{
    key_from_value, value_text, Entity, EntityModel, Fields, Id, RelationDescriptor,
};
use crate::store::traits::{EntityRepository, Store, Transaction};
use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
struct Tables {
    /// Rows keyed by table, then primary key
    rows: HashMap<String, BTreeMap<Id, Fields>>,
    sequences: HashMap<String, Id>,
    /// Join tables as (parent, related) pairs
    pivots: HashMap<String, BTreeSet<(Id, Id)>>,
}

impl Tables {
    fn next_id(&mut self, table: &str) -> Id {
        let next = self.sequences.entry(table.to_string()).or_insert(0);
        *next += 1;
        *next
    }

    fn table(&self, table: &str) -> Option<&BTreeMap<Id, Fields>> {
        self.rows.get(table)
    }
}

/// In-process store with snapshot transactions.
///
/// `begin` copies the committed tables; `commit` replaces them with the
/// transaction's copy. Concurrent transactions are last-writer-wins.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    committed: Arc<Mutex<Tables>>,
    failing_tables: Arc<Mutex<HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a committed row directly, outside any transaction
    pub fn seed(&self, table: &str, fields: Value) -> Id {
        let mut tables = self.committed.lock();
        let id = tables.next_id(table);
        let fields = match fields {
            Value::Object(map) => map,
            _ => Fields::new(),
        };
        tables
            .rows
            .entry(table.to_string())
            .or_default()
            .insert(id, fields);
        id
    }

    /// Add a committed join-table link directly
    pub fn attach(&self, pivot_table: &str, parent_id: Id, related_id: Id) {
        self.committed
            .lock()
            .pivots
            .entry(pivot_table.to_string())
            .or_default()
            .insert((parent_id, related_id));
    }

    /// Make every later insert into `table` fail
    pub fn fail_inserts_into(&self, table: &str) {
        self.failing_tables.lock().insert(table.to_string());
    }

    pub fn count(&self, table: &str) -> usize {
        self.committed.lock().table(table).map_or(0, BTreeMap::len)
    }

    pub fn row(&self, table: &str, id: Id) -> Option<Fields> {
        self.committed
            .lock()
            .table(table)
            .and_then(|rows| rows.get(&id).cloned())
    }

    /// All committed rows of a table in key order
    pub fn rows(&self, table: &str) -> Vec<(Id, Fields)> {
        self.committed
            .lock()
            .table(table)
            .map(|rows| rows.iter().map(|(id, f)| (*id, f.clone())).collect())
            .unwrap_or_default()
    }

    /// Committed related keys linked to `parent_id`
    pub fn members(&self, pivot_table: &str, parent_id: Id) -> Vec<Id> {
        self.committed
            .lock()
            .pivots
            .get(pivot_table)
            .map(|links| {
                links
                    .iter()
                    .filter(|(parent, _)| *parent == parent_id)
                    .map(|(_, related)| *related)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction> {
        let working = self.committed.lock().clone();
        Ok(MemoryTransaction {
            committed: Arc::clone(&self.committed),
            failing_tables: self.failing_tables.lock().clone(),
            working,
        })
    }
}

#[derive(Debug)]
pub struct MemoryTransaction {
    committed: Arc<Mutex<Tables>>,
    failing_tables: HashSet<String>,
    working: Tables,
}

impl MemoryTransaction {
    fn matches(fields: &Fields, column: &str, expected: Id) -> bool {
        fields.get(column).and_then(key_from_value) == Some(expected)
    }
}

#[async_trait::async_trait]
impl EntityRepository for MemoryTransaction {
    async fn find(&mut self, model: &EntityModel, id: Id) -> Result<Option<Entity>> {
        Ok(self
            .working
            .table(&model.table)
            .and_then(|rows| rows.get(&id))
            .map(|fields| Entity::from_row(model.name.clone(), id, fields.clone())))
    }

    async fn insert(&mut self, model: &EntityModel, fields: &Fields) -> Result<Id> {
        if self.failing_tables.contains(&model.table) {
            return Err(anyhow!("Failed to insert into {}", model.table));
        }
        let id = self.working.next_id(&model.table);
        self.working
            .rows
            .entry(model.table.clone())
            .or_default()
            .insert(id, fields.clone());
        Ok(id)
    }

    async fn update(&mut self, model: &EntityModel, id: Id, fields: &Fields) -> Result<()> {
        let row = self
            .working
            .rows
            .get_mut(&model.table)
            .and_then(|rows| rows.get_mut(&id))
            .ok_or_else(|| anyhow!("{} #{} not found for update", model.name, id))?;
        for (column, value) in fields {
            row.insert(column.clone(), value.clone());
        }
        Ok(())
    }

    async fn delete(&mut self, model: &EntityModel, id: Id) -> Result<bool> {
        Ok(self
            .working
            .rows
            .get_mut(&model.table)
            .and_then(|rows| rows.remove(&id))
            .is_some())
    }

    async fn list_children(
        &mut self,
        child: &EntityModel,
        relation: &RelationDescriptor,
        parent_id: Id,
    ) -> Result<Vec<Id>> {
        let Some(rows) = self.working.table(&child.table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|(_, fields)| Self::matches(fields, &relation.foreign_key, parent_id))
            .filter(|(_, fields)| match &relation.type_column {
                Some(column) => {
                    fields.get(column).and_then(Value::as_str)
                        == Some(relation.owner_alias.as_str())
                }
                None => true,
            })
            .map(|(id, _)| *id)
            .collect())
    }

    async fn sync_membership(
        &mut self,
        relation: &RelationDescriptor,
        parent_id: Id,
        related_ids: &[Id],
    ) -> Result<()> {
        let pivot = relation
            .pivot
            .as_ref()
            .ok_or_else(|| anyhow!("Relation '{}' has no join table", relation.name))?;
        let links = self.working.pivots.entry(pivot.table.clone()).or_default();
        links.retain(|(parent, related)| *parent != parent_id || related_ids.contains(related));
        for related in related_ids {
            links.insert((parent_id, *related));
        }
        Ok(())
    }

    async fn value_exists(
        &mut self,
        model: &EntityModel,
        column: &str,
        value: &Value,
        ignore_id: Option<Id>,
    ) -> Result<bool> {
        let Some(rows) = self.working.table(&model.table) else {
            return Ok(false);
        };
        let wanted = value_text(value);
        Ok(rows
            .iter()
            .filter(|(id, _)| Some(**id) != ignore_id)
            .any(|(id, fields)| {
                if column == model.primary_key {
                    wanted.as_deref() == Some(id.to_string().as_str())
                } else {
                    fields.get(column).and_then(value_text) == wanted
                }
            }))
    }
}

#[async_trait::async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self) -> Result<()> {
        *self.committed.lock() = self.working;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
