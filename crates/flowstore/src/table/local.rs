use super::{ItemKey, TableClient};
use async_trait::async_trait;
use flowcore::{StoreError, StoreResult};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// In-process stand-in for the table service
///
/// Behaves like the remote service for everything the stores rely on:
/// missing tables are an error, writes are per-item atomic and partitions
/// come back sorted.
#[derive(Default)]
pub struct LocalTableClient {
    tables: RwLock<HashMap<String, BTreeMap<ItemKey, Value>>>,
}

impl LocalTableClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }
}

fn missing_table(table: &str) -> StoreError {
    StoreError::backend(format!("table '{}' does not exist", table))
}

#[async_trait]
impl TableClient for LocalTableClient {
    async fn create_table(&self, table: &str) -> StoreResult<()> {
        self.tables.write().entry(table.to_string()).or_default();
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> StoreResult<()> {
        self.tables
            .write()
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| missing_table(table))
    }

    async fn put_item(&self, table: &str, key: ItemKey, item: Value) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let items = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        items.insert(key, item);
        Ok(())
    }

    async fn get_item(&self, table: &str, key: &ItemKey) -> StoreResult<Option<Value>> {
        let tables = self.tables.read();
        let items = tables.get(table).ok_or_else(|| missing_table(table))?;
        Ok(items.get(key).cloned())
    }

    async fn delete_item(&self, table: &str, key: &ItemKey) -> StoreResult<Option<Value>> {
        let mut tables = self.tables.write();
        let items = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        Ok(items.remove(key))
    }

    async fn query(&self, table: &str, partition: &str) -> StoreResult<Vec<(String, Value)>> {
        let tables = self.tables.read();
        let items = tables.get(table).ok_or_else(|| missing_table(table))?;
        Ok(items
            .range(ItemKey::new(partition, "")..)
            .take_while(|(key, _)| key.partition == partition)
            .map(|(key, item)| (key.sort.clone(), item.clone()))
            .collect())
    }
}
