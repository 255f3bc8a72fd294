//! JetStream key-value buckets as the table service.
//!
//! One bucket per table. Composite keys are encoded as
//! `p<partition>.s<sort>` with URL-safe base64 segments, which keeps them
//! inside the NATS key alphabet.

use super::{ItemKey, TableClient};
use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use flowcore::{StoreError, StoreResult};
use futures::StreamExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

pub struct NatsTableClient {
    jetstream: jetstream::Context,
    buckets: RwLock<HashMap<String, kv::Store>>,
}

impl NatsTableClient {
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            jetstream: jetstream::new(client),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub async fn connect(url: &str) -> StoreResult<Self> {
        tracing::info!("Connecting to NATS server: {}", url);
        let client = async_nats::connect(url)
            .await
            .map_err(|e| StoreError::backend(format!("NATS connection failed: {}", e)))?;
        Ok(Self::new(client))
    }

    async fn bucket(&self, table: &str) -> StoreResult<kv::Store> {
        let cached = self.buckets.read().get(table).cloned();
        if let Some(store) = cached {
            return Ok(store);
        }
        let store = self
            .jetstream
            .get_key_value(table)
            .await
            .map_err(|e| StoreError::backend(format!("table '{}' does not exist: {}", table, e)))?;
        self.buckets.write().insert(table.to_string(), store.clone());
        Ok(store)
    }

    fn partition_prefix(partition: &str) -> String {
        format!("p{}.s", URL_SAFE_NO_PAD.encode(partition))
    }

    fn encode_key(key: &ItemKey) -> String {
        format!(
            "{}{}",
            Self::partition_prefix(&key.partition),
            URL_SAFE_NO_PAD.encode(&key.sort)
        )
    }

    fn decode_sort(encoded: &str) -> StoreResult<String> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl TableClient for NatsTableClient {
    async fn create_table(&self, table: &str) -> StoreResult<()> {
        if self.jetstream.get_key_value(table).await.is_ok() {
            tracing::debug!(bucket = %table, "Using existing KV bucket");
            return Ok(());
        }
        tracing::debug!(bucket = %table, "Creating KV bucket");
        let store = self
            .jetstream
            .create_key_value(kv::Config {
                bucket: table.to_string(),
                history: 1,
                ..Default::default()
            })
            .await
            .map_err(|e| StoreError::backend(format!("kv_create: {}", e)))?;
        self.buckets.write().insert(table.to_string(), store);
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> StoreResult<()> {
        self.buckets.write().remove(table);
        self.jetstream
            .delete_key_value(table)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::backend(format!("kv_delete_bucket: {}", e)))
    }

    async fn put_item(&self, table: &str, key: ItemKey, item: Value) -> StoreResult<()> {
        let store = self.bucket(table).await?;
        let payload = serde_json::to_vec(&item)?;
        store
            .put(Self::encode_key(&key), payload.into())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::backend(format!("kv_put: {}", e)))
    }

    async fn get_item(&self, table: &str, key: &ItemKey) -> StoreResult<Option<Value>> {
        let store = self.bucket(table).await?;
        let entry = store
            .get(Self::encode_key(key))
            .await
            .map_err(|e| StoreError::backend(format!("kv_get: {}", e)))?;
        match entry {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete_item(&self, table: &str, key: &ItemKey) -> StoreResult<Option<Value>> {
        let previous = self.get_item(table, key).await?;
        if previous.is_some() {
            let store = self.bucket(table).await?;
            store
                .purge(Self::encode_key(key))
                .await
                .map_err(|e| StoreError::backend(format!("kv_delete: {}", e)))?;
        }
        Ok(previous)
    }

    async fn query(&self, table: &str, partition: &str) -> StoreResult<Vec<(String, Value)>> {
        let store = self.bucket(table).await?;
        let prefix = Self::partition_prefix(partition);

        let mut keys = store
            .keys()
            .await
            .map_err(|e| StoreError::backend(format!("kv_keys: {}", e)))?;
        let mut matching = Vec::new();
        while let Some(key) = keys.next().await {
            match key {
                Ok(key) if key.starts_with(&prefix) => matching.push(key),
                Ok(_) => {}
                Err(e) => tracing::warn!(bucket = %table, error = %e, "Error reading key from bucket"),
            }
        }

        let mut items = Vec::with_capacity(matching.len());
        for key in matching {
            let sort = Self::decode_sort(&key[prefix.len()..])?;
            let entry = store
                .get(&key)
                .await
                .map_err(|e| StoreError::backend(format!("kv_get: {}", e)))?;
            // Purged between listing and reading.
            if let Some(bytes) = entry {
                items.push((sort, serde_json::from_slice(&bytes)?));
            }
        }
        items.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(items)
    }
}
