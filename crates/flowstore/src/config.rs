use crate::{LocalTableClient, MemoryProvider, TableProvider};
use flowcore::{StorageProvider, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Backend selection, made once at construction time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Process-local maps
    Memory,

    /// Table layout over the in-process table client
    Table { table_prefix: String },

    /// Table layout over JetStream key-value buckets
    #[cfg(feature = "nats")]
    Nats { url: String, table_prefix: String },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

impl StorageConfig {
    /// Read `FLOWRUNNER_STORAGE` (`memory`, `table` or `nats`),
    /// `FLOWRUNNER_TABLE_PREFIX` and `FLOWRUNNER_NATS_URL`.
    pub fn from_env() -> StoreResult<Self> {
        let backend = std::env::var("FLOWRUNNER_STORAGE").unwrap_or_else(|_| "memory".to_string());
        let table_prefix =
            std::env::var("FLOWRUNNER_TABLE_PREFIX").unwrap_or_else(|_| "flowrunner_".to_string());

        match backend.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "table" => Ok(Self::Table { table_prefix }),
            #[cfg(feature = "nats")]
            "nats" => Ok(Self::Nats {
                url: std::env::var("FLOWRUNNER_NATS_URL")
                    .unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string()),
                table_prefix,
            }),
            other => Err(StoreError::backend(format!(
                "unsupported storage backend: {}",
                other
            ))),
        }
    }

    /// Build and initialize the configured provider.
    pub async fn build(&self) -> StoreResult<Arc<dyn StorageProvider>> {
        let provider: Arc<dyn StorageProvider> = match self {
            Self::Memory => Arc::new(MemoryProvider::new()),
            Self::Table { table_prefix } => Arc::new(TableProvider::new(
                Arc::new(LocalTableClient::new()),
                table_prefix,
            )),
            #[cfg(feature = "nats")]
            Self::Nats { url, table_prefix } => {
                let client = crate::NatsTableClient::connect(url).await?;
                Arc::new(TableProvider::new(Arc::new(client), table_prefix))
            }
        };

        tracing::info!(config = ?self, "Initializing storage provider");
        provider.initialize().await?;
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_tagged_backends() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"backend":"table","table_prefix":"test_"}"#).unwrap();
        assert_eq!(
            config,
            StorageConfig::Table {
                table_prefix: "test_".into()
            }
        );

        let config: StorageConfig = serde_json::from_str(r#"{"backend":"memory"}"#).unwrap();
        assert_eq!(config, StorageConfig::default());
    }
}
