//! Table-service backend.
//!
//! Every logical entity lives in its own table named `<prefix><entity>`, so
//! several deployments can share one service. Items are JSON documents
//! addressed by a composite `(partition, sort)` key; the partition is the
//! account id wherever the entity is account-scoped. Only single-item
//! atomicity is assumed from the service.

mod local;
#[cfg(feature = "nats")]
mod nats;
mod provider;

pub use local::LocalTableClient;
#[cfg(feature = "nats")]
pub use nats::NatsTableClient;
pub use provider::{
    TableAccountStore, TableExecutionStore, TableFlowStore, TableProvider, TableSecretStore,
};

use async_trait::async_trait;
use flowcore::StoreResult;
use serde_json::Value;

/// Composite item key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey {
    pub partition: String,
    pub sort: String,
}

impl ItemKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

/// Minimal document-table API the stores are written against
#[async_trait]
pub trait TableClient: Send + Sync {
    /// Create `table` unless it already exists.
    async fn create_table(&self, table: &str) -> StoreResult<()>;

    async fn delete_table(&self, table: &str) -> StoreResult<()>;

    /// Write an item, replacing any previous one under the same key.
    async fn put_item(&self, table: &str, key: ItemKey, item: Value) -> StoreResult<()>;

    async fn get_item(&self, table: &str, key: &ItemKey) -> StoreResult<Option<Value>>;

    /// Remove an item and hand back what was stored, if anything.
    async fn delete_item(&self, table: &str, key: &ItemKey) -> StoreResult<Option<Value>>;

    /// All items of one partition as `(sort key, item)`, ordered by sort key.
    async fn query(&self, table: &str, partition: &str) -> StoreResult<Vec<(String, Value)>>;
}

/// Physical table names for one deployment prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub flows: String,
    pub secrets: String,
    pub executions: String,
    pub execution_logs: String,
    pub account_executions: String,
    pub accounts: String,
    pub account_usernames: String,
    pub account_tokens: String,
}

impl TableNames {
    pub fn with_prefix(prefix: &str) -> Self {
        let name = |entity: &str| format!("{}{}", prefix, entity);
        Self {
            flows: name("flows"),
            secrets: name("secrets"),
            executions: name("executions"),
            execution_logs: name("execution_logs"),
            account_executions: name("account_executions"),
            accounts: name("accounts"),
            account_usernames: name("account_usernames"),
            account_tokens: name("account_tokens"),
        }
    }

    pub fn all(&self) -> [&str; 8] {
        [
            self.flows.as_str(),
            self.secrets.as_str(),
            self.executions.as_str(),
            self.execution_logs.as_str(),
            self.account_executions.as_str(),
            self.accounts.as_str(),
            self.account_usernames.as_str(),
            self.account_tokens.as_str(),
        ]
    }
}
