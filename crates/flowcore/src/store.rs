//! Storage contracts shared by every backend.
//!
//! All reads and writes are scoped by account id. `get_*` and `delete_*` on an
//! absent key fail with [`StoreError::NotFound`]; deleting twice is an error.

use crate::model::{
    Account, ExecutionLog, ExecutionStatus, FlowMetadata, Secret, SecretMetadata,
};
use crate::StoreError;
use async_trait::async_trait;
use std::sync::Arc;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Upsert a flow definition. The bytes are stored verbatim.
    async fn save_flow(&self, account_id: &str, flow_id: &str, definition: &[u8]) -> StoreResult<()>;

    async fn get_flow(&self, account_id: &str, flow_id: &str) -> StoreResult<Vec<u8>>;

    async fn list_flows(&self, account_id: &str) -> StoreResult<Vec<String>>;

    async fn delete_flow(&self, account_id: &str, flow_id: &str) -> StoreResult<()>;

    async fn get_flow_metadata(&self, account_id: &str, flow_id: &str) -> StoreResult<FlowMetadata>;

    async fn list_flows_with_metadata(&self, account_id: &str) -> StoreResult<Vec<FlowMetadata>>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn save_secret(&self, secret: Secret) -> StoreResult<()>;

    async fn get_secret(&self, account_id: &str, key: &str) -> StoreResult<Secret>;

    async fn list_secrets(&self, account_id: &str) -> StoreResult<Vec<SecretMetadata>>;

    async fn delete_secret(&self, account_id: &str, key: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Upsert an execution. The account binding recorded by the first save
    /// wins over whatever later saves carry, and terminal executions reject
    /// further saves with [`StoreError::Finalized`].
    async fn save_execution(&self, execution: ExecutionStatus) -> StoreResult<()>;

    async fn get_execution(&self, execution_id: &str) -> StoreResult<ExecutionStatus>;

    async fn list_executions(&self, account_id: &str) -> StoreResult<Vec<ExecutionStatus>>;

    /// Removes the execution together with its logs.
    async fn delete_execution(&self, execution_id: &str) -> StoreResult<()>;

    /// Append a log entry. Unknown execution ids are rejected.
    async fn save_execution_log(&self, execution_id: &str, log: ExecutionLog) -> StoreResult<()>;

    /// Logs in append order.
    async fn get_execution_logs(&self, execution_id: &str) -> StoreResult<Vec<ExecutionLog>>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Upsert an account and keep the username and token indexes in step.
    async fn save_account(&self, account: Account) -> StoreResult<()>;

    async fn get_account(&self, id: &str) -> StoreResult<Account>;

    async fn get_account_by_username(&self, username: &str) -> StoreResult<Account>;

    async fn get_account_by_token(&self, token: &str) -> StoreResult<Account>;

    async fn list_accounts(&self) -> StoreResult<Vec<Account>>;

    async fn delete_account(&self, id: &str) -> StoreResult<()>;
}

/// A storage backend bundling the four stores
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Prepare backing tables/buckets. Safe to call more than once.
    async fn initialize(&self) -> StoreResult<()>;

    fn flow_store(&self) -> Arc<dyn FlowStore>;

    fn secret_store(&self) -> Arc<dyn SecretStore>;

    fn execution_store(&self) -> Arc<dyn ExecutionStore>;

    fn account_store(&self) -> Arc<dyn AccountStore>;

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}
