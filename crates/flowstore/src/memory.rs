//! In-process backend: keyed maps behind `parking_lot` locks.

use crate::merge_execution;
use async_trait::async_trait;
use chrono::Utc;
use flowcore::{
    Account, AccountStore, ExecutionLog, ExecutionStatus, ExecutionStore, FlowMetadata, FlowStore,
    Secret, SecretMetadata, SecretStore, StorageProvider, StoreError, StoreResult,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Provider bundling the four in-memory stores
#[derive(Clone, Default)]
pub struct MemoryProvider {
    flows: Arc<MemoryFlowStore>,
    secrets: Arc<MemorySecretStore>,
    executions: Arc<MemoryExecutionStore>,
    accounts: Arc<MemoryAccountStore>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    async fn initialize(&self) -> StoreResult<()> {
        tracing::debug!("In-memory storage ready");
        Ok(())
    }

    fn flow_store(&self) -> Arc<dyn FlowStore> {
        self.flows.clone()
    }

    fn secret_store(&self) -> Arc<dyn SecretStore> {
        self.secrets.clone()
    }

    fn execution_store(&self) -> Arc<dyn ExecutionStore> {
        self.executions.clone()
    }

    fn account_store(&self) -> Arc<dyn AccountStore> {
        self.accounts.clone()
    }
}

struct StoredFlow {
    definition: Vec<u8>,
    metadata: FlowMetadata,
}

/// Flow definitions keyed by (account, flow)
#[derive(Default)]
pub struct MemoryFlowStore {
    flows: RwLock<HashMap<(String, String), StoredFlow>>,
}

impl MemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowStore for MemoryFlowStore {
    async fn save_flow(&self, account_id: &str, flow_id: &str, definition: &[u8]) -> StoreResult<()> {
        let key = (account_id.to_string(), flow_id.to_string());
        let mut flows = self.flows.write();
        let created_at = flows
            .get(&key)
            .map(|f| f.metadata.created_at)
            .unwrap_or_else(Utc::now);
        let metadata = FlowMetadata::from_definition(account_id, flow_id, definition, created_at);
        flows.insert(
            key,
            StoredFlow {
                definition: definition.to_vec(),
                metadata,
            },
        );
        Ok(())
    }

    async fn get_flow(&self, account_id: &str, flow_id: &str) -> StoreResult<Vec<u8>> {
        self.flows
            .read()
            .get(&(account_id.to_string(), flow_id.to_string()))
            .map(|f| f.definition.clone())
            .ok_or_else(|| StoreError::not_found("flow", flow_id))
    }

    async fn list_flows(&self, account_id: &str) -> StoreResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .flows
            .read()
            .keys()
            .filter(|(account, _)| account == account_id)
            .map(|(_, flow)| flow.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete_flow(&self, account_id: &str, flow_id: &str) -> StoreResult<()> {
        self.flows
            .write()
            .remove(&(account_id.to_string(), flow_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("flow", flow_id))
    }

    async fn get_flow_metadata(&self, account_id: &str, flow_id: &str) -> StoreResult<FlowMetadata> {
        self.flows
            .read()
            .get(&(account_id.to_string(), flow_id.to_string()))
            .map(|f| f.metadata.clone())
            .ok_or_else(|| StoreError::not_found("flow", flow_id))
    }

    async fn list_flows_with_metadata(&self, account_id: &str) -> StoreResult<Vec<FlowMetadata>> {
        let mut metadata: Vec<FlowMetadata> = self
            .flows
            .read()
            .iter()
            .filter(|((account, _), _)| account == account_id)
            .map(|(_, f)| f.metadata.clone())
            .collect();
        metadata.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(metadata)
    }
}

/// Secrets keyed by (account, key)
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<(String, String), Secret>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn save_secret(&self, secret: Secret) -> StoreResult<()> {
        self.secrets
            .write()
            .insert((secret.account_id.clone(), secret.key.clone()), secret);
        Ok(())
    }

    async fn get_secret(&self, account_id: &str, key: &str) -> StoreResult<Secret> {
        self.secrets
            .read()
            .get(&(account_id.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found("secret", key))
    }

    async fn list_secrets(&self, account_id: &str) -> StoreResult<Vec<SecretMetadata>> {
        let mut secrets: Vec<SecretMetadata> = self
            .secrets
            .read()
            .values()
            .filter(|s| s.account_id == account_id)
            .map(Secret::metadata)
            .collect();
        secrets.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(secrets)
    }

    async fn delete_secret(&self, account_id: &str, key: &str) -> StoreResult<()> {
        self.secrets
            .write()
            .remove(&(account_id.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("secret", key))
    }
}

#[derive(Default)]
struct ExecutionTables {
    executions: HashMap<String, ExecutionStatus>,
    logs: HashMap<String, Vec<ExecutionLog>>,
}

/// Executions and their logs behind one lock
#[derive(Default)]
pub struct MemoryExecutionStore {
    tables: RwLock<ExecutionTables>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn save_execution(&self, execution: ExecutionStatus) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let merged = merge_execution(tables.executions.get(&execution.id), execution)?;
        tables.executions.insert(merged.id.clone(), merged);
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> StoreResult<ExecutionStatus> {
        self.tables
            .read()
            .executions
            .get(execution_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("execution", execution_id))
    }

    async fn list_executions(&self, account_id: &str) -> StoreResult<Vec<ExecutionStatus>> {
        let mut executions: Vec<ExecutionStatus> = self
            .tables
            .read()
            .executions
            .values()
            .filter(|e| e.account_id.as_deref() == Some(account_id))
            .cloned()
            .collect();
        executions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(executions)
    }

    async fn delete_execution(&self, execution_id: &str) -> StoreResult<()> {
        let mut tables = self.tables.write();
        tables
            .executions
            .remove(execution_id)
            .ok_or_else(|| StoreError::not_found("execution", execution_id))?;
        tables.logs.remove(execution_id);
        Ok(())
    }

    async fn save_execution_log(&self, execution_id: &str, log: ExecutionLog) -> StoreResult<()> {
        let mut tables = self.tables.write();
        if !tables.executions.contains_key(execution_id) {
            return Err(StoreError::not_found("execution", execution_id));
        }
        tables
            .logs
            .entry(execution_id.to_string())
            .or_default()
            .push(log);
        Ok(())
    }

    async fn get_execution_logs(&self, execution_id: &str) -> StoreResult<Vec<ExecutionLog>> {
        let tables = self.tables.read();
        if !tables.executions.contains_key(execution_id) {
            return Err(StoreError::not_found("execution", execution_id));
        }
        Ok(tables.logs.get(execution_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct AccountTables {
    by_id: HashMap<String, Account>,
    by_username: HashMap<String, String>,
    by_token: HashMap<String, String>,
}

/// Accounts plus the username and token indexes, updated under one lock
#[derive(Default)]
pub struct MemoryAccountStore {
    tables: RwLock<AccountTables>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn save_account(&self, account: Account) -> StoreResult<()> {
        let mut tables = self.tables.write();

        if let Some(owner) = tables.by_username.get(&account.username) {
            if owner != &account.id {
                return Err(StoreError::Conflict(format!(
                    "username '{}' is taken",
                    account.username
                )));
            }
        }
        if let Some(owner) = tables.by_token.get(&account.api_token) {
            if owner != &account.id {
                return Err(StoreError::Conflict("API token is already bound".to_string()));
            }
        }

        if let Some(previous) = tables.by_id.get(&account.id).cloned() {
            if previous.username != account.username {
                tables.by_username.remove(&previous.username);
            }
            if previous.api_token != account.api_token {
                tables.by_token.remove(&previous.api_token);
            }
        }

        tables
            .by_username
            .insert(account.username.clone(), account.id.clone());
        if !account.api_token.is_empty() {
            tables
                .by_token
                .insert(account.api_token.clone(), account.id.clone());
        }
        tables.by_id.insert(account.id.clone(), account);
        Ok(())
    }

    async fn get_account(&self, id: &str) -> StoreResult<Account> {
        self.tables
            .read()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("account", id))
    }

    async fn get_account_by_username(&self, username: &str) -> StoreResult<Account> {
        let tables = self.tables.read();
        tables
            .by_username
            .get(username)
            .and_then(|id| tables.by_id.get(id))
            .cloned()
            .ok_or_else(|| StoreError::not_found("account", username))
    }

    async fn get_account_by_token(&self, token: &str) -> StoreResult<Account> {
        let tables = self.tables.read();
        tables
            .by_token
            .get(token)
            .and_then(|id| tables.by_id.get(id))
            .cloned()
            .ok_or_else(|| StoreError::not_found("account", "<token>"))
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self.tables.read().by_id.values().cloned().collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }

    async fn delete_account(&self, id: &str) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let account = tables
            .by_id
            .remove(id)
            .ok_or_else(|| StoreError::not_found("account", id))?;
        tables.by_username.remove(&account.username);
        tables.by_token.remove(&account.api_token);
        Ok(())
    }
}
