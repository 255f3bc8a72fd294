use super::{ItemKey, TableClient, TableNames};
use crate::merge_execution;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use flowcore::{
    Account, AccountStore, ExecutionLog, ExecutionStatus, ExecutionStore, FlowMetadata, FlowStore,
    Secret, SecretMetadata, SecretStore, StorageProvider, StoreError, StoreResult,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Sort key of the single status item in an execution's partition
const EXECUTION_ITEM: &str = "status";
const ACCOUNTS_PARTITION: &str = "accounts";
const USERNAMES_PARTITION: &str = "usernames";
const TOKENS_PARTITION: &str = "tokens";

fn to_item<T: Serialize>(value: &T) -> StoreResult<Value> {
    Ok(serde_json::to_value(value)?)
}

fn from_item<T: DeserializeOwned>(item: Value) -> StoreResult<T> {
    Ok(serde_json::from_value(item)?)
}

/// Provider over any [`TableClient`], one table per entity
pub struct TableProvider {
    client: Arc<dyn TableClient>,
    names: TableNames,
    flows: Arc<TableFlowStore>,
    secrets: Arc<TableSecretStore>,
    executions: Arc<TableExecutionStore>,
    accounts: Arc<TableAccountStore>,
}

impl TableProvider {
    pub fn new(client: Arc<dyn TableClient>, table_prefix: &str) -> Self {
        let names = TableNames::with_prefix(table_prefix);
        Self {
            flows: Arc::new(TableFlowStore::new(client.clone(), &names)),
            secrets: Arc::new(TableSecretStore::new(client.clone(), &names)),
            executions: Arc::new(TableExecutionStore::new(client.clone(), &names)),
            accounts: Arc::new(TableAccountStore::new(client.clone(), &names)),
            client,
            names,
        }
    }

    pub fn names(&self) -> &TableNames {
        &self.names
    }

    /// Drop every table of this deployment prefix.
    pub async fn drop_tables(&self) -> StoreResult<()> {
        for table in self.names.all() {
            self.client.delete_table(table).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for TableProvider {
    async fn initialize(&self) -> StoreResult<()> {
        for table in self.names.all() {
            self.client.create_table(table).await?;
        }
        tracing::info!(flows_table = %self.names.flows, "Table storage initialized");
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

#[derive(Serialize, Deserialize)]
struct FlowItem {
    /// Base64 of the raw definition bytes
    definition: String,
    metadata: FlowMetadata,
}

pub struct TableFlowStore {
    client: Arc<dyn TableClient>,
    table: String,
}

impl TableFlowStore {
    pub fn new(client: Arc<dyn TableClient>, names: &TableNames) -> Self {
        Self {
            client,
            table: names.flows.clone(),
        }
    }

    async fn load(&self, account_id: &str, flow_id: &str) -> StoreResult<FlowItem> {
        let item = self
            .client
            .get_item(&self.table, &ItemKey::new(account_id, flow_id))
            .await?
            .ok_or_else(|| StoreError::not_found("flow", flow_id))?;
        from_item(item)
    }
}

#[async_trait]
impl FlowStore for TableFlowStore {
    async fn save_flow(&self, account_id: &str, flow_id: &str, definition: &[u8]) -> StoreResult<()> {
        let created_at = match self.load(account_id, flow_id).await {
            Ok(existing) => existing.metadata.created_at,
            Err(e) if e.is_not_found() => Utc::now(),
            Err(e) => return Err(e),
        };
        let item = FlowItem {
            definition: STANDARD.encode(definition),
            metadata: FlowMetadata::from_definition(account_id, flow_id, definition, created_at),
        };
        self.client
            .put_item(&self.table, ItemKey::new(account_id, flow_id), to_item(&item)?)
            .await
    }

    async fn get_flow(&self, account_id: &str, flow_id: &str) -> StoreResult<Vec<u8>> {
        let item = self.load(account_id, flow_id).await?;
        STANDARD
            .decode(item.definition)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn list_flows(&self, account_id: &str) -> StoreResult<Vec<String>> {
        let items = self.client.query(&self.table, account_id).await?;
        Ok(items.into_iter().map(|(flow_id, _)| flow_id).collect())
    }

    async fn delete_flow(&self, account_id: &str, flow_id: &str) -> StoreResult<()> {
        self.client
            .delete_item(&self.table, &ItemKey::new(account_id, flow_id))
            .await?
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("flow", flow_id))
    }

    async fn get_flow_metadata(&self, account_id: &str, flow_id: &str) -> StoreResult<FlowMetadata> {
        Ok(self.load(account_id, flow_id).await?.metadata)
    }

    async fn list_flows_with_metadata(&self, account_id: &str) -> StoreResult<Vec<FlowMetadata>> {
        self.client
            .query(&self.table, account_id)
            .await?
            .into_iter()
            .map(|(_, item)| from_item::<FlowItem>(item).map(|f| f.metadata))
            .collect()
    }
}

pub struct TableSecretStore {
    client: Arc<dyn TableClient>,
    table: String,
}

impl TableSecretStore {
    pub fn new(client: Arc<dyn TableClient>, names: &TableNames) -> Self {
        Self {
            client,
            table: names.secrets.clone(),
        }
    }
}

#[async_trait]
impl SecretStore for TableSecretStore {
    async fn save_secret(&self, secret: Secret) -> StoreResult<()> {
        let key = ItemKey::new(secret.account_id.clone(), secret.key.clone());
        self.client.put_item(&self.table, key, to_item(&secret)?).await
    }

    async fn get_secret(&self, account_id: &str, key: &str) -> StoreResult<Secret> {
        let item = self
            .client
            .get_item(&self.table, &ItemKey::new(account_id, key))
            .await?
            .ok_or_else(|| StoreError::not_found("secret", key))?;
        from_item(item)
    }

    async fn list_secrets(&self, account_id: &str) -> StoreResult<Vec<SecretMetadata>> {
        self.client
            .query(&self.table, account_id)
            .await?
            .into_iter()
            .map(|(_, item)| from_item::<Secret>(item).map(|s| s.metadata()))
            .collect()
    }

    async fn delete_secret(&self, account_id: &str, key: &str) -> StoreResult<()> {
        self.client
            .delete_item(&self.table, &ItemKey::new(account_id, key))
            .await?
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("secret", key))
    }
}

/// Executions keyed by execution id, logs in a partition per execution and
/// an account -> execution index for listing.
pub struct TableExecutionStore {
    client: Arc<dyn TableClient>,
    executions: String,
    logs: String,
    account_index: String,
    last_log_nanos: AtomicI64,
}

impl TableExecutionStore {
    pub fn new(client: Arc<dyn TableClient>, names: &TableNames) -> Self {
        Self {
            client,
            executions: names.executions.clone(),
            logs: names.execution_logs.clone(),
            account_index: names.account_executions.clone(),
            last_log_nanos: AtomicI64::new(0),
        }
    }

    async fn load(&self, execution_id: &str) -> StoreResult<Option<ExecutionStatus>> {
        self.client
            .get_item(&self.executions, &ItemKey::new(execution_id, EXECUTION_ITEM))
            .await?
            .map(from_item)
            .transpose()
    }

    async fn require(&self, execution_id: &str) -> StoreResult<ExecutionStatus> {
        self.load(execution_id)
            .await?
            .ok_or_else(|| StoreError::not_found("execution", execution_id))
    }

    fn next_log_key(&self) -> String {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        format!("{:020}", next_log_stamp(&self.last_log_nanos, now))
    }
}

/// Nanosecond stamp for the next log entry: `now`, but always past the last
/// one issued, so a clock stepping backwards never reorders a log.
fn next_log_stamp(last: &AtomicI64, now: i64) -> i64 {
    let previous = last
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| {
            Some(now.max(prev.saturating_add(1)))
        })
        .unwrap_or_else(|prev| prev);
    now.max(previous.saturating_add(1))
}

#[async_trait]
impl ExecutionStore for TableExecutionStore {
    async fn save_execution(&self, execution: ExecutionStatus) -> StoreResult<()> {
        let existing = self.load(&execution.id).await?;
        let merged = merge_execution(existing.as_ref(), execution)?;

        self.client
            .put_item(
                &self.executions,
                ItemKey::new(merged.id.clone(), EXECUTION_ITEM),
                to_item(&merged)?,
            )
            .await?;

        if let Some(account_id) = &merged.account_id {
            self.client
                .put_item(
                    &self.account_index,
                    ItemKey::new(account_id.clone(), merged.id.clone()),
                    json!({ "execution_id": merged.id }),
                )
                .await?;
        }
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> StoreResult<ExecutionStatus> {
        self.require(execution_id).await
    }

    async fn list_executions(&self, account_id: &str) -> StoreResult<Vec<ExecutionStatus>> {
        let index = self.client.query(&self.account_index, account_id).await?;
        let mut executions = Vec::with_capacity(index.len());
        for (execution_id, _) in index {
            // The index is written after the record, so a miss is a stale entry.
            if let Some(execution) = self.load(&execution_id).await? {
                executions.push(execution);
            }
        }
        Ok(executions)
    }

    async fn delete_execution(&self, execution_id: &str) -> StoreResult<()> {
        let removed = self
            .client
            .delete_item(&self.executions, &ItemKey::new(execution_id, EXECUTION_ITEM))
            .await?
            .ok_or_else(|| StoreError::not_found("execution", execution_id))?;
        let removed: ExecutionStatus = from_item(removed)?;

        if let Some(account_id) = removed.account_id {
            self.client
                .delete_item(&self.account_index, &ItemKey::new(account_id, execution_id))
                .await?;
        }
        for (sort, _) in self.client.query(&self.logs, execution_id).await? {
            self.client
                .delete_item(&self.logs, &ItemKey::new(execution_id, sort))
                .await?;
        }
        Ok(())
    }

    async fn save_execution_log(&self, execution_id: &str, log: ExecutionLog) -> StoreResult<()> {
        self.require(execution_id).await?;
        let key = ItemKey::new(execution_id, self.next_log_key());
        self.client.put_item(&self.logs, key, to_item(&log)?).await
    }

    async fn get_execution_logs(&self, execution_id: &str) -> StoreResult<Vec<ExecutionLog>> {
        self.require(execution_id).await?;
        self.client
            .query(&self.logs, execution_id)
            .await?
            .into_iter()
            .map(|(_, item)| from_item(item))
            .collect()
    }
}

/// Accounts plus username and token index tables. Index entries are checked
/// against the account record on every read, so a stale entry left by an
/// interrupted update never resolves to the wrong account.
pub struct TableAccountStore {
    client: Arc<dyn TableClient>,
    accounts: String,
    usernames: String,
    tokens: String,
}

impl TableAccountStore {
    pub fn new(client: Arc<dyn TableClient>, names: &TableNames) -> Self {
        Self {
            client,
            accounts: names.accounts.clone(),
            usernames: names.account_usernames.clone(),
            tokens: names.account_tokens.clone(),
        }
    }

    async fn load(&self, id: &str) -> StoreResult<Option<Account>> {
        self.client
            .get_item(&self.accounts, &ItemKey::new(ACCOUNTS_PARTITION, id))
            .await?
            .map(from_item)
            .transpose()
    }

    async fn indexed_id(&self, table: &str, partition: &str, key: &str) -> StoreResult<Option<String>> {
        let item = self
            .client
            .get_item(table, &ItemKey::new(partition, key))
            .await?;
        Ok(item
            .as_ref()
            .and_then(|i| i.get("account_id"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Resolve an index entry to the account it still describes.
    async fn resolve(
        &self,
        table: &str,
        partition: &str,
        key: &str,
        matches: impl Fn(&Account) -> bool + Send,
    ) -> StoreResult<Option<Account>> {
        let Some(id) = self.indexed_id(table, partition, key).await? else {
            return Ok(None);
        };
        Ok(self.load(&id).await?.filter(|account| matches(account)))
    }

    async fn put_index(&self, table: &str, partition: &str, key: &str, id: &str) -> StoreResult<()> {
        self.client
            .put_item(table, ItemKey::new(partition, key), json!({ "account_id": id }))
            .await
    }

    async fn drop_index(&self, table: &str, partition: &str, key: &str) -> StoreResult<()> {
        self.client
            .delete_item(table, &ItemKey::new(partition, key))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl AccountStore for TableAccountStore {
    async fn save_account(&self, account: Account) -> StoreResult<()> {
        let username = account.username.clone();
        if let Some(owner) = self
            .resolve(&self.usernames, USERNAMES_PARTITION, &username, |a| a.username == username)
            .await?
        {
            if owner.id != account.id {
                return Err(StoreError::Conflict(format!(
                    "username '{}' is taken",
                    account.username
                )));
            }
        }

        if !account.api_token.is_empty() {
            let token = account.api_token.clone();
            if let Some(owner) = self
                .resolve(&self.tokens, TOKENS_PARTITION, &token, |a| a.api_token == token)
                .await?
            {
                if owner.id != account.id {
                    return Err(StoreError::Conflict("API token is already bound".to_string()));
                }
            }
        }

        let previous = self.load(&account.id).await?;

        self.client
            .put_item(
                &self.accounts,
                ItemKey::new(ACCOUNTS_PARTITION, account.id.clone()),
                to_item(&account)?,
            )
            .await?;
        self.put_index(&self.usernames, USERNAMES_PARTITION, &account.username, &account.id)
            .await?;
        if !account.api_token.is_empty() {
            self.put_index(&self.tokens, TOKENS_PARTITION, &account.api_token, &account.id)
                .await?;
        }

        if let Some(previous) = previous {
            if previous.username != account.username {
                self.drop_index(&self.usernames, USERNAMES_PARTITION, &previous.username)
                    .await?;
            }
            if previous.api_token != account.api_token && !previous.api_token.is_empty() {
                self.drop_index(&self.tokens, TOKENS_PARTITION, &previous.api_token)
                    .await?;
            }
        }
        Ok(())
    }

    async fn get_account(&self, id: &str) -> StoreResult<Account> {
        self.load(id)
            .await?
            .ok_or_else(|| StoreError::not_found("account", id))
    }

    async fn get_account_by_username(&self, username: &str) -> StoreResult<Account> {
        self.resolve(&self.usernames, USERNAMES_PARTITION, username, |a| a.username == username)
            .await?
            .ok_or_else(|| StoreError::not_found("account", username))
    }

    async fn get_account_by_token(&self, token: &str) -> StoreResult<Account> {
        self.resolve(&self.tokens, TOKENS_PARTITION, token, |a| a.api_token == token)
            .await?
            .ok_or_else(|| StoreError::not_found("account", "<token>"))
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        self.client
            .query(&self.accounts, ACCOUNTS_PARTITION)
            .await?
            .into_iter()
            .map(|(_, item)| from_item(item))
            .collect()
    }

    async fn delete_account(&self, id: &str) -> StoreResult<()> {
        let removed = self
            .client
            .delete_item(&self.accounts, &ItemKey::new(ACCOUNTS_PARTITION, id))
            .await?
            .ok_or_else(|| StoreError::not_found("account", id))?;
        let removed: Account = from_item(removed)?;

        self.drop_index(&self.usernames, USERNAMES_PARTITION, &removed.username)
            .await?;
        if !removed.api_token.is_empty() {
            self.drop_index(&self.tokens, TOKENS_PARTITION, &removed.api_token)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_stamps_survive_a_clock_stepping_back() {
        let last = AtomicI64::new(0);
        let first = next_log_stamp(&last, 1_000);
        let stepped_back = next_log_stamp(&last, 400);
        let same_instant = next_log_stamp(&last, 400);
        let caught_up = next_log_stamp(&last, 5_000);

        assert_eq!(first, 1_000);
        assert_eq!(stepped_back, 1_001);
        assert_eq!(same_instant, 1_002);
        assert_eq!(caught_up, 5_000);

        let keys: Vec<String> = [first, stepped_back, same_instant, caught_up]
            .iter()
            .map(|n| format!("{:020}", n))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
