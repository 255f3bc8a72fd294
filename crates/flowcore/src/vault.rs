use crate::StoreError;
use async_trait::async_trait;

/// Account-scoped secret lookup consumed by the template engine
#[async_trait]
pub trait SecretVault: Send + Sync {
    /// Fetch the cleartext value of `key` for `account_id`.
    async fn get_secret(&self, account_id: &str, key: &str) -> Result<String, StoreError>;
}
