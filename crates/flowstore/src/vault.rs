use async_trait::async_trait;
use flowcore::{SecretStore, SecretVault, StoreError};
use std::sync::Arc;

/// Secret vault reading straight from a [`SecretStore`]
#[derive(Clone)]
pub struct StoreSecretVault {
    store: Arc<dyn SecretStore>,
}

impl StoreSecretVault {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SecretVault for StoreSecretVault {
    async fn get_secret(&self, account_id: &str, key: &str) -> Result<String, StoreError> {
        let secret = self.store.get_secret(account_id, key).await?;
        Ok(secret.value)
    }
}
