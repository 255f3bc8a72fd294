//! Storage backends for flows, secrets, executions and accounts
//!
//! Two providers satisfy the same `flowcore::store` contract: an in-process
//! one ([`MemoryProvider`]) and a table-service one ([`TableProvider`]) that
//! maps each entity to its own prefixed table through a [`TableClient`].
//! Which one is used is decided once, by [`StorageConfig`].

mod config;
mod memory;
pub mod table;
mod vault;

pub use config::StorageConfig;
pub use memory::{
    MemoryAccountStore, MemoryExecutionStore, MemoryFlowStore, MemoryProvider, MemorySecretStore,
};
pub use table::{ItemKey, LocalTableClient, TableClient, TableNames, TableProvider};
pub use vault::StoreSecretVault;

#[cfg(feature = "nats")]
pub use table::NatsTableClient;

use flowcore::{ExecutionStatus, StoreError, StoreResult};

/// Apply an incoming execution save on top of what the store already holds.
///
/// The stored account binding wins, and terminal executions are frozen.
pub(crate) fn merge_execution(
    existing: Option<&ExecutionStatus>,
    mut incoming: ExecutionStatus,
) -> StoreResult<ExecutionStatus> {
    let Some(existing) = existing else {
        return Ok(incoming);
    };

    if existing.status.is_terminal() {
        return Err(StoreError::Finalized(existing.id.clone()));
    }

    if let Some(bound) = &existing.account_id {
        if incoming.account_id.as_deref().is_some_and(|a| a != bound) {
            tracing::warn!(
                execution_id = %existing.id,
                account_id = %bound,
                "Ignoring attempt to rebind execution to another account"
            );
        }
        incoming.account_id = Some(bound.clone());
    }

    Ok(incoming)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore::ExecutionState;

    #[test]
    fn stored_account_binding_wins() {
        let existing = ExecutionStatus::new("e1", "f1", "acct-a");
        let mut update = existing.clone().with_status(ExecutionState::Running);
        update.account_id = None;
        let merged = merge_execution(Some(&existing), update).unwrap();
        assert_eq!(merged.account_id.as_deref(), Some("acct-a"));

        let mut rebind = existing.clone();
        rebind.account_id = Some("acct-b".into());
        let merged = merge_execution(Some(&existing), rebind).unwrap();
        assert_eq!(merged.account_id.as_deref(), Some("acct-a"));
    }

    #[test]
    fn terminal_executions_are_frozen() {
        let mut done = ExecutionStatus::new("e1", "f1", "a");
        done.finish(ExecutionState::Succeeded, None);
        let err = merge_execution(Some(&done), done.clone()).unwrap_err();
        assert!(matches!(err, StoreError::Finalized(id) if id == "e1"));
    }
}
