//! Core abstractions for the flow runner
//!
//! Contracts shared by every other crate: the node execution traits, the
//! shared execution state, the data model and the storage interfaces.
//! Backends and node types live elsewhere.

mod duration;
mod error;
pub mod model;
mod node;
mod script;
mod state;
pub mod store;
mod value;
mod vault;

pub use duration::parse_duration;
pub use error::{FlowError, NodeError, ResolutionError, ScriptError, StoreError};
pub use model::{
    Account, AccountId, ExecutionId, ExecutionLog, ExecutionState, ExecutionStatus, FlowId,
    FlowMetadata, Secret, SecretMetadata,
};
pub use node::{Action, Node, NodeExecutor, NodeInput, DEFAULT_ACTION};
pub use script::ScriptEvaluator;
pub use state::{is_reserved_key, ExecutionContext, ResolutionFailure, SharedState};
pub use store::{
    AccountStore, ExecutionStore, FlowStore, SecretStore, StorageProvider, StoreResult,
};
pub use value::{param_str, require_str, Params, ValueExt};
pub use vault::SecretVault;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
