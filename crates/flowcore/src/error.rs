use thiserror::Error;

/// Top-level error for driving a flow through the runner
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Flow exceeded {0} steps")]
    StepLimit(usize),
}

#[derive(Error, Debug, Clone)]
pub enum NodeError {
    /// Missing or malformed required parameter. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

impl NodeError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Runtime failures of a node type, script failures included.
    pub fn is_execution(&self) -> bool {
        matches!(
            self,
            Self::Execution(_) | Self::Script(_) | Self::Timeout { .. }
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("failed to parse script: {0}")]
    Parse(String),

    #[error("script raised an error: {0}")]
    Runtime(String),

    #[error("failed to export script result: {0}")]
    Export(String),

    #[error("failed to prepare script sandbox: {0}")]
    Sandbox(String),
}

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Execution {0} is finished and can no longer be modified")]
    Finalized(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn backend(message: impl ToString) -> Self {
        Self::Backend(message.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Template or secret lookup failure. Recovered by the node wrapper.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("undefined reference '{0}'")]
    Undefined(String),

    #[error("secret '{key}' could not be read: {reason}")]
    Secret { key: String, reason: String },

    #[error("malformed template: {0}")]
    Malformed(String),
}
