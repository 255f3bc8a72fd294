use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub type AccountId = String;
pub type FlowId = String;
pub type ExecutionId = String;

/// Tenant record, reachable by id, username and API token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub password_hash: String,
    pub api_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        password_hash: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            username: username.into(),
            password_hash: password_hash.into(),
            api_token: api_token.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Account-scoped secret. `Debug` never prints the value.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub account_id: AccountId,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Secret {
    pub fn new(account_id: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            account_id: account_id.into(),
            key: key.into(),
            value: value.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn metadata(&self) -> SecretMetadata {
        SecretMetadata {
            key: self.key.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("account_id", &self.account_id)
            .field("key", &self.key)
            .field("value", &"********")
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// What secret listings expose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Descriptive fields of a stored flow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowMetadata {
    pub id: FlowId,
    pub account_id: AccountId,
    pub name: String,
    pub description: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlowMetadata {
    /// Build metadata for a definition, reading `metadata.{name,description,version}`
    /// when the definition is JSON.
    pub fn from_definition(
        account_id: &str,
        flow_id: &str,
        definition: &[u8],
        created_at: DateTime<Utc>,
    ) -> Self {
        let parsed: Option<Value> = serde_json::from_slice(definition).ok();
        let field = |name: &str| {
            parsed
                .as_ref()
                .and_then(|v| v.get("metadata"))
                .and_then(|m| m.get(name))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Self {
            id: flow_id.to_string(),
            account_id: account_id.to_string(),
            name: field("name"),
            description: field("description"),
            version: field("version"),
            created_at,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One run of a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub id: ExecutionId,
    pub flow_id: FlowId,
    /// Binding to the owning account. Once a store has seen it, later saves
    /// that leave it empty keep the stored binding.
    pub account_id: Option<AccountId>,
    pub status: ExecutionState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub results: Map<String, Value>,
}

impl ExecutionStatus {
    pub fn new(id: impl Into<String>, flow_id: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            flow_id: flow_id.into(),
            account_id: Some(account_id.into()),
            status: ExecutionState::Pending,
            start_time: Utc::now(),
            end_time: None,
            error: None,
            results: Map::new(),
        }
    }

    pub fn with_status(mut self, status: ExecutionState) -> Self {
        self.status = status;
        self
    }

    /// Move to a terminal state and stamp the end time.
    pub fn finish(&mut self, status: ExecutionState, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.end_time = Some(Utc::now());
    }
}

/// Append-only log line attached to an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ExecutionLog {
    pub fn new(node_id: impl Into<String>, level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            node_id: node_id.into(),
            level: level.into(),
            message: message.into(),
            data: Map::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}
