//! Standard node library
//!
//! Built-in node types: HTTP requests, a node-local key-value store, delays
//! and scripted conditions, plus the Lua evaluator behind the latter.

mod condition;
mod http;
mod script;
mod store;
mod time;

pub use condition::{ConditionNode, ConditionNodeFactory};
pub use http::{HttpAuth, HttpBody, HttpRequestNode, HttpRequestNodeFactory, RequestPlan};
pub use script::LuaScriptEvaluator;
pub use store::{StoreNode, StoreNodeFactory};
pub use time::{DelayNode, DelayNodeFactory};

use flowruntime::{NodeRegistry, RuntimeConfig};
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry, config: &RuntimeConfig) {
    registry.register(Arc::new(HttpRequestNodeFactory::new(config.default_http_timeout)));
    registry.register(Arc::new(StoreNodeFactory));
    registry.register(Arc::new(DelayNodeFactory));
    registry.register(Arc::new(ConditionNodeFactory::default()));
}
