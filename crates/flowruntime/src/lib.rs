//! Flow execution runtime
//!
//! This crate provides the node wrapper that binds node types to the graph
//! contract, the flow context and template engine it resolves parameters
//! with, the node registry, and a small action-routed flow runner.

mod config;
mod context;
mod registry;
mod runner;
pub mod template;
mod wrapper;

pub use config::RuntimeConfig;
pub use context::FlowContext;
pub use registry::{NodeFactory, NodeMetadata, NodeRegistry, ParamDefinition};
pub use runner::FlowRunner;
pub use wrapper::{infer_result_type, NodeWrapper, RESULT_KEY};
