use crate::RuntimeConfig;
use flowcore::{
    Action, ExecutionState, ExecutionStatus, FlowError, Node, NodeError, SharedState,
    DEFAULT_ACTION,
};
use std::sync::Arc;

/// Walks a node graph by action label, one node at a time
///
/// The successor registered for the returned action runs next, falling back
/// to the `default` successor. The walk ends when neither exists.
pub struct FlowRunner {
    config: RuntimeConfig,
}

impl FlowRunner {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run from `start` and return the last node's action.
    ///
    /// With an execution store in the shared context, the execution record
    /// moves from pending to running and ends succeeded, failed or cancelled.
    /// Results written before a failure stay in `shared`.
    pub async fn run(&self, start: Arc<dyn Node>, shared: &mut SharedState) -> Result<Action, FlowError> {
        let mut record = self.begin(shared).await?;
        let outcome = self.walk(start, shared).await;

        if let Some(record) = record.as_mut() {
            let (state, error) = match &outcome {
                Ok(_) => (ExecutionState::Succeeded, None),
                Err(FlowError::Node(NodeError::Cancelled)) => (ExecutionState::Cancelled, None),
                Err(e) => (ExecutionState::Failed, Some(e.to_string())),
            };
            self.finish(shared, record, state, error).await;
        }
        outcome
    }

    async fn walk(&self, start: Arc<dyn Node>, shared: &mut SharedState) -> Result<Action, FlowError> {
        let mut current = start;
        let mut steps = 0;

        loop {
            if steps == self.config.max_steps {
                tracing::error!(max_steps = self.config.max_steps, "Flow step limit reached");
                return Err(FlowError::StepLimit(self.config.max_steps));
            }
            if shared.context().is_some_and(|ctx| ctx.cancellation.is_cancelled()) {
                return Err(NodeError::Cancelled.into());
            }
            steps += 1;

            let action = current.run(shared).await?;
            let successors = current.successors();
            let next = successors
                .get(&action)
                .or_else(|| successors.get(DEFAULT_ACTION))
                .cloned();

            match next {
                Some(node) => {
                    tracing::debug!(from = %current.id(), to = %node.id(), action = %action, "Following edge");
                    current = node;
                }
                None => {
                    tracing::info!(last_node = %current.id(), action = %action, steps, "Flow completed");
                    return Ok(action);
                }
            }
        }
    }

    /// Create the execution record when a store is attached.
    async fn begin(&self, shared: &SharedState) -> Result<Option<ExecutionStatus>, FlowError> {
        let Some(ctx) = shared.context() else {
            return Ok(None);
        };
        let Some(store) = &ctx.executions else {
            return Ok(None);
        };

        let record = ExecutionStatus::new(&ctx.execution_id, &ctx.flow_id, &ctx.account_id);
        store.save_execution(record.clone()).await?;
        let record = record.with_status(ExecutionState::Running);
        store.save_execution(record.clone()).await?;

        tracing::info!(execution_id = %ctx.execution_id, flow_id = %ctx.flow_id, "Execution started");
        Ok(Some(record))
    }

    async fn finish(
        &self,
        shared: &SharedState,
        record: &mut ExecutionStatus,
        state: ExecutionState,
        error: Option<String>,
    ) {
        let Some(ctx) = shared.context() else {
            return;
        };
        let Some(store) = &ctx.executions else {
            return;
        };

        record.results = ctx.node_results.clone();
        record.finish(state, error);
        if let Err(e) = store.save_execution(record.clone()).await {
            tracing::warn!(execution_id = %record.id, error = %e, "Failed to record execution outcome");
        }
        tracing::info!(execution_id = %record.id, status = %state, "Execution finished");
    }
}

impl Default for FlowRunner {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}
