use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Agent capability: the external "invoke agent → text output" collaborator.
///
/// Retries, if any, happen inside the implementation; the engine calls
/// `invoke` exactly once per node.
pub trait AgentCapability: Send + Sync + 'static {
    fn invoke(&self, invocation: AgentInvocation) -> BoxFuture<'_, Result<String>>;
}

/// Read-only access to stored workflow definitions.
pub trait WorkflowSource: Send + Sync + 'static {
    /// Load the workflow row only (for ownership checks).
    fn workflow(&self, workflow_id: &str) -> BoxFuture<'_, Result<Workflow>>;

    /// Load the workflow with its agents and connections, in insertion order.
    fn graph(&self, workflow_id: &str) -> BoxFuture<'_, Result<WorkflowGraph>>;
}

/// Execution record persistence.
pub trait ExecutionStore: Send + Sync + 'static {
    /// Insert or overwrite a record.
    fn save(&self, execution: &Execution) -> BoxFuture<'_, Result<()>>;

    fn get(&self, id: &ExecutionId) -> BoxFuture<'_, Result<Option<Execution>>>;

    /// Most recent first.
    fn list_for_workflow(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Execution>>>;
}

/// Backing table of the job registry.
///
/// Calls are synchronous and short; the scheduler serialises compound
/// read-modify-write sequences itself.
pub trait JobStore: Send + Sync + 'static {
    /// Insert or replace by `job_id`. Returns the replaced job, if any.
    fn upsert(&self, job: Job) -> Result<Option<Job>>;

    fn get(&self, job_id: &str) -> Result<Option<Job>>;

    /// Returns the removed job, if any.
    fn remove(&self, job_id: &str) -> Result<Option<Job>>;

    /// All jobs in registration order.
    fn list(&self) -> Result<Vec<Job>>;
}
