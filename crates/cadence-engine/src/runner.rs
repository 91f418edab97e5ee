use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use cadence_core::config::AmbiguityPolicy;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::{AgentCapability, ExecutionStore, WorkflowSource};
use cadence_core::types::{Execution, ExecutionId, ExecutionStatus, RunEvent};

use crate::executor::{emit, EventSink, ExecutionEngine, NodeOutput};
use crate::resolver::GraphResolver;

/// What to run, on whose behalf.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub workflow_id: String,
    pub owner_id: String,
    pub input: String,
}

/// Terminal result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub final_output: String,
    pub history: Vec<NodeOutput>,
}

/// Loads a workflow, resolves it, keeps its execution record current and
/// drives the engine.
///
/// Ownership is not checked here; callers go through the guard.
pub struct WorkflowRunner {
    source: Arc<dyn WorkflowSource>,
    executions: Arc<dyn ExecutionStore>,
    resolver: GraphResolver,
    engine: ExecutionEngine,
}

impl WorkflowRunner {
    pub fn new(
        source: Arc<dyn WorkflowSource>,
        executions: Arc<dyn ExecutionStore>,
        capability: Arc<dyn AgentCapability>,
        policy: AmbiguityPolicy,
    ) -> Self {
        Self {
            source,
            executions,
            resolver: GraphResolver::new(policy),
            engine: ExecutionEngine::new(capability),
        }
    }

    pub fn source(&self) -> &Arc<dyn WorkflowSource> {
        &self.source
    }

    pub fn executions(&self) -> &Arc<dyn ExecutionStore> {
        &self.executions
    }

    /// Run a workflow to completion.
    ///
    /// Errors before the execution record exists (unknown or inactive
    /// workflow) leave no record behind. Later errors mark the record failed.
    pub async fn run(&self, request: RunRequest, observer: Option<EventSink>) -> Result<RunResult> {
        let observer = observer.as_ref();

        let graph = match self.source.graph(&request.workflow_id).await {
            Ok(g) => g,
            Err(e) => {
                let _ = emit(observer, RunEvent::Error { content: e.to_string() }).await;
                return Err(e);
            }
        };
        if !graph.workflow.active {
            let e = CadenceError::Validation(format!(
                "workflow '{}' is not active",
                graph.workflow.id
            ));
            let _ = emit(observer, RunEvent::Error { content: e.to_string() }).await;
            return Err(e);
        }

        let mut execution = Execution::new(&request.workflow_id, &request.owner_id, &request.input);
        self.executions.save(&execution).await?;
        execution.mark_running();
        self.executions.save(&execution).await?;

        info!(
            execution_id = %execution.id,
            workflow_id = %request.workflow_id,
            owner_id = %request.owner_id,
            "Run started"
        );

        let plan = match self.resolver.resolve(&graph) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(execution_id = %execution.id, error = %e, "Graph resolution failed");
                let _ = emit(observer, RunEvent::Error { content: e.to_string() }).await;
                self.finish_failed(&mut execution, &e).await;
                return Err(e);
            }
        };

        match self.engine.run(&plan, &request.input, observer).await {
            Ok(outcome) => {
                execution.complete(outcome.final_output.clone());
                self.executions.save(&execution).await?;
                info!(
                    execution_id = %execution.id,
                    nodes = outcome.history.len(),
                    elapsed_ms = outcome.elapsed_ms,
                    "Run completed"
                );
                Ok(RunResult {
                    execution_id: execution.id,
                    status: execution.status,
                    final_output: outcome.final_output,
                    history: outcome.history,
                })
            }
            Err(e) => {
                self.finish_failed(&mut execution, &e).await;
                Err(e)
            }
        }
    }

    /// Start a run in the background, returning the observer side of its
    /// event channel.
    ///
    /// The channel holds one event at a time. Dropping the receiver aborts
    /// the run at its next suspension point.
    pub fn spawn_streamed(self: &Arc<Self>, request: RunRequest) -> mpsc::Receiver<RunEvent> {
        let (tx, rx) = mpsc::channel(1);
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            let workflow_id = request.workflow_id.clone();
            if let Err(e) = runner.run(request, Some(tx)).await {
                warn!(workflow_id = %workflow_id, error = %e, "Streamed run ended with error");
            }
        });
        rx
    }

    async fn finish_failed(&self, execution: &mut Execution, e: &CadenceError) {
        execution.fail(e.to_string());
        if let Err(save_err) = self.executions.save(execution).await {
            error!(execution_id = %execution.id, error = %save_err, "Failed to record run failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::types::Connection;
    use cadence_store::{InMemoryExecutionStore, InMemoryWorkflowSource};
    use cadence_test_utils::{linear_graph, ScriptedCapability};

    fn runner_with(
        graphs: Vec<cadence_core::types::WorkflowGraph>,
        capability: ScriptedCapability,
    ) -> (Arc<WorkflowRunner>, Arc<InMemoryExecutionStore>) {
        let executions = Arc::new(InMemoryExecutionStore::new());
        let runner = WorkflowRunner::new(
            Arc::new(InMemoryWorkflowSource::with_graphs(graphs)),
            executions.clone(),
            Arc::new(capability),
            AmbiguityPolicy::FirstMatch,
        );
        (Arc::new(runner), executions)
    }

    fn request(workflow_id: &str, input: &str) -> RunRequest {
        RunRequest {
            workflow_id: workflow_id.into(),
            owner_id: "u1".into(),
            input: input.into(),
        }
    }

    #[tokio::test]
    async fn completed_run_is_recorded() {
        let (runner, executions) = runner_with(
            vec![linear_graph("wf", "u1", &["Researcher", "Evaluator"])],
            ScriptedCapability::new(),
        );
        let result = runner.run(request("wf", "black holes"), None).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.final_output, "Evaluator(Researcher(black holes))");
        assert_eq!(result.history[0].agent_name, "Researcher");

        let record = executions.get(&result.execution_id).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.result.as_deref(), Some(result.final_output.as_str()));
        assert!(record.started_at.is_some() && record.completed_at.is_some());
    }

    #[tokio::test]
    async fn capability_failure_marks_record_failed() {
        let (runner, executions) = runner_with(
            vec![linear_graph("wf", "u1", &["A", "B"])],
            ScriptedCapability::new().failing_on("B", "upstream 500"),
        );
        let err = runner.run(request("wf", "x"), None).await.unwrap_err();
        assert!(matches!(err, CadenceError::Capability { .. }));

        let records = executions.list_for_workflow("wf", 5).await.unwrap();
        assert_eq!(records[0].status, ExecutionStatus::Failed);
        assert!(records[0].error_message.as_deref().unwrap().contains("upstream 500"));
    }

    #[tokio::test]
    async fn resolution_failure_marks_record_failed() {
        let mut graph = linear_graph("wf", "u1", &["A"]);
        graph.connections = vec![Connection::link("loop", "wf", "A", "A")];
        let (runner, executions) = runner_with(vec![graph], ScriptedCapability::new());

        let mut rx = {
            let (tx, rx) = mpsc::channel(4);
            let err = runner.run(request("wf", "x"), Some(tx)).await.unwrap_err();
            assert!(matches!(err, CadenceError::Resolution(_)));
            rx
        };
        assert_eq!(rx.recv().await.unwrap().kind(), "error");

        let records = executions.list_for_workflow("wf", 5).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_and_inactive_workflows_leave_no_record() {
        let mut inactive = linear_graph("off", "u1", &["A"]);
        inactive.workflow.active = false;
        let (runner, executions) = runner_with(vec![inactive], ScriptedCapability::new());

        let err = runner.run(request("missing", "x"), None).await.unwrap_err();
        assert!(matches!(err, CadenceError::NotFound { .. }));
        let err = runner.run(request("off", "x"), None).await.unwrap_err();
        assert!(matches!(err, CadenceError::Validation(_)));
        assert!(executions.is_empty());
    }

    #[tokio::test]
    async fn streamed_run_ends_with_workflow_complete() {
        let (runner, _) = runner_with(
            vec![linear_graph("wf", "u1", &["A", "B", "C"])],
            ScriptedCapability::new(),
        );
        let mut rx = runner.spawn_streamed(request("wf", "topic X"));
        let mut kinds = Vec::new();
        while let Some(ev) = rx.recv().await {
            kinds.push(ev.kind());
        }
        assert_eq!(
            kinds,
            vec![
                "node_active",
                "node_complete",
                "node_active",
                "node_complete",
                "node_active",
                "node_complete",
                "workflow_complete"
            ]
        );
    }
}
