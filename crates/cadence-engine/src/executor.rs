use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::AgentCapability;
use cadence_core::types::{AgentInvocation, RunEvent};

use crate::resolver::ExecutionPlan;

/// Sending half of a run's observer channel.
pub type EventSink = mpsc::Sender<RunEvent>;

/// Output of one executed node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeOutput {
    pub node_id: String,
    pub agent_name: String,
    pub output: String,
}

/// Result of walking a whole plan.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub final_output: String,
    /// Per-node outputs in execution order.
    pub history: Vec<NodeOutput>,
    pub elapsed_ms: u64,
}

/// Walks an [`ExecutionPlan`] one agent at a time, chaining each output into
/// the next agent's input.
///
/// Every event is logged at debug level; with an observer attached it is
/// also sent down the channel, waiting for the observer to take it. A
/// closed observer channel aborts the run.
pub struct ExecutionEngine {
    capability: Arc<dyn AgentCapability>,
}

impl ExecutionEngine {
    pub fn new(capability: Arc<dyn AgentCapability>) -> Self {
        Self { capability }
    }

    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        input: &str,
        observer: Option<&EventSink>,
    ) -> Result<RunOutcome> {
        let start = Instant::now();
        let mut carried = input.to_string();
        let mut history = Vec::with_capacity(plan.len());

        for agent in &plan.steps {
            emit(
                observer,
                RunEvent::NodeActive {
                    node_id: agent.id.clone(),
                    agent_name: agent.name.clone(),
                },
            )
            .await?;

            info!(workflow_id = %plan.workflow_id, node_id = %agent.id, agent = %agent.name, "Executing node");

            let invocation = AgentInvocation {
                workflow_id: plan.workflow_id.clone(),
                agent: agent.clone(),
                input: carried.clone(),
            };

            let result = match observer {
                Some(tx) => tokio::select! {
                    r = self.capability.invoke(invocation) => r,
                    _ = tx.closed() => Err(CadenceError::Cancelled("observer disconnected".into())),
                },
                None => self.capability.invoke(invocation).await,
            };

            let output = match result {
                Ok(text) => text,
                Err(e @ CadenceError::Cancelled(_)) => {
                    info!(node_id = %agent.id, "Run aborted, observer went away");
                    return Err(e);
                }
                Err(e) => {
                    let e = match e {
                        CadenceError::Capability { .. } => e,
                        other => CadenceError::capability(agent.name.clone(), other.to_string()),
                    };
                    error!(node_id = %agent.id, error = %e, "Node failed, aborting run");
                    // The observer may already be gone; the error is returned either way.
                    let _ = emit(
                        observer,
                        RunEvent::Error {
                            content: e.to_string(),
                        },
                    )
                    .await;
                    return Err(e);
                }
            };

            emit(
                observer,
                RunEvent::NodeComplete {
                    node_id: agent.id.clone(),
                    output: output.clone(),
                },
            )
            .await?;

            history.push(NodeOutput {
                node_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                output: output.clone(),
            });
            carried = output;
        }

        emit(
            observer,
            RunEvent::WorkflowComplete {
                final_output: carried.clone(),
            },
        )
        .await?;

        Ok(RunOutcome {
            final_output: carried,
            history,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Log an event and hand it to the observer, if any.
pub(crate) async fn emit(observer: Option<&EventSink>, event: RunEvent) -> Result<()> {
    debug!(kind = event.kind(), event = ?event, "Run event");
    if let Some(tx) = observer {
        tx.send(event)
            .await
            .map_err(|_| CadenceError::Cancelled("observer disconnected".into()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::GraphResolver;
    use cadence_test_utils::{linear_graph, GatedCapability, ScriptedCapability};

    fn plan(names: &[&str]) -> ExecutionPlan {
        GraphResolver::default()
            .resolve(&linear_graph("wf", "u1", names))
            .unwrap()
    }

    async fn drain(mut rx: mpsc::Receiver<RunEvent>) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn chains_outputs_and_emits_in_node_order() {
        let capability = Arc::new(ScriptedCapability::new());
        let engine = ExecutionEngine::new(capability.clone());
        let plan = plan(&["A", "B", "C"]);

        let (tx, rx) = mpsc::channel(1);
        let collector = tokio::spawn(drain(rx));
        let outcome = engine.run(&plan, "topic X", Some(&tx)).await.unwrap();
        drop(tx);
        let events = collector.await.unwrap();

        let out_a = "A(topic X)".to_string();
        let out_b = format!("B({})", out_a);
        let out_c = format!("C({})", out_b);
        assert_eq!(
            events,
            vec![
                RunEvent::NodeActive { node_id: "A".into(), agent_name: "A".into() },
                RunEvent::NodeComplete { node_id: "A".into(), output: out_a.clone() },
                RunEvent::NodeActive { node_id: "B".into(), agent_name: "B".into() },
                RunEvent::NodeComplete { node_id: "B".into(), output: out_b.clone() },
                RunEvent::NodeActive { node_id: "C".into(), agent_name: "C".into() },
                RunEvent::NodeComplete { node_id: "C".into(), output: out_c.clone() },
                RunEvent::WorkflowComplete { final_output: out_c.clone() },
            ]
        );
        assert_eq!(outcome.final_output, out_c);
        assert_eq!(outcome.history.len(), 3);

        let inputs: Vec<_> = capability.calls().into_iter().map(|c| c.input).collect();
        assert_eq!(inputs, vec!["topic X".to_string(), out_a, out_b]);
    }

    #[tokio::test]
    async fn empty_plan_echoes_input() {
        let engine = ExecutionEngine::new(Arc::new(ScriptedCapability::new()));
        let (tx, rx) = mpsc::channel(4);
        let outcome = engine.run(&plan(&[]), "as is", Some(&tx)).await.unwrap();
        drop(tx);
        assert_eq!(outcome.final_output, "as is");
        assert_eq!(
            drain(rx).await,
            vec![RunEvent::WorkflowComplete { final_output: "as is".into() }]
        );
    }

    #[tokio::test]
    async fn failure_emits_error_and_stops() {
        let capability = Arc::new(ScriptedCapability::new().failing_on("B", "rate limited"));
        let engine = ExecutionEngine::new(capability.clone());
        let (tx, rx) = mpsc::channel(8);
        let err = engine
            .run(&plan(&["A", "B", "C"]), "x", Some(&tx))
            .await
            .unwrap_err();
        drop(tx);

        assert!(matches!(err, CadenceError::Capability { .. }));
        let events = drain(rx).await;
        assert_eq!(events.len(), 4);
        assert_eq!(events[3].kind(), "error");
        assert!(events.iter().all(|e| e.kind() != "workflow_complete"));
        // C never ran.
        assert_eq!(capability.call_count(), 2);
    }

    #[tokio::test]
    async fn dropped_observer_cancels_in_flight_node() {
        let capability = Arc::new(GatedCapability::new());
        let engine = ExecutionEngine::new(capability.clone());
        let plan = plan(&["A", "B"]);

        let (tx, mut rx) = mpsc::channel(1);
        let run = tokio::spawn(async move { engine.run(&plan, "x", Some(&tx)).await });

        // Take node_active(A), then hang up while A is in flight.
        assert_eq!(rx.recv().await.unwrap().kind(), "node_active");
        capability.wait_entered().await;
        drop(rx);

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, CadenceError::Cancelled(_)));
        assert_eq!(capability.started(), 1);
    }

    #[tokio::test]
    async fn runs_without_observer() {
        let engine = ExecutionEngine::new(Arc::new(ScriptedCapability::new()));
        let outcome = engine.run(&plan(&["A", "B"]), "in", None).await.unwrap();
        assert_eq!(outcome.final_output, "B(A(in))");
    }
}
