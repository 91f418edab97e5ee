//! Workflow execution: graph resolution, sequential agent execution and
//! NDJSON framing of run events.
//!
//! A run loads a workflow graph, resolves it into a linear plan, then
//! invokes each agent in order with the previous agent's output as input.
//! Progress is reported as [`RunEvent`](cadence_core::types::RunEvent)s on an
//! optional observer channel.

pub mod executor;
pub mod resolver;
pub mod runner;
pub mod stream;

pub use executor::{EventSink, ExecutionEngine, NodeOutput, RunOutcome};
pub use resolver::{ExecutionPlan, GraphResolver};
pub use runner::{RunRequest, RunResult, WorkflowRunner};
