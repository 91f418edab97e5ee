//! Fakes and fixtures shared by the Cadence test suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio::sync::Notify;

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::AgentCapability;
use cadence_core::types::{Agent, AgentInvocation, Connection, Workflow, WorkflowGraph};

/// Capability that answers `"<agent name>(<input>)"`, unless an agent is
/// scripted to fail.
#[derive(Default)]
pub struct ScriptedCapability {
    failures: HashMap<String, String>,
    calls: Mutex<Vec<AgentInvocation>>,
}

impl ScriptedCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make invocations of the agent named `agent_name` fail with `message`.
    pub fn failing_on(mut self, agent_name: &str, message: &str) -> Self {
        self.failures
            .insert(agent_name.to_string(), message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<AgentInvocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl AgentCapability for ScriptedCapability {
    fn invoke(&self, invocation: AgentInvocation) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let name = invocation.agent.name.clone();
            let input = invocation.input.clone();
            self.calls.lock().unwrap().push(invocation);
            if let Some(message) = self.failures.get(&name) {
                return Err(CadenceError::capability(name, message.clone()));
            }
            Ok(format!("{}({})", name, input))
        })
    }
}

/// Capability that parks every invocation until released.
#[derive(Default)]
pub struct GatedCapability {
    started: AtomicUsize,
    release: Notify,
    entered: Notify,
}

impl GatedCapability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Wait until at least one invocation is parked.
    pub async fn wait_entered(&self) {
        loop {
            let notified = self.entered.notified();
            if self.started() > 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn release_all(&self) {
        self.release.notify_waiters();
    }
}

impl AgentCapability for GatedCapability {
    fn invoke(&self, invocation: AgentInvocation) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let released = self.release.notified();
            self.started.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_waiters();
            released.await;
            Ok(format!("{}({})", invocation.agent.name, invocation.input))
        })
    }
}

pub fn workflow(id: &str, owner_id: &str) -> Workflow {
    Workflow {
        id: id.to_string(),
        owner_id: owner_id.to_string(),
        name: format!("{} flow", id),
        active: true,
    }
}

pub fn agent(id: &str, workflow_id: &str, name: &str) -> Agent {
    Agent {
        id: id.to_string(),
        workflow_id: workflow_id.to_string(),
        name: name.to_string(),
        role: name.to_string(),
        model: "gpt-4o".to_string(),
        instructions: format!("You are {}. Work on: {{{{input}}}}", name),
        capabilities: vec![],
        output_schema: None,
    }
}

/// `entry → names[0] → names[1] → …`, agent ids equal to their names.
pub fn linear_graph(workflow_id: &str, owner_id: &str, names: &[&str]) -> WorkflowGraph {
    let agents: Vec<Agent> = names
        .iter()
        .map(|n| agent(n, workflow_id, n))
        .collect();

    let mut connections = Vec::new();
    if let Some(first) = names.first() {
        connections.push(Connection::entry("c0", workflow_id, *first));
    }
    for (i, pair) in names.windows(2).enumerate() {
        connections.push(Connection::link(
            format!("c{}", i + 1),
            workflow_id,
            pair[0],
            pair[1],
        ));
    }

    WorkflowGraph {
        workflow: workflow(workflow_id, owner_id),
        agents,
        connections,
    }
}
