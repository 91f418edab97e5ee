use std::collections::HashMap;
use std::sync::RwLock;

use futures::future::BoxFuture;

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::{ExecutionStore, JobStore, WorkflowSource};
use cadence_core::types::*;

fn poisoned<E: std::fmt::Display>(e: E) -> CadenceError {
    CadenceError::Database(format!("lock poisoned: {}", e))
}

/// Workflow definitions held in memory, keyed by workflow id.
#[derive(Default)]
pub struct InMemoryWorkflowSource {
    graphs: RwLock<HashMap<String, WorkflowGraph>>,
}

impl InMemoryWorkflowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_graphs(graphs: impl IntoIterator<Item = WorkflowGraph>) -> Self {
        let source = Self::new();
        for graph in graphs {
            // A fresh lock cannot be poisoned.
            let _ = source.insert(graph);
        }
        source
    }

    /// Add or replace a workflow definition.
    pub fn insert(&self, graph: WorkflowGraph) -> Result<()> {
        self.graphs
            .write()
            .map_err(poisoned)?
            .insert(graph.workflow.id.clone(), graph);
        Ok(())
    }

    fn lookup(&self, workflow_id: &str) -> Result<WorkflowGraph> {
        self.graphs
            .read()
            .map_err(poisoned)?
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| CadenceError::not_found("workflow", workflow_id))
    }
}

impl WorkflowSource for InMemoryWorkflowSource {
    fn workflow(&self, workflow_id: &str) -> BoxFuture<'_, Result<Workflow>> {
        let result = self.lookup(workflow_id).map(|g| g.workflow);
        Box::pin(async move { result })
    }

    fn graph(&self, workflow_id: &str) -> BoxFuture<'_, Result<WorkflowGraph>> {
        let result = self.lookup(workflow_id);
        Box::pin(async move { result })
    }
}

/// Execution records held in memory, in save order.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    records: RwLock<Vec<Execution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    fn save(&self, execution: &Execution) -> BoxFuture<'_, Result<()>> {
        let exec = execution.clone();
        Box::pin(async move {
            let mut records = self.records.write().map_err(poisoned)?;
            match records.iter_mut().find(|r| r.id == exec.id) {
                Some(existing) => *existing = exec,
                None => records.push(exec),
            }
            Ok(())
        })
    }

    fn get(&self, id: &ExecutionId) -> BoxFuture<'_, Result<Option<Execution>>> {
        let id = id.clone();
        Box::pin(async move {
            let records = self.records.read().map_err(poisoned)?;
            Ok(records.iter().find(|r| r.id == id).cloned())
        })
    }

    fn list_for_workflow(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Execution>>> {
        let workflow_id = workflow_id.to_string();
        Box::pin(async move {
            let records = self.records.read().map_err(poisoned)?;
            Ok(records
                .iter()
                .rev()
                .filter(|r| r.workflow_id == workflow_id)
                .take(limit)
                .cloned()
                .collect())
        })
    }
}

/// Job table held in memory. Replacing a job keeps its registration slot.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<Vec<Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn upsert(&self, job: Job) -> Result<Option<Job>> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        match jobs.iter_mut().find(|j| j.job_id == job.job_id) {
            Some(existing) => Ok(Some(std::mem::replace(existing, job))),
            None => {
                jobs.push(job);
                Ok(None)
            }
        }
    }

    fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        Ok(jobs.iter().find(|j| j.job_id == job_id).cloned())
    }

    fn remove(&self, job_id: &str) -> Result<Option<Job>> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        Ok(jobs
            .iter()
            .position(|j| j.job_id == job_id)
            .map(|idx| jobs.remove(idx)))
    }

    fn list(&self) -> Result<Vec<Job>> {
        Ok(self.jobs.read().map_err(poisoned)?.clone())
    }
}
