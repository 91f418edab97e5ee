//! Ownership checks in front of the runner and the scheduler.
//!
//! Every check runs before any state change or engine invocation, so a
//! rejected request has no side effects.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use cadence_core::auth::{ensure_owner, Caller};
use cadence_core::error::{CadenceError, Result};
use cadence_core::types::{Execution, ExecutionId, Job, RunEvent};
use cadence_engine::{RunRequest, RunResult, WorkflowRunner};

use crate::scheduler::{JobSpec, JobView, Scheduler};

pub struct Guard {
    scheduler: Arc<Scheduler>,
    runner: Arc<WorkflowRunner>,
}

impl Guard {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let runner = Arc::clone(scheduler.runner());
        Self { scheduler, runner }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// The caller must be the owner named in the request and own the workflow.
    async fn check_workflow(&self, caller: &Caller, owner_id: &str, workflow_id: &str) -> Result<()> {
        let checked = async {
            ensure_owner(caller, owner_id)?;
            let workflow = self.runner.source().workflow(workflow_id).await?;
            ensure_owner(caller, &workflow.owner_id)
        }
        .await;
        if let Err(CadenceError::Forbidden) = &checked {
            warn!(caller = %caller.id, workflow_id = %workflow_id, "Workflow access denied");
        }
        checked
    }

    fn owned_job(&self, caller: &Caller, job_id: &str) -> Result<Job> {
        let job = self.scheduler.get(job_id)?;
        if let Err(e) = ensure_owner(caller, &job.owner_id) {
            warn!(caller = %caller.id, job_id = %job_id, "Job access denied");
            return Err(e);
        }
        Ok(job)
    }

    // ── Runs ────────────────────────────────────────────────────

    pub async fn run(&self, caller: &Caller, request: RunRequest) -> Result<RunResult> {
        self.check_workflow(caller, &request.owner_id, &request.workflow_id)
            .await?;
        self.runner.run(request, None).await
    }

    /// Check ownership, then start the run and hand back its event channel.
    pub async fn run_streamed(
        &self,
        caller: &Caller,
        request: RunRequest,
    ) -> Result<mpsc::Receiver<RunEvent>> {
        self.check_workflow(caller, &request.owner_id, &request.workflow_id)
            .await?;
        Ok(self.runner.spawn_streamed(request))
    }

    pub async fn get_execution(&self, caller: &Caller, id: &ExecutionId) -> Result<Execution> {
        let execution = self
            .runner
            .executions()
            .get(id)
            .await?
            .ok_or_else(|| CadenceError::not_found("execution", id.to_string()))?;
        ensure_owner(caller, &execution.owner_id)?;
        Ok(execution)
    }

    // ── Jobs ────────────────────────────────────────────────────

    /// Register or replace a job. Replacing requires owning the existing job too.
    pub async fn register_job(&self, caller: &Caller, spec: JobSpec) -> Result<JobView> {
        self.check_workflow(caller, &spec.owner_id, &spec.workflow_id)
            .await?;
        match self.scheduler.get(&spec.job_id) {
            Ok(existing) => ensure_owner(caller, &existing.owner_id)?,
            Err(CadenceError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }
        let job = self.scheduler.register(spec).await?;
        Ok(self.scheduler.view(&job))
    }

    /// Jobs owned by the caller.
    pub fn list_jobs(&self, caller: &Caller) -> Result<Vec<JobView>> {
        if caller.id.is_empty() {
            return Err(CadenceError::Unauthenticated);
        }
        Ok(self
            .scheduler
            .list()?
            .iter()
            .filter(|job| job.owner_id == caller.id)
            .map(|job| self.scheduler.view(job))
            .collect())
    }

    /// Every job of every owner, unfiltered. Administrative use only.
    pub fn list_all_jobs(&self) -> Result<Vec<JobView>> {
        Ok(self
            .scheduler
            .list()?
            .iter()
            .map(|job| self.scheduler.view(job))
            .collect())
    }

    pub fn get_job(&self, caller: &Caller, job_id: &str) -> Result<JobView> {
        let job = self.owned_job(caller, job_id)?;
        Ok(self.scheduler.view(&job))
    }

    pub async fn trigger_job(&self, caller: &Caller, job_id: &str) -> Result<JoinHandle<()>> {
        self.owned_job(caller, job_id)?;
        self.scheduler.trigger(job_id).await
    }

    pub async fn pause_job(&self, caller: &Caller, job_id: &str) -> Result<JobView> {
        self.owned_job(caller, job_id)?;
        let job = self.scheduler.pause(job_id).await?;
        Ok(self.scheduler.view(&job))
    }

    pub async fn resume_job(&self, caller: &Caller, job_id: &str) -> Result<JobView> {
        self.owned_job(caller, job_id)?;
        let job = self.scheduler.resume(job_id).await?;
        Ok(self.scheduler.view(&job))
    }

    pub async fn delete_job(&self, caller: &Caller, job_id: &str) -> Result<()> {
        self.owned_job(caller, job_id)?;
        self.scheduler.delete(job_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::config::AmbiguityPolicy;
    use cadence_core::event::EventBus;
    use cadence_core::types::ScheduleSpec;
    use cadence_store::{InMemoryExecutionStore, InMemoryJobStore, InMemoryWorkflowSource};
    use cadence_test_utils::{linear_graph, ScriptedCapability};

    fn guard_with(capability: Arc<ScriptedCapability>) -> Guard {
        let runner = WorkflowRunner::new(
            Arc::new(InMemoryWorkflowSource::with_graphs(vec![
                linear_graph("wf-alice", "alice", &["A", "B"]),
                linear_graph("wf-bob", "bob", &["A"]),
            ])),
            Arc::new(InMemoryExecutionStore::new()),
            capability,
            AmbiguityPolicy::FirstMatch,
        );
        let scheduler = Scheduler::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(runner),
            Arc::new(EventBus::default()),
            3600,
        );
        Guard::new(Arc::new(scheduler))
    }

    fn alice() -> Caller {
        Caller::new("alice")
    }

    fn bob() -> Caller {
        Caller::new("bob")
    }

    fn spec(job_id: &str, workflow_id: &str, owner_id: &str) -> JobSpec {
        JobSpec {
            job_id: job_id.into(),
            workflow_id: workflow_id.into(),
            owner_id: owner_id.into(),
            input: "topic".into(),
            schedule: ScheduleSpec::Cron {
                expression: "0 9 * * *".into(),
            },
        }
    }

    fn run_request(workflow_id: &str, owner_id: &str) -> RunRequest {
        RunRequest {
            workflow_id: workflow_id.into(),
            owner_id: owner_id.into(),
            input: "x".into(),
        }
    }

    #[tokio::test]
    async fn foreign_job_operations_are_forbidden_and_change_nothing() {
        let capability = Arc::new(ScriptedCapability::new());
        let guard = guard_with(capability.clone());
        let before = guard
            .register_job(&alice(), spec("nightly", "wf-alice", "alice"))
            .await
            .unwrap();

        assert!(matches!(guard.get_job(&bob(), "nightly"), Err(CadenceError::Forbidden)));
        assert!(matches!(
            guard.pause_job(&bob(), "nightly").await,
            Err(CadenceError::Forbidden)
        ));
        assert!(matches!(
            guard.resume_job(&bob(), "nightly").await,
            Err(CadenceError::Forbidden)
        ));
        assert!(matches!(
            guard.trigger_job(&bob(), "nightly").await,
            Err(CadenceError::Forbidden)
        ));
        assert!(matches!(
            guard.delete_job(&bob(), "nightly").await,
            Err(CadenceError::Forbidden)
        ));
        // Hijacking the id by re-registering onto bob's own workflow.
        assert!(matches!(
            guard.register_job(&bob(), spec("nightly", "wf-bob", "bob")).await,
            Err(CadenceError::Forbidden)
        ));

        let after = guard.get_job(&alice(), "nightly").unwrap();
        assert_eq!(after.owner_id, "alice");
        assert_eq!(after.workflow_id, before.workflow_id);
        assert_eq!(after.next_fire_time, before.next_fire_time);
        assert!(!after.paused);
        assert_eq!(capability.call_count(), 0);
    }

    #[tokio::test]
    async fn registration_requires_owning_the_workflow() {
        let guard = guard_with(Arc::new(ScriptedCapability::new()));
        // Claims to be alice in the body.
        let err = guard
            .register_job(&bob(), spec("j", "wf-alice", "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::Forbidden));
        // Honest about itself, but the workflow is alice's.
        let err = guard
            .register_job(&bob(), spec("j", "wf-alice", "bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::Forbidden));
        assert!(guard.list_all_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn listings_filter_by_owner_except_admin() {
        let guard = guard_with(Arc::new(ScriptedCapability::new()));
        guard
            .register_job(&alice(), spec("a1", "wf-alice", "alice"))
            .await
            .unwrap();
        guard
            .register_job(&bob(), spec("b1", "wf-bob", "bob"))
            .await
            .unwrap();

        let mine: Vec<_> = guard
            .list_jobs(&alice())
            .unwrap()
            .into_iter()
            .map(|j| j.job_id)
            .collect();
        assert_eq!(mine, vec!["a1"]);
        assert_eq!(guard.list_all_jobs().unwrap().len(), 2);
        assert!(matches!(
            guard.list_jobs(&Caller::new("")),
            Err(CadenceError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn runs_are_owner_checked_before_invocation() {
        let capability = Arc::new(ScriptedCapability::new());
        let guard = guard_with(capability.clone());

        let err = guard
            .run(&bob(), run_request("wf-alice", "bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::Forbidden));
        assert!(guard
            .run_streamed(&bob(), run_request("wf-alice", "alice"))
            .await
            .is_err());
        assert_eq!(capability.call_count(), 0);

        let result = guard
            .run(&alice(), run_request("wf-alice", "alice"))
            .await
            .unwrap();
        let record = guard
            .get_execution(&alice(), &result.execution_id)
            .await
            .unwrap();
        assert_eq!(record.owner_id, "alice");
        assert!(matches!(
            guard.get_execution(&bob(), &result.execution_id).await,
            Err(CadenceError::Forbidden)
        ));
    }
}
