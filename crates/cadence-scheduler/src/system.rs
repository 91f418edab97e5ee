//! The built-in system job.
//!
//! User jobs may live only in memory, but this one job is upserted every
//! time the process starts, so it always exists. Its workflow is not stored
//! anywhere; [`SystemWorkflowSource`] serves it in front of the real source.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use cadence_core::auth::SYSTEM_OWNER_ID;
use cadence_core::error::Result;
use cadence_core::traits::WorkflowSource;
use cadence_core::types::{Job, ScheduleSpec, Workflow, WorkflowGraph};
use cadence_store::science_research_graph;

use crate::scheduler::{JobSpec, Scheduler};

pub const SYSTEM_JOB_ID: &str = "system:science-digest";
pub const SYSTEM_WORKFLOW_ID: &str = "system:science-digest";
pub const SYSTEM_JOB_INPUT: &str = "Latest science news";
pub const SYSTEM_JOB_INTERVAL_HOURS: u32 = 6;

/// Serves the system workflow and delegates every other id.
pub struct SystemWorkflowSource {
    system: WorkflowGraph,
    inner: Arc<dyn WorkflowSource>,
}

impl SystemWorkflowSource {
    pub fn new(inner: Arc<dyn WorkflowSource>) -> Self {
        let mut system = science_research_graph(SYSTEM_WORKFLOW_ID, SYSTEM_OWNER_ID);
        system.workflow.name = "Science Digest".to_string();
        Self { system, inner }
    }
}

impl WorkflowSource for SystemWorkflowSource {
    fn workflow(&self, workflow_id: &str) -> BoxFuture<'_, Result<Workflow>> {
        if workflow_id == SYSTEM_WORKFLOW_ID {
            let workflow = self.system.workflow.clone();
            return Box::pin(async move { Ok(workflow) });
        }
        self.inner.workflow(workflow_id)
    }

    fn graph(&self, workflow_id: &str) -> BoxFuture<'_, Result<WorkflowGraph>> {
        if workflow_id == SYSTEM_WORKFLOW_ID {
            let graph = self.system.clone();
            return Box::pin(async move { Ok(graph) });
        }
        self.inner.graph(workflow_id)
    }
}

pub fn system_job_spec() -> JobSpec {
    JobSpec {
        job_id: SYSTEM_JOB_ID.to_string(),
        workflow_id: SYSTEM_WORKFLOW_ID.to_string(),
        owner_id: SYSTEM_OWNER_ID.to_string(),
        input: SYSTEM_JOB_INPUT.to_string(),
        schedule: ScheduleSpec::Interval {
            hours: SYSTEM_JOB_INTERVAL_HOURS,
            minutes: 0,
            seconds: 0,
        },
    }
}

/// Startup hook: upsert the system job, whatever the store already holds.
pub async fn install_system_job(scheduler: &Scheduler) -> Result<Job> {
    let job = scheduler.register(system_job_spec()).await?;
    info!(job_id = %job.job_id, next_fire_time = ?job.next_fire_time, "System job installed");
    Ok(job)
}
