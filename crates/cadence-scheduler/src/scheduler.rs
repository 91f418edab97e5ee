use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cadence_core::error::{CadenceError, Result};
use cadence_core::event::EventBus;
use cadence_core::traits::JobStore;
use cadence_core::types::{Job, JobEvent, ScheduleSpec};
use cadence_engine::{RunRequest, WorkflowRunner};

use crate::trigger::Trigger;

/// How long the loop sleeps when no job is scheduled.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Registration payload for a job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_id: String,
    pub workflow_id: String,
    pub owner_id: String,
    pub input: String,
    pub schedule: ScheduleSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Scheduled,
    Paused,
    Running,
}

/// A job as shown to callers.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub workflow_id: String,
    pub owner_id: String,
    pub input: String,
    pub schedule_type: &'static str,
    pub schedule: String,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub paused: bool,
    pub state: JobState,
}

type InFlight = Arc<Mutex<HashMap<String, usize>>>;

/// Holds one in-flight count for a job; released on drop.
struct RunSlot {
    job_id: String,
    in_flight: InFlight,
}

impl RunSlot {
    fn acquire(in_flight: &InFlight, job_id: &str) -> Self {
        if let Ok(mut map) = in_flight.lock() {
            *map.entry(job_id.to_string()).or_insert(0) += 1;
        }
        Self {
            job_id: job_id.to_string(),
            in_flight: Arc::clone(in_flight),
        }
    }
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        if let Ok(mut map) = self.in_flight.lock() {
            if let Some(count) = map.get_mut(&self.job_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    map.remove(&self.job_id);
                }
            }
        }
    }
}

/// Owns the job registry and fires workflow runs when triggers come due.
///
/// Every registry mutation and every due-job scan holds the same lock, so
/// a fire can never interleave with a concurrent delete or pause. Runs
/// themselves execute on their own tasks and never hold the lock.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    runner: Arc<WorkflowRunner>,
    event_bus: Arc<EventBus>,
    misfire_grace: chrono::Duration,
    registry_lock: tokio::sync::Mutex<()>,
    in_flight: InFlight,
    wake: Notify,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        runner: Arc<WorkflowRunner>,
        event_bus: Arc<EventBus>,
        misfire_grace_secs: u64,
    ) -> Self {
        Self {
            store,
            runner,
            event_bus,
            misfire_grace: chrono::Duration::seconds(misfire_grace_secs as i64),
            registry_lock: tokio::sync::Mutex::new(()),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            wake: Notify::new(),
        }
    }

    pub fn runner(&self) -> &Arc<WorkflowRunner> {
        &self.runner
    }

    /// Register a job, replacing any job with the same id wholesale.
    pub async fn register(&self, spec: JobSpec) -> Result<Job> {
        self.register_at(spec, Utc::now()).await
    }

    pub async fn register_at(&self, spec: JobSpec, now: DateTime<Utc>) -> Result<Job> {
        for (field, value) in [
            ("job_id", &spec.job_id),
            ("workflow_id", &spec.workflow_id),
            ("owner_id", &spec.owner_id),
        ] {
            if value.trim().is_empty() {
                return Err(CadenceError::Validation(format!("{} must not be empty", field)));
            }
        }
        let trigger = Trigger::from_spec(&spec.schedule)?;
        let next_fire_time = first_fire_or_reject(&trigger, now)?;

        let job = Job {
            job_id: spec.job_id,
            workflow_id: spec.workflow_id,
            owner_id: spec.owner_id,
            input: spec.input,
            next_fire_time: Some(next_fire_time),
            schedule: spec.schedule,
            paused: false,
        };

        let _guard = self.registry_lock.lock().await;
        let replaced = self.store.upsert(job.clone())?;
        info!(
            job_id = %job.job_id,
            workflow_id = %job.workflow_id,
            schedule = %job.schedule.describe(),
            next_fire_time = ?job.next_fire_time,
            replaced = replaced.is_some(),
            "Job registered"
        );
        self.event_bus.publish(JobEvent::Registered {
            job_id: job.job_id.clone(),
        });
        self.wake.notify_one();
        Ok(job)
    }

    pub fn get(&self, job_id: &str) -> Result<Job> {
        self.store
            .get(job_id)?
            .ok_or_else(|| CadenceError::not_found("job", job_id))
    }

    pub fn list(&self) -> Result<Vec<Job>> {
        self.store.list()
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.in_flight
            .lock()
            .map(|map| map.get(job_id).copied().unwrap_or(0) > 0)
            .unwrap_or(false)
    }

    pub fn view(&self, job: &Job) -> JobView {
        let state = if self.is_running(&job.job_id) {
            JobState::Running
        } else if job.paused {
            JobState::Paused
        } else {
            JobState::Scheduled
        };
        JobView {
            job_id: job.job_id.clone(),
            workflow_id: job.workflow_id.clone(),
            owner_id: job.owner_id.clone(),
            input: job.input.clone(),
            schedule_type: job.schedule.schedule_type(),
            schedule: job.schedule.describe(),
            next_fire_time: job.next_fire_time,
            paused: job.paused,
            state,
        }
    }

    /// Stop future fires. A run already in flight is left alone.
    pub async fn pause(&self, job_id: &str) -> Result<Job> {
        let _guard = self.registry_lock.lock().await;
        let mut job = self.get(job_id)?;
        job.paused = true;
        job.next_fire_time = None;
        self.store.upsert(job.clone())?;
        info!(job_id = %job_id, "Job paused");
        self.event_bus.publish(JobEvent::Paused {
            job_id: job_id.to_string(),
        });
        Ok(job)
    }

    pub async fn resume(&self, job_id: &str) -> Result<Job> {
        self.resume_at(job_id, Utc::now()).await
    }

    /// Re-arm a paused job, counting from `now`. Resuming an active job is a no-op.
    pub async fn resume_at(&self, job_id: &str, now: DateTime<Utc>) -> Result<Job> {
        let _guard = self.registry_lock.lock().await;
        let mut job = self.get(job_id)?;
        if !job.paused {
            return Ok(job);
        }
        let trigger = Trigger::from_spec(&job.schedule)?;
        job.next_fire_time = Some(first_fire_or_reject(&trigger, now)?);
        job.paused = false;
        self.store.upsert(job.clone())?;
        info!(job_id = %job_id, next_fire_time = ?job.next_fire_time, "Job resumed");
        self.event_bus.publish(JobEvent::Resumed {
            job_id: job_id.to_string(),
        });
        self.wake.notify_one();
        Ok(job)
    }

    /// Start one run now. The schedule and `next_fire_time` are untouched,
    /// and a run already in flight does not prevent this one.
    pub async fn trigger(&self, job_id: &str) -> Result<JoinHandle<()>> {
        let _guard = self.registry_lock.lock().await;
        let job = self.get(job_id)?;
        Ok(self.fire(&job, true))
    }

    /// Remove a job, whatever its state. An in-flight run finishes on its own.
    pub async fn delete(&self, job_id: &str) -> Result<Job> {
        let _guard = self.registry_lock.lock().await;
        let removed = self
            .store
            .remove(job_id)?
            .ok_or_else(|| CadenceError::not_found("job", job_id))?;
        info!(job_id = %job_id, running = self.is_running(job_id), "Job deleted");
        self.event_bus.publish(JobEvent::Deleted {
            job_id: job_id.to_string(),
        });
        Ok(removed)
    }

    /// Fire every job due at `now` and advance its next fire time.
    ///
    /// Returns the handles of the runs started.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<JoinHandle<()>>> {
        let _guard = self.registry_lock.lock().await;
        let mut started = Vec::new();

        for mut job in self.store.list()? {
            let due = match job.next_fire_time {
                Some(due) if !job.paused && due <= now => due,
                _ => continue,
            };

            let trigger = match Trigger::from_spec(&job.schedule) {
                Ok(t) => t,
                Err(e) => {
                    error!(job_id = %job.job_id, error = %e, "Stored job has an invalid schedule, pausing it");
                    self.park(job)?;
                    continue;
                }
            };
            job.next_fire_time = trigger.next_after(due, now);
            if job.next_fire_time.is_none() {
                warn!(job_id = %job.job_id, "Schedule has no further fire time, pausing job");
                self.park(job)?;
                continue;
            }

            let late = now - due;
            if late > self.misfire_grace {
                warn!(
                    job_id = %job.job_id,
                    late_secs = late.num_seconds(),
                    "Missed fire outside grace period, skipping"
                );
                self.event_bus.publish(JobEvent::Skipped {
                    job_id: job.job_id.clone(),
                    reason: "misfire".to_string(),
                });
            } else if self.is_running(&job.job_id) {
                warn!(job_id = %job.job_id, "Previous run still in flight, skipping fire");
                self.event_bus.publish(JobEvent::Skipped {
                    job_id: job.job_id.clone(),
                    reason: "still running".to_string(),
                });
            } else {
                started.push(self.fire(&job, false));
            }

            self.store.upsert(job)?;
        }

        Ok(started)
    }

    /// Pause a job the loop can no longer schedule. Caller holds the registry lock.
    fn park(&self, mut job: Job) -> Result<()> {
        job.paused = true;
        job.next_fire_time = None;
        let job_id = job.job_id.clone();
        self.store.upsert(job)?;
        self.event_bus.publish(JobEvent::Paused { job_id });
        Ok(())
    }

    /// Subscribe to job lifecycle notices.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<JobEvent> {
        self.event_bus.subscribe()
    }

    /// Earliest next fire time over all active jobs.
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.store
            .list()
            .ok()?
            .into_iter()
            .filter(|j| !j.paused)
            .filter_map(|j| j.next_fire_time)
            .min()
    }

    /// Run the timer loop. Blocks until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(jobs = self.store.list().map(|j| j.len()).unwrap_or(0), "Scheduler started");

        loop {
            let now = Utc::now();
            match self.tick(now).await {
                Ok(started) if !started.is_empty() => {
                    debug!(count = started.len(), "Scheduled runs started");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Scheduler tick failed"),
            }

            let delay = match self.next_wakeup() {
                Some(at) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
                None => IDLE_WAIT,
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => {
                    debug!("Scheduler woken by registry change");
                }
                _ = cancel.cancelled() => {
                    info!("Scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Spawn one run of `job`. No observer is attached; the run's events
    /// go to the debug log only.
    fn fire(&self, job: &Job, manual: bool) -> JoinHandle<()> {
        let slot = RunSlot::acquire(&self.in_flight, &job.job_id);
        let runner = Arc::clone(&self.runner);
        let event_bus = Arc::clone(&self.event_bus);
        let job_id = job.job_id.clone();
        let request = RunRequest {
            workflow_id: job.workflow_id.clone(),
            owner_id: job.owner_id.clone(),
            input: job.input.clone(),
        };

        info!(job_id = %job_id, workflow_id = %request.workflow_id, manual, "Firing job");
        event_bus.publish(JobEvent::Fired {
            job_id: job_id.clone(),
            manual,
        });

        tokio::spawn(async move {
            let result = runner.run(request, None).await;
            drop(slot);
            let succeeded = match result {
                Ok(res) => {
                    info!(job_id = %job_id, execution_id = %res.execution_id, "Job run completed");
                    true
                }
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Job run failed");
                    false
                }
            };
            event_bus.publish(JobEvent::Finished { job_id, succeeded });
        })
    }
}

fn first_fire_or_reject(trigger: &Trigger, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    trigger
        .first_fire(now)
        .ok_or_else(|| CadenceError::Validation("schedule has no future fire time".to_string()))
}
