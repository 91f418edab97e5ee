//! Recurring jobs: trigger parsing, the scheduler loop, the system job and
//! the ownership guard that fronts all of it.

pub mod guard;
pub mod journal;
pub mod scheduler;
pub mod system;
pub mod trigger;

pub use guard::Guard;
pub use journal::spawn_job_log;
pub use scheduler::{JobSpec, JobState, JobView, Scheduler};
pub use system::{install_system_job, SystemWorkflowSource, SYSTEM_JOB_ID};
pub use trigger::{parse_cron, Trigger};
