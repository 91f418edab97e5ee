use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cadence_core::types::JobEvent;

/// Write every job lifecycle notice to the log until cancelled or the
/// bus is gone. Returns the number of notices logged.
pub fn spawn_job_log(
    mut rx: broadcast::Receiver<JobEvent>,
    cancel: CancellationToken,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut logged = 0;
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => {
                        log_event(&event);
                        logged += 1;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Job log fell behind, notices dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = cancel.cancelled() => break,
            }
        }
        logged
    })
}

fn log_event(event: &JobEvent) {
    let job_id = event.job_id();
    match event {
        JobEvent::Finished { succeeded: false, .. } => {
            error!(job_id, event = event.kind(), "Job run failed");
        }
        JobEvent::Skipped { reason, .. } => {
            warn!(job_id, event = event.kind(), reason = %reason, "Job fire skipped");
        }
        JobEvent::Fired { manual, .. } => {
            info!(job_id, event = event.kind(), manual, "Job event");
        }
        _ => info!(job_id, event = event.kind(), "Job event"),
    }
}
