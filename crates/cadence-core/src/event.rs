use tokio::sync::broadcast;

use crate::types::JobEvent;

/// Default number of notices a slow subscriber may fall behind by.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Fan-out of job lifecycle notices to any number of subscribers.
///
/// Publishing never blocks and never fails: with no subscribers the
/// notice is dropped, and a subscriber that falls more than `capacity`
/// notices behind sees `RecvError::Lagged` on its next receive.
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many subscribers received the notice.
    pub fn publish(&self, event: JobEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Registered { job_id }
            | Self::Fired { job_id, .. }
            | Self::Finished { job_id, .. }
            | Self::Skipped { job_id, .. }
            | Self::Paused { job_id }
            | Self::Resumed { job_id }
            | Self::Deleted { job_id } => job_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "registered",
            Self::Fired { .. } => "fired",
            Self::Finished { .. } => "finished",
            Self::Skipped { .. } => "skipped",
            Self::Paused { .. } => "paused",
            Self::Resumed { .. } => "resumed",
            Self::Deleted { .. } => "deleted",
        }
    }
}
