//! NDJSON framing of run events.
//!
//! One JSON object per line, written as each event is produced. Nothing is
//! buffered beyond the event currently in hand.

use std::convert::Infallible;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::error;

use cadence_core::error::Result;
use cadence_core::types::RunEvent;

pub const CONTENT_TYPE: &str = "application/x-ndjson";

/// Encode one event as a single newline-terminated JSON line.
pub fn encode(event: &RunEvent) -> Result<String> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    Ok(line)
}

/// Turn a run's event channel into a stream of NDJSON frames.
///
/// The stream ends after the first terminal event (`workflow_complete` or
/// `error`) or when the run drops its sender.
pub fn ndjson_frames(
    rx: mpsc::Receiver<RunEvent>,
) -> impl Stream<Item = std::result::Result<String, Infallible>> + Send + 'static {
    ReceiverStream::new(rx)
        .scan(false, |finished, event| {
            if *finished {
                return futures::future::ready(None);
            }
            *finished = event.is_terminal();
            futures::future::ready(Some(event))
        })
        .map(|event| {
            let frame = encode(&event).unwrap_or_else(|e| {
                error!(error = %e, kind = event.kind(), "Failed to encode run event");
                "{\"type\":\"error\",\"content\":\"event encoding failed\"}\n".to_string()
            });
            Ok(frame)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_object_per_line() {
        let line = encode(&RunEvent::NodeComplete {
            node_id: "a1".into(),
            output: "multi\nline".into(),
        })
        .unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "node_complete");
        assert_eq!(value["output"], "multi\nline");
    }

    #[tokio::test]
    async fn frames_arrive_before_run_ends_and_stop_at_terminal() {
        let (tx, rx) = mpsc::channel(1);
        let mut frames = Box::pin(ndjson_frames(rx));

        tx.send(RunEvent::NodeActive {
            node_id: "a".into(),
            agent_name: "A".into(),
        })
        .await
        .unwrap();
        let first = frames.next().await.unwrap().unwrap();
        assert!(first.contains("\"node_active\""));

        tx.send(RunEvent::Error {
            content: "boom".into(),
        })
        .await
        .unwrap();
        let second = frames.next().await.unwrap().unwrap();
        assert!(second.contains("\"error\""));

        // Anything after a terminal event is not framed.
        let _ = tx.try_send(RunEvent::WorkflowComplete {
            final_output: "late".into(),
        });
        assert!(frames.next().await.is_none());
    }
}
