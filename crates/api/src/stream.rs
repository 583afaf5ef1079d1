//! SSE plumbing for the per-task event stream.
//!
//! Each connection attaches one bounded subscription to the task's
//! progress bus and forwards events as data-only SSE frames. The first
//! frame is always a `snapshot` of the task's current state, so clients
//! never start from nothing; the stream ends after forwarding a
//! terminal event. Quiet intervals emit a `: ping` comment carrying no
//! state.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, Sse};
use futures::Stream;
use genrelay_core::task::{Task, TaskEvent, TaskSnapshot};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// Frames buffered between the forwarder and the HTTP connection.
const STREAM_BUFFER: usize = 32;

/// Build the SSE response for one task.
///
/// The heavy lifting runs on a spawned forwarder so the response
/// stream itself is a plain channel receiver; dropping the connection
/// closes the channel and the forwarder detaches its subscription.
pub fn task_event_stream(
    task: Arc<Task>,
    heartbeat: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Event>(STREAM_BUFFER);
    tokio::spawn(forward(task, tx, heartbeat));
    Sse::new(ReceiverStream::new(rx).map(Ok))
}

/// Forward bus events for `task` into `tx` until a terminal event is
/// sent or the client goes away.
async fn forward(task: Arc<Task>, tx: mpsc::Sender<Event>, heartbeat: Duration) {
    let mut subscription = task.attach();

    // Opening frame: the current state, so late joiners see where the
    // task already is. If the task is terminal, attach() has also
    // replayed the final event into the subscription.
    if send(&tx, &snapshot_event(task.snapshot())).await.is_err() {
        task.detach(subscription.id);
        return;
    }

    loop {
        match tokio::time::timeout(heartbeat, subscription.receiver.recv()).await {
            Ok(Some(event)) => {
                let terminal = event.status.is_terminal();
                if send(&tx, &event).await.is_err() || terminal {
                    break;
                }
            }
            // Subscription closed under us (task dropped).
            Ok(None) => break,
            Err(_) => {
                // The channel is lossy, so a terminal event published
                // into a full channel may have been dropped. Recheck
                // before heartbeating rather than pinging forever.
                if let Some(final_event) = task.final_event() {
                    let _ = send(&tx, &final_event).await;
                    break;
                }
                if tx.send(Event::default().comment("ping")).await.is_err() {
                    break;
                }
            }
        }
    }

    task.detach(subscription.id);
}

/// The attach-time `snapshot` frame, shaped like every other bus event.
fn snapshot_event(snap: TaskSnapshot) -> TaskEvent {
    TaskEvent {
        event_type: "snapshot".to_string(),
        task_id: snap.task_id,
        status: snap.status,
        progress: snap.progress,
        message: snap.message,
        result: snap.result,
        error: snap.error,
    }
}

async fn send(tx: &mpsc::Sender<Event>, event: &TaskEvent) -> Result<(), ()> {
    let frame = match serde_json::to_string(event) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            tracing::error!(task_id = %event.task_id, error = %e, "Failed to encode stream event");
            return Err(());
        }
    };
    tx.send(frame).await.map_err(|_| ())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
