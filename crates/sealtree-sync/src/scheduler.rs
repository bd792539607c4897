//! Debounced rebuild coordinator
//!
//! A single task owns the change queue. It sleeps until the first change
//! arrives, restarts the quiet-period timer on every further change, then
//! runs one pass for the whole batch. While a pass is running nothing is
//! read from the queue; changes made meanwhile pile up and become the next
//! batch, so at most one pass is ever in flight from this loop.

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Run the coordinator until the queue closes or `cancel` fires.
///
/// Returns the number of passes executed. A batch still waiting out its
/// quiet period when the queue closes is flushed; on cancellation it is dropped.
pub async fn debounce_loop<T, F, Fut>(
    mut rx: mpsc::Receiver<T>,
    window: Duration,
    cancel: CancellationToken,
    mut on_batch: F,
) -> usize
where
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut passes = 0;

    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(e) => e,
                None => break,
            },
        };

        let mut batch = vec![first];
        let mut closed = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(pending = batch.len(), "shutdown with pending changes");
                    return passes;
                }
                _ = tokio::time::sleep(window) => break,
                event = rx.recv() => match event {
                    Some(e) => batch.push(e),
                    None => {
                        closed = true;
                        break;
                    }
                },
            }
        }

        debug!(changes = batch.len(), "quiet period elapsed");
        on_batch(batch).await;
        passes += 1;

        if closed {
            break;
        }
    }

    info!(passes, "rebuild coordinator stopped");
    passes
}
