//! Agent stdout reader task.
//!
//! Drives a [`FramedRead`] over the agent's stdout with [`EventCodec`] and
//! forwards every parsed [`DomainEvent`] through an unbounded channel, in
//! emission order.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use crate::models::event::DomainEvent;
use crate::stream::codec::EventCodec;

/// Read `stdout` to end of stream, forwarding events to `event_tx`.
///
/// Returns the number of events forwarded. When the receiver goes away the
/// reader keeps draining `stdout` so the agent never blocks on a full pipe.
/// An unrecoverable read error is reported once as [`DomainEvent::Error`]
/// and ends the task.
pub async fn run_reader<R>(stdout: R, event_tx: mpsc::UnboundedSender<DomainEvent>) -> usize
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, EventCodec::new());
    let mut forwarded = 0_usize;
    let mut receiver_open = true;

    while let Some(item) = framed.next().await {
        match item {
            Ok(events) => {
                if !receiver_open {
                    continue;
                }
                for event in events {
                    if event_tx.send(event).is_err() {
                        debug!("event receiver dropped, draining remaining output");
                        receiver_open = false;
                        break;
                    }
                    forwarded += 1;
                }
            }
            Err(err) => {
                warn!(error = %err, "agent output stream failed");
                if receiver_open {
                    let _ = event_tx.send(DomainEvent::Error {
                        message: err.to_string(),
                    });
                }
                break;
            }
        }
    }

    debug!(forwarded, "agent output stream closed");
    forwarded
}
