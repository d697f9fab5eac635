//! Fan-in: merge many producer streams into one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Merge `sources` into a single channel.
///
/// One relay task is spawned per source. Items keep their order within a
/// source; there is no ordering across sources. Relays only hold weak
/// senders: the single strong sender is released by the last relay to
/// finish, so the returned receiver closes exactly when the active count
/// reaches zero. A relay finishes when its source ends or when `cancel`
/// fires. With no sources the receiver is closed immediately.
///
/// Must be called from within a tokio runtime.
pub fn merge<T, S>(sources: Vec<S>, capacity: usize, cancel: CancellationToken) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    S: Stream<Item = T> + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    if sources.is_empty() {
        return rx;
    }

    let out = tx.downgrade();
    let completion = Arc::new(Completion {
        active: AtomicUsize::new(sources.len()),
        out: Mutex::new(Some(tx)),
    });

    for (index, source) in sources.into_iter().enumerate() {
        let relay = Relay {
            index,
            out: out.clone(),
            completion: Arc::clone(&completion),
            cancel: cancel.clone(),
        };
        tokio::spawn(relay.run(source));
    }

    rx
}

/// [`merge`] for plain channel receivers.
pub fn merge_receivers<T>(
    receivers: Vec<mpsc::Receiver<T>>,
    capacity: usize,
    cancel: CancellationToken,
) -> mpsc::Receiver<T>
where
    T: Send + 'static,
{
    let sources = receivers.into_iter().map(ReceiverStream::new).collect();
    merge(sources, capacity, cancel)
}

/// Relays still running, and the sender that keeps the output open.
struct Completion<T> {
    active: AtomicUsize,
    out: Mutex<Option<mpsc::Sender<T>>>,
}

impl<T> Completion<T> {
    /// Mark one relay finished; the last one closes the output.
    fn finish(&self) -> usize {
        let remaining = self.active.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            self.out.lock().unwrap_or_else(PoisonError::into_inner).take();
        }
        remaining
    }
}

struct Relay<T> {
    index: usize,
    out: mpsc::WeakSender<T>,
    completion: Arc<Completion<T>>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> Relay<T> {
    async fn run<S>(self, mut source: S)
    where
        S: Stream<Item = T> + Unpin,
    {
        let mut forwarded = 0usize;

        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                item = source.next() => item,
            };
            let Some(item) = item else {
                break;
            };

            let Some(out) = self.out.upgrade() else {
                break;
            };
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                sent = out.send(item) => {
                    if sent.is_err() {
                        // Nobody is listening any more.
                        break;
                    }
                }
            }
            forwarded += 1;
        }

        let remaining = self.completion.finish();
        trace!(
            "fan-in source {} drained after {forwarded} items, {remaining} still active",
            self.index
        );
        if remaining == 0 {
            debug!("fan-in complete, output closed");
        }
    }
}
