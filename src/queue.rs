//! The reducer queue (§2). A single-cell, single-consumer, priority FIFO
//! async state serializer: jobs are `T -> Future<Output = T>` closures that
//! run one at a time against the current state, in priority order, then
//! FIFO within a priority tier.
//!
//! Design note: the worker is a dedicated background task owned by the
//! queue, not an "optimistic try-lock, whoever gets there becomes the
//! worker" scheme. The latter has a lost-wakeup hazard: a job pushed onto
//! `pending` right after the current worker observes `pending` is empty,
//! but before it releases the run-lock, would never be picked up. A
//! standing worker task that loops on a channel has no such gap.

use crate::errors::QueueError;
use futures::channel::oneshot;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_futures::Instrument;

/// Higher runs first. Only two priorities are used by this engine (§4.1,
/// §4.4): claim-channel work preempts claim validation so on-chain claim
/// submission (racing a dispute deadline) is never delayed behind a backlog
/// of incoming-claim validations.
pub const PRIORITY_VALIDATE_CLAIM: u8 = 0;
pub const PRIORITY_CLAIM_CHANNEL: u8 = 1;

type Reducer<T> = Box<dyn FnOnce(T) -> Pin<Box<dyn Future<Output = T> + Send>> + Send>;

struct Job<T> {
    priority: u8,
    sequence: u64,
    reducer: Reducer<T>,
    reply: oneshot::Sender<T>,
}

impl<T> PartialEq for Job<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl<T> Eq for Job<T> {}

impl<T> PartialOrd for Job<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Job<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; compare priority directly so higher
        // numbers pop first, and invert sequence so earlier-enqueued jobs
        // within the same priority tier pop first (FIFO).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// A single-cell async state serializer.
///
/// `add` enqueues a reducer and returns once that reducer (and everything
/// enqueued ahead of it) has run. Reducers never see a torn or
/// partially-applied state: the queue holds exactly one `T` at a time and
/// only the currently-running reducer may touch it.
pub struct ReducerQueue<T> {
    sender: mpsc::UnboundedSender<Job<T>>,
    sequence: AtomicU64,
    closed: Arc<RwLock<bool>>,
    /// Mirror of the last committed state, for `state()`'s best-effort
    /// synchronous reads (§4.1). Only the worker task ever writes to it.
    committed: Arc<RwLock<T>>,
}

impl<T: Clone + Send + 'static> ReducerQueue<T> {
    pub fn new(initial: T) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job<T>>();
        let closed = Arc::new(RwLock::new(false));
        let committed = Arc::new(RwLock::new(initial.clone()));
        let committed_writer = committed.clone();

        tokio::spawn(async move {
            let mut heap: BinaryHeap<Job<T>> = BinaryHeap::new();
            let mut state = initial;

            loop {
                // Drain whatever has arrived so far into the heap before
                // picking the next job, so priority ordering is honored
                // across bursts of enqueues rather than degrading to FIFO
                // arrival order.
                match heap.pop() {
                    Some(job) => {
                        let span = tracing::debug_span!(
                            "reducer",
                            priority = job.priority,
                            sequence = job.sequence
                        );
                        state = (job.reducer)(state).instrument(span).await;
                        *committed_writer.write() = state.clone();
                        let _ = job.reply.send(state.clone());
                    }
                    None => match receiver.recv().await {
                        Some(job) => heap.push(job),
                        None => break,
                    },
                }

                while let Ok(job) = receiver.try_recv() {
                    heap.push(job);
                }
            }
        });

        ReducerQueue {
            sender,
            sequence: AtomicU64::new(0),
            closed,
            committed,
        }
    }

    /// Best-effort synchronous read of the latest committed value. Does not
    /// linearize with in-flight reducers (§4.1).
    pub fn state(&self) -> T {
        self.committed.read().clone()
    }

    /// Enqueues a reducer at the given priority and waits for it to run,
    /// returning the state it committed.
    /// Returns `QueueError::Closed` if the queue's worker has shut down.
    pub async fn add<F, Fut>(&self, priority: u8, reducer: F) -> Result<T, QueueError>
    where
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        if *self.closed.read() {
            return Err(QueueError::Closed);
        }

        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        let (reply, wait) = oneshot::channel();
        let job = Job {
            priority,
            sequence,
            reducer: Box::new(move |state| Box::pin(reducer(state))),
            reply,
        };

        self.sender.send(job).map_err(|_| QueueError::Closed)?;
        wait.await.map_err(|_| QueueError::Cancelled)
    }

    /// Marks the queue closed. In-flight and already-enqueued jobs still
    /// run to completion; only new `add` calls are rejected from this point
    /// on.
    pub fn close(&self) {
        *self.closed.write() = true;
    }

    /// Closes the queue to new `add`s, waits for everything already
    /// enqueued to drain, and returns the final state (§4.1). Used to tear
    /// down the deposit side-queue and merge its result back into the main
    /// outgoing queue (§4.2).
    pub async fn clear(&self) -> Result<T, QueueError> {
        *self.closed.write() = true;

        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        let (reply, wait) = oneshot::channel();
        // Lowest possible priority so this drains after every real job
        // already enqueued ahead of it, never ahead of one.
        let job = Job {
            priority: u8::MAX,
            sequence,
            reducer: Box::new(|state| Box::pin(async move { state })),
            reply,
        };

        self.sender.send(job).map_err(|_| QueueError::Closed)?;
        wait.await.map_err(|_| QueueError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering as Ord2};

    #[tokio::test]
    async fn claim_channel_preempts_validate_claim() {
        let queue = Arc::new(ReducerQueue::new(Vec::<u8>::new()));

        // Enqueue a blocking job first so the validate-claim and
        // claim-channel jobs below both land in the heap together, rather
        // than one running before the other is even enqueued.
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let blocker = queue.add(PRIORITY_VALIDATE_CLAIM, move |mut state: Vec<u8>| async move {
            let _ = gate_rx.await;
            state.push(0);
            state
        });
        let blocker_handle = tokio::spawn(blocker);
        tokio::task::yield_now().await;

        let q1 = queue.clone();
        let q2 = queue.clone();
        let validate = q1.add(PRIORITY_VALIDATE_CLAIM, |mut state: Vec<u8>| async move {
            state.push(1);
            state
        });
        let claim_channel = q2.add(PRIORITY_CLAIM_CHANNEL, |mut state: Vec<u8>| async move {
            state.push(2);
            state
        });

        let validate_handle = tokio::spawn(validate);
        let claim_channel_handle = tokio::spawn(claim_channel);
        tokio::task::yield_now().await;
        let _ = gate_tx.send(());

        blocker_handle.await.unwrap().unwrap();
        validate_handle.await.unwrap().unwrap();
        claim_channel_handle.await.unwrap().unwrap();

        // The claim-channel job (priority 1) must commit before the
        // validate-claim job (priority 0) that was queued ahead of it.
        assert_eq!(queue.state(), vec![0, 2, 1]);
    }

    #[tokio::test]
    async fn add_resolves_after_reducer_applied() {
        let queue = ReducerQueue::new(0i32);
        queue
            .add(PRIORITY_VALIDATE_CLAIM, |state| async move { state + 1 })
            .await
            .unwrap();

        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = seen.clone();
        queue
            .add(PRIORITY_VALIDATE_CLAIM, move |state: i32| async move {
                seen2.store(state as u32, Ord2::SeqCst);
                state
            })
            .await
            .unwrap();
        assert_eq!(seen.load(Ord2::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_queue_rejects_new_jobs() {
        let queue = ReducerQueue::new(0i32);
        queue.close();
        let result = queue
            .add(PRIORITY_VALIDATE_CLAIM, |state| async move { state })
            .await;
        assert!(matches!(result, Err(QueueError::Closed)));
    }
}
