//! # Single-Writer Job Queue
//!
//! A bounded async mailbox drained by one worker task. Every mutating
//! chain operation is wrapped as a job; the worker runs jobs strictly
//! one at a time in submission order, so fork-choice decisions always
//! observe a consistent tip. A job may suspend on I/O, but suspension
//! never lets the next job start early.
//!
//! `stop` closes the mailbox, waits for the in-flight job to finish, and
//! makes every later submission fail fast.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Submission against a stopped queue.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("job queue is stopped")]
pub struct QueueStopped;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// FIFO queue with at-most-one job in flight.
pub struct JobQueue {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl JobQueue {
    /// Create the queue and spawn its worker task.
    pub fn new(capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Job>(capacity);
        let worker = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job.await;
            }
        });
        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            stopped: AtomicBool::new(false),
        }
    }

    /// Submit a job and await its result. Jobs run in submission order,
    /// one at a time.
    pub async fn run<T, F>(&self, job: F) -> Result<T, QueueStopped>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(QueueStopped);
        }
        let sender = self.sender.lock().clone().ok_or(QueueStopped)?;

        let (done_tx, done_rx) = oneshot::channel();
        let wrapped: Job = Box::pin(async move {
            let result = job.await;
            let _ = done_tx.send(result);
        });
        sender.send(wrapped).await.map_err(|_| QueueStopped)?;
        done_rx.await.map_err(|_| QueueStopped)
    }

    /// True once `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Refuse new jobs, then wait for the in-flight job to complete.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // Dropping the sender closes the mailbox; the worker drains what
        // was already queued and exits.
        drop(self.sender.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn jobs_run_serially_in_order() {
        let queue = Arc::new(JobQueue::new(8));
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for tag in 0..5u32 {
            let queue = Arc::clone(&queue);
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                queue
                    .run(async move {
                        log.lock().push(("start", tag));
                        // Suspension inside a job must not let another
                        // job begin.
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        log.lock().push(("end", tag));
                    })
                    .await
                    .unwrap();
            }));
            // Stagger submissions so FIFO order is deterministic.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let log = log.lock();
        // Every start is immediately followed by its own end.
        for pair in log.chunks(2) {
            assert_eq!(pair[0].0, "start");
            assert_eq!(pair[1].0, "end");
            assert_eq!(pair[0].1, pair[1].1);
        }
        let started: Vec<u32> = log.iter().filter(|(k, _)| *k == "start").map(|(_, t)| *t).collect();
        assert_eq!(started, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn run_returns_job_result() {
        let queue = JobQueue::new(4);
        let result = queue.run(async { 2 + 2 }).await.unwrap();
        assert_eq!(result, 4);
    }

    #[tokio::test]
    async fn stop_refuses_new_jobs() {
        let queue = JobQueue::new(4);
        queue.stop().await;
        assert!(queue.is_stopped());
        assert_eq!(queue.run(async { 1 }).await, Err(QueueStopped));
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_job() {
        let queue = Arc::new(JobQueue::new(4));
        let finished = Arc::new(AtomicBool::new(false));

        let submitted = {
            let queue = Arc::clone(&queue);
            let finished = Arc::clone(&finished);
            tokio::spawn(async move {
                let _ = queue
                    .run(async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        finished.store(true, Ordering::SeqCst);
                    })
                    .await;
            })
        };
        // Give the job time to start.
        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.stop().await;

        assert!(finished.load(Ordering::SeqCst), "stop returned early");
        submitted.await.unwrap();
    }
}
