//! Fixed-size pool of session workers fed by an unbounded queue.
//!
//! Admission policy: `submit` never blocks and never refuses work. When every
//! worker is busy, jobs wait in the queue, so a saturated pool shows up as
//! latency for new clients rather than refused connections.

use std::{
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures::FutureExt;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error};

pub const DEFAULT_WORKERS: usize = 10;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct WorkerPool {
    jobs: mpsc::UnboundedSender<Job>,
    queued: Arc<AtomicUsize>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers on the current tokio runtime. A size of zero is
    /// raised to one.
    pub fn new(size: usize) -> Self {
        let (jobs, receiver) = mpsc::unbounded_channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let queued = Arc::new(AtomicUsize::new(0));

        let workers = (0..size.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    Arc::clone(&receiver),
                    Arc::clone(&queued),
                ))
            })
            .collect();

        Self {
            jobs,
            queued,
            workers,
        }
    }

    /// Queues a job for the next free worker.
    pub fn submit<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.jobs.send(Box::pin(job)).is_err() {
            // Only reachable once every worker has exited.
            self.queued.fetch_sub(1, Ordering::SeqCst);
            error!("worker pool has shut down; dropping job");
        }
    }

    /// Jobs submitted but not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    queued: Arc<AtomicUsize>,
) {
    loop {
        // Hold the receiver lock only while waiting, never while running a job.
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };
        queued.fetch_sub(1, Ordering::SeqCst);

        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            error!(worker, "session job panicked");
        }
    }
    debug!(worker, "worker exiting");
}
