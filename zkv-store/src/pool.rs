//! # Worker Thread Pool
//!
//! Purpose: Run bounded background jobs (deferred teardown of large values)
//! off the reactor thread.
//!
//! ## Design Principles
//! 1. **Fixed Workers, Shared FIFO**: A set number of threads block on one
//!    channel; `execute` enqueues and wakes exactly one of them.
//! 2. **Ownership Hand-Off**: Jobs capture values that have already been
//!    detached from the data plane, so workers never touch shared state.
//! 3. **Join On Drop**: Dropping the pool closes the channel; workers finish
//!    queued jobs and exit, and the drop joins them.

use std::thread;

use crossbeam_channel::{unbounded, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of worker threads consuming a FIFO job queue.
pub struct ThreadPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawns `workers` threads (at least one).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = unbounded::<Job>();

        let handles = (0..workers)
            .map(|i| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("zkv-worker-{i}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                    })
                    .expect("spawn worker thread")
            })
            .collect();

        ThreadPool {
            jobs: Some(tx),
            workers: handles,
        }
    }

    /// Enqueues a job; some idle worker will pick it up in FIFO order.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(jobs) = &self.jobs {
            // Send fails only after shutdown has closed the channel.
            let _ = jobs.send(Box::new(job));
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.jobs.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_queued_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = ThreadPool::new(2);
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool); // joins workers after the queue drains
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn single_worker_preserves_fifo_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pool = ThreadPool::new(1);
        for i in 0..10 {
            let log = Arc::clone(&log);
            pool.execute(move || {
                log.lock().unwrap().push(i);
            });
        }
        drop(pool);
        assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }
}
