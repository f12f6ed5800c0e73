#![forbid(unsafe_code)]

use crate::error::Error;
use crate::util::lock_or_recover;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

struct QueueState {
    queue: VecDeque<PathBuf>,
    shutdown: bool,
    submitted: u64,
    processed: u64,
}

struct Shared {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    depth: AtomicUsize,
}

/// Fixed pool of scan workers fed by a bounded queue.
///
/// The queue never drops work: when it is full, [`WorkerPool::submit`]
/// blocks the caller until a worker frees a slot. A silently skipped
/// candidate would be indistinguishable from a scanner bypass, so the only
/// failure mode of submission is shutdown.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` threads consuming a queue bounded at `capacity`.
    /// `job` runs once per dequeued path and owns it.
    pub fn new<F>(workers: usize, capacity: usize, job: F) -> Result<Self, Error>
    where
        F: Fn(PathBuf) + Send + Sync + 'static,
    {
        if workers == 0 || capacity == 0 {
            return Err(Error::PoolSizing);
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                queue: VecDeque::with_capacity(capacity),
                shutdown: false,
                submitted: 0,
                processed: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            depth: AtomicUsize::new(0),
        });

        let job = Arc::new(job);
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let worker_shared = Arc::clone(&shared);
            let worker_job = Arc::clone(&job);
            let spawned = std::thread::Builder::new()
                .name(format!("sentinel-scan-{index}"))
                .spawn(move || worker_loop(&worker_shared, worker_job.as_ref()));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    // Unwind the workers that did start.
                    let partial = Self {
                        shared,
                        workers: Mutex::new(handles),
                    };
                    partial.shutdown();
                    return Err(err.into());
                }
            }
        }

        info!(workers, capacity, "scan worker pool started");
        Ok(Self {
            shared,
            workers: Mutex::new(handles),
        })
    }

    /// Hand a candidate to the pool, blocking while the queue is full.
    ///
    /// Returns an error only when the pool is shutting down; the path is
    /// then released unprocessed.
    pub fn submit(&self, path: PathBuf) -> Result<(), Error> {
        let mut state = lock_or_recover(&self.shared.state);
        if state.shutdown {
            return Err(Error::PoolShutdown);
        }

        while state.queue.len() >= self.shared.capacity {
            warn!(
                depth = state.queue.len(),
                "scan queue full, blocking producer until a worker frees a slot"
            );
            state = match self.shared.not_full.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if state.shutdown {
                return Err(Error::PoolShutdown);
            }
        }

        state.queue.push_back(path);
        state.submitted += 1;
        self.shared.depth.store(state.queue.len(), Ordering::Relaxed);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Approximate queue depth, lock-free.
    pub fn queue_size(&self) -> usize {
        self.shared.depth.load(Ordering::Relaxed)
    }

    /// Signal workers to drain, release any blocked submitter, and join the
    /// pool. Safe to call more than once.
    pub fn shutdown(&self) {
        {
            let mut state = lock_or_recover(&self.shared.state);
            if !state.shutdown {
                info!(
                    submitted = state.submitted,
                    processed = state.processed,
                    "scan pool shutting down"
                );
            }
            state.shutdown = true;
        }
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();

        let handles: Vec<_> = lock_or_recover(&self.workers).drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("scan worker panicked during shutdown");
            }
        }

        // Workers drain the queue before exiting; anything left here was
        // enqueued against a shutdown race and is released now.
        let mut state = lock_or_recover(&self.shared.state);
        if !state.queue.is_empty() {
            debug!(
                undrained = state.queue.len(),
                "releasing undrained scan candidates"
            );
            state.queue.clear();
        }
        self.shared.depth.store(0, Ordering::Relaxed);
    }
}

fn worker_loop<F: Fn(PathBuf)>(shared: &Shared, job: &F) {
    loop {
        let path = {
            let mut state = lock_or_recover(&shared.state);
            loop {
                if let Some(path) = state.queue.pop_front() {
                    state.processed += 1;
                    shared.depth.store(state.queue.len(), Ordering::Relaxed);
                    shared.not_full.notify_one();
                    break path;
                }
                // Drain fully before honouring shutdown.
                if state.shutdown {
                    return;
                }
                state = match shared.not_empty.wait(state) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        };
        job(path);
    }
}
