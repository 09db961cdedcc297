//! Running kernel requests inline or on a pool of worker threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    jobs: SegQueue<Job>,
    pending: Mutex<bool>,
    signal: Condvar,
    shutdown: AtomicBool,
}

/// Runs each request either on the calling thread or on a worker.
///
/// Workers drain the queue before exiting, so every reply handed to a
/// pooled job is answered even while the session is going down.
pub struct Dispatcher {
    queue: Option<Arc<Queue>>,
    handles: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Run every job on the thread that submits it.
    pub fn inline() -> Self {
        Dispatcher {
            queue: None,
            handles: Vec::new(),
        }
    }

    /// Run jobs on `threads` worker threads.
    pub fn pool(threads: usize) -> Self {
        let queue = Arc::new(Queue {
            jobs: SegQueue::new(),
            pending: Mutex::new(false),
            signal: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads.max(1) {
            let queue = Arc::clone(&queue);
            let spawned = thread::Builder::new()
                .name(format!("fuse-worker-{i}"))
                .spawn(move || work(&queue));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!(error = %e, "Could not start FUSE worker {}", i),
            }
        }

        if handles.is_empty() {
            warn!("No FUSE workers started, serving requests inline");
            return Self::inline();
        }
        debug!(workers = handles.len(), "FUSE worker pool started");
        Dispatcher {
            queue: Some(queue),
            handles,
        }
    }

    /// Number of worker threads; zero when running inline.
    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    pub fn run<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.queue {
            Some(queue) => {
                queue.jobs.push(Box::new(job));
                let mut pending = queue.pending.lock();
                *pending = true;
                queue.signal.notify_one();
            }
            None => job(),
        }
    }
}

fn work(queue: &Queue) {
    loop {
        match queue.jobs.pop() {
            Some(job) => job(),
            None if queue.shutdown.load(Ordering::Acquire) => {
                while let Some(job) = queue.jobs.pop() {
                    job();
                }
                break;
            }
            None => {
                let mut pending = queue.pending.lock();
                if !*pending {
                    queue
                        .signal
                        .wait_for(&mut pending, Duration::from_millis(50));
                }
                *pending = false;
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let Some(queue) = &self.queue else {
            return;
        };
        queue.shutdown.store(true, Ordering::Release);
        {
            let mut pending = queue.pending.lock();
            *pending = true;
            queue.signal.notify_all();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::sync::Barrier;

    #[test]
    fn test_inline_runs_on_caller() {
        let dispatcher = Dispatcher::inline();
        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();
        dispatcher.run(move || tx.send(thread::current().id()).unwrap());
        assert_eq!(rx.try_recv().unwrap(), caller);
        assert_eq!(dispatcher.workers(), 0);
    }

    #[test]
    fn test_pool_runs_jobs_concurrently() {
        let dispatcher = Dispatcher::pool(4);
        assert_eq!(dispatcher.workers(), 4);

        // Each job blocks until all four are running at once.
        let barrier = Arc::new(Barrier::new(4));
        let (tx, rx) = mpsc::channel();
        for _ in 0..4 {
            let barrier = Arc::clone(&barrier);
            let tx = tx.clone();
            dispatcher.run(move || {
                barrier.wait();
                tx.send(thread::current().id()).unwrap();
            });
        }

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        }
        assert!(!seen.contains(&thread::current().id()));
    }

    #[test]
    fn test_drop_drains_queued_jobs() {
        let done = Arc::new(AtomicUsize::new(0));
        {
            let dispatcher = Dispatcher::pool(2);
            for _ in 0..100 {
                let done = Arc::clone(&done);
                dispatcher.run(move || {
                    done.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(done.load(Ordering::SeqCst), 100);
    }
}
