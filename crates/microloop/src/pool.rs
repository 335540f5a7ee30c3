//! `FixedPool`: bounded worker pool for blocking `start()` calls.
//!
//! Spawns N OS threads at creation. Workers pop tasks from a lock-free
//! MPMC queue (FIFO per pop, unordered across workers) and run them to
//! completion. No result is sent back: callers observe completion through
//! their own source predicates.
//!
//! A panic escaping a task aborts the process. The pool never retries.

use microloop_core::error::{LoopError, LoopResult};
use microloop_core::{kdebug, kerror};

use crossbeam_queue::SegQueue;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Shared state between submitters and workers.
struct PoolInner {
    /// Task queue: submitters → workers.
    queue: SegQueue<Task>,
    /// Number of workers currently running a task.
    active: AtomicUsize,
    /// Set once; workers drain the queue and exit.
    shutdown: AtomicBool,
    park_timeout: Duration,
}

pub struct FixedPool {
    inner: Arc<PoolInner>,
    /// Worker handles, unparked on submit (round-robin).
    threads: Vec<thread::Thread>,
    next_wake: AtomicUsize,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl FixedPool {
    /// Create a pool with `n` workers (at least one).
    pub fn new(n: usize, park_timeout: Duration) -> LoopResult<Self> {
        let n = n.max(1);
        let inner = Arc::new(PoolInner {
            queue: SegQueue::new(),
            active: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            park_timeout,
        });

        let mut handles = Vec::with_capacity(n);
        for worker_id in 0..n {
            let shared = Arc::clone(&inner);
            let spawned = thread::Builder::new()
                .name(format!("microloop-worker-{}", worker_id))
                .spawn(move || worker_loop(shared, worker_id));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    kerror!("failed to spawn worker {}: {}", worker_id, e);
                    inner.shutdown.store(true, Ordering::SeqCst);
                    for h in handles.drain(..) {
                        h.thread().unpark();
                        let _ = h.join();
                    }
                    let errno = e.raw_os_error().unwrap_or(libc::EAGAIN);
                    return Err(microloop_core::KernelError::new("pthread_create", errno).into());
                }
            }
        }

        let threads = handles.iter().map(|h| h.thread().clone()).collect();

        Ok(FixedPool {
            inner,
            threads,
            next_wake: AtomicUsize::new(0),
            handles: Mutex::new(handles),
        })
    }

    /// Enqueue a task. Never blocks the caller.
    pub fn submit<F>(&self, task: F) -> LoopResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(LoopError::PoolShutdown);
        }
        self.inner.queue.push(Box::new(task));

        let i = self.next_wake.fetch_add(1, Ordering::Relaxed) % self.threads.len();
        self.threads[i].unpark();
        Ok(())
    }

    /// Total number of workers.
    pub fn size(&self) -> usize {
        self.threads.len()
    }

    /// Workers currently running a task.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    /// Tasks waiting for a worker.
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Stop accepting tasks, drain the queue and join all workers.
    ///
    /// Idempotent. If called from a worker (the pool dropped inside one of its
    /// own tasks), that worker is detached instead of joined; it exits once
    /// its current task returns.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        for t in &self.threads {
            t.unpark();
        }

        let handles = match self.handles.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        let me = thread::current().id();
        for h in handles {
            if h.thread().id() == me {
                kdebug!("pool shut down from worker {:?}, detaching it", me);
                continue;
            }
            let _ = h.join();
        }
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker thread main loop.
fn worker_loop(inner: Arc<PoolInner>, worker_id: usize) {
    block_all_signals();
    kdebug!("worker {} started", worker_id);

    loop {
        match inner.queue.pop() {
            Some(task) => {
                inner.active.fetch_add(1, Ordering::Relaxed);
                let outcome = panic::catch_unwind(AssertUnwindSafe(task));
                inner.active.fetch_sub(1, Ordering::Relaxed);

                if outcome.is_err() {
                    kerror!("worker {}: task panicked, aborting", worker_id);
                    std::process::abort();
                }
            }
            None => {
                if inner.shutdown.load(Ordering::Acquire) {
                    break;
                }
                thread::park_timeout(inner.park_timeout);
            }
        }
    }

    kdebug!("worker {} stopped", worker_id);
}

/// Keep asynchronous signals away from workers so they stay pending for
/// the threads that monitor them (see `SignalsMonitor`).
fn block_all_signals() {
    use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow};

    if let Err(e) = pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&SigSet::all()), None) {
        kerror!("worker: pthread_sigmask failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn test_runs_all_tasks() {
        let pool = FixedPool::new(4, Duration::from_millis(1)).unwrap();
        assert_eq!(pool.size(), 4);

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        assert!(wait_for(|| counter.load(Ordering::SeqCst) == 100));
    }

    #[test]
    fn test_single_worker_is_fifo() {
        let pool = FixedPool::new(1, Duration::from_millis(1)).unwrap();
        let (tx, rx) = mpsc::channel();

        for i in 0..10 {
            let tx = tx.clone();
            pool.submit(move || tx.send(i).unwrap()).unwrap();
        }

        let got: Vec<i32> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_runs_off_caller_thread() {
        let pool = FixedPool::new(2, Duration::from_millis(1)).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit(move || tx.send(thread::current().id()).unwrap()).unwrap();

        let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(worker, thread::current().id());
    }

    #[test]
    fn test_shutdown_drains_then_rejects() {
        let pool = FixedPool::new(2, Duration::from_millis(1)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                thread::sleep(Duration::from_micros(100));
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        assert_eq!(pool.pending(), 0);
        assert_eq!(pool.submit(|| {}), Err(LoopError::PoolShutdown));

        // Second call is a no-op.
        pool.shutdown();
    }

    #[test]
    fn test_last_owner_dropped_inside_task() {
        let pool = Arc::new(FixedPool::new(2, Duration::from_millis(1)).unwrap());
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel();

        let owner = Arc::clone(&pool);
        pool.submit(move || {
            release_rx.recv().unwrap();
            // Now the only reference: dropping it shuts the pool down here.
            drop(owner);
            done_tx.send(thread::current().id()).unwrap();
        })
        .unwrap();

        drop(pool);
        release_tx.send(()).unwrap();

        let worker = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(worker, thread::current().id());
    }
}
