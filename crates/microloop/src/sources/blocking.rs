//! `BlockingTask`: descriptor-less unit of work.
//!
//! Has no readiness interest, so the loop runs `start()` and then
//! `run_callback()` back to back on the same thread and never registers
//! it. By default that thread is a pool worker; `inline()` runs both on
//! the registering thread instead.

use microloop_core::{EventSource, Interest, NO_FD};

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct BlockingTask {
    work: Mutex<Option<Job>>,
    done: Mutex<Option<Job>>,
    inline: bool,
    finished: AtomicBool,
}

impl BlockingTask {
    /// `work` may block; `done` runs right after it on the same thread.
    pub fn new<W, D>(work: W, done: D) -> Self
    where
        W: FnOnce() + Send + 'static,
        D: FnOnce() + Send + 'static,
    {
        Self {
            work: Mutex::new(Some(Box::new(work))),
            done: Mutex::new(Some(Box::new(done))),
            inline: false,
            finished: AtomicBool::new(false),
        }
    }

    /// Run on the registering thread instead of the pool.
    pub fn inline(mut self) -> Self {
        self.inline = true;
        self
    }
}

fn take(slot: &Mutex<Option<Job>>) -> Option<Job> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

impl EventSource for BlockingTask {
    fn fd(&self) -> RawFd {
        NO_FD
    }

    fn interest(&self) -> Interest {
        Interest::NONE
    }

    fn native_async(&self) -> bool {
        self.inline
    }

    fn start(&self) {
        if let Some(work) = take(&self.work) {
            work();
        }
        self.finished.store(true, Ordering::Release);
    }

    fn is_complete(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn run_callback(&self) {
        if let Some(done) = take(&self.done) {
            done();
        }
    }

    fn name(&self) -> &'static str {
        "blocking-task"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_runs_each_closure_once() {
        let work = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let (w, d) = (work.clone(), done.clone());
        let task = BlockingTask::new(
            move || {
                w.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                d.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert!(!task.is_complete());
        assert!(task.interest().is_empty());
        assert!(!task.native_async());

        task.start();
        task.start();
        assert!(task.is_complete());
        task.run_callback();
        task.run_callback();

        assert_eq!(work.load(Ordering::SeqCst), 1);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inline_is_native_async() {
        let task = BlockingTask::new(|| {}, || {}).inline();
        assert!(task.native_async());
        assert_eq!(task.fd(), NO_FD);
    }
}
