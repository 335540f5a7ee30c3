//! `WakeSource`: eventfd-backed wake-up for the driving thread.
//!
//! `tick()` blocks without a timeout by default. A `WakeSource` gives other
//! threads a way to interrupt that wait: any `WakeHandle::wake()` makes the
//! eventfd readable, the next tick drains the counter and runs the callback
//! on the driving thread. Multiple wakes before the tick coalesce into one
//! callback (eventfd counter semantics).

use microloop_core::{kwarn, EventSource, Interest, KernelError, LoopResult};

use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, PoisonError};

/// Owns the eventfd; closed when the source and every handle are gone.
struct WakeFd {
    fd: RawFd,
}

impl WakeFd {
    fn create() -> Result<Self, KernelError> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(KernelError::last("eventfd"));
        }
        Ok(Self { fd })
    }

    fn write(&self) -> Result<(), KernelError> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = KernelError::last("eventfd write");
            // Counter saturated: a wake is already pending.
            if err.errno == libc::EAGAIN {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Reset the counter. Returns the number of coalesced wakes.
    fn drain(&self) -> Result<u64, KernelError> {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd,
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = KernelError::last("eventfd read");
            if err.errno == libc::EAGAIN {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(val)
    }

    fn is_signaled(&self) -> bool {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut pfd, 1, 0) };
        ret > 0 && pfd.revents & libc::POLLIN != 0
    }
}

impl Drop for WakeFd {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
            self.fd = -1;
        }
    }
}

type WakeCallback = Box<dyn FnOnce() + Send + 'static>;

pub struct WakeSource {
    efd: Arc<WakeFd>,
    callback: Mutex<Option<WakeCallback>>,
}

/// Cloneable, thread-safe trigger for a `WakeSource`.
#[derive(Clone)]
pub struct WakeHandle {
    efd: Arc<WakeFd>,
}

impl WakeSource {
    /// Create the source and its trigger. `callback` runs once, on the
    /// driving thread, after the first wake.
    pub fn new<F>(callback: F) -> LoopResult<(WakeSource, WakeHandle)>
    where
        F: FnOnce() + Send + 'static,
    {
        let efd = Arc::new(WakeFd::create()?);
        let handle = WakeHandle { efd: Arc::clone(&efd) };
        let source = WakeSource {
            efd,
            callback: Mutex::new(Some(Box::new(callback))),
        };
        Ok((source, handle))
    }
}

impl WakeHandle {
    /// Make the source ready. Never blocks.
    pub fn wake(&self) -> LoopResult<()> {
        self.efd.write()?;
        Ok(())
    }

    pub fn fd(&self) -> RawFd {
        self.efd.fd
    }
}

impl EventSource for WakeSource {
    fn fd(&self) -> RawFd {
        self.efd.fd
    }

    fn interest(&self) -> Interest {
        Interest::READABLE
    }

    fn native_async(&self) -> bool {
        true
    }

    fn start(&self) {}

    fn is_complete(&self) -> bool {
        self.efd.is_signaled()
    }

    fn run_callback(&self) {
        if let Err(e) = self.efd.drain() {
            kwarn!("wake source: {}", e);
        }
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(cb) = callback {
            cb();
        }
    }

    fn name(&self) -> &'static str {
        "wake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_wakes_coalesce() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let (source, handle) = WakeSource::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert!(!source.is_complete());
        handle.wake().unwrap();
        handle.clone().wake().unwrap();
        assert!(source.is_complete());
        assert_eq!(source.efd.drain().unwrap(), 2);
        assert!(!source.is_complete());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_runs_once_and_drains() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let (source, handle) = WakeSource::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        handle.wake().unwrap();
        source.run_callback();
        source.run_callback();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!source.is_complete());
    }

    #[test]
    fn test_handle_outlives_source() {
        let (source, handle) = WakeSource::new(|| {}).unwrap();
        assert_eq!(source.fd(), handle.fd());
        drop(source);
        handle.wake().unwrap();
    }
}
