//! `SignalsMonitor`: signal delivery as a readable descriptor.
//!
//! Registering a handler blocks the signal on the calling thread and adds
//! it to the signalfd mask, so the kernel queues it instead of running a
//! disposition. The loop reports the signalfd readable; the callback reads
//! exactly one record and runs that signal's handlers in registration
//! order.
//!
//! Handlers answer "may the process exit?". Evaluation stops at the first
//! `false`, and the outcome is the AND of the handlers actually run.
//!
//! Masks are per thread: register handlers on the thread that drives the
//! loop. Pool workers block every signal, so process-directed signals stay
//! pending for the signalfd.

use microloop_core::{kdebug, kerror, kwarn, EventSource, Interest, KernelError, LoopResult};

use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};

use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Receives the delivered signal; returns whether the process may exit.
pub type SignalHandler = Box<dyn Fn(Signal) -> bool + Send + Sync + 'static>;

pub struct SignalsMonitor {
    sfd: Mutex<SignalFd>,
    fd: RawFd,
    /// Thread mask captured at construction, restored on drop.
    initial_mask: SigSet,
    monitored: SigSet,
    handlers: HashMap<Signal, Vec<SignalHandler>>,
    can_exit: Arc<AtomicBool>,
    last_signal: AtomicI32,
}

impl SignalsMonitor {
    pub fn new() -> LoopResult<Self> {
        let initial_mask = SigSet::thread_get_mask()
            .map_err(|e| KernelError::from_nix("pthread_sigmask", e))?;
        let monitored = SigSet::empty();
        let sfd = SignalFd::with_flags(&monitored, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
            .map_err(|e| KernelError::from_nix("signalfd", e))?;
        let fd = sfd.as_raw_fd();

        Ok(Self {
            sfd: Mutex::new(sfd),
            fd,
            initial_mask,
            monitored,
            handlers: HashMap::new(),
            can_exit: Arc::new(AtomicBool::new(false)),
            last_signal: AtomicI32::new(0),
        })
    }

    /// Append `handler` to the list for `signal` and start monitoring it.
    pub fn register_signal_handler<F>(&mut self, signal: Signal, handler: F) -> LoopResult<()>
    where
        F: Fn(Signal) -> bool + Send + Sync + 'static,
    {
        if !self.monitored.contains(signal) {
            self.update_sigmask(signal)?;
        }
        self.handlers.entry(signal).or_default().push(Box::new(handler));
        kdebug!(
            "signals: {} handler(s) for {}",
            self.handlers.get(&signal).map_or(0, Vec::len),
            signal
        );
        Ok(())
    }

    /// Block `signal` on this thread and reprogram the signalfd with the
    /// grown mask. The descriptor number does not change.
    fn update_sigmask(&mut self, signal: Signal) -> LoopResult<()> {
        let mut single = SigSet::empty();
        single.add(signal);
        pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&single), None)
            .map_err(|e| KernelError::from_nix("pthread_sigmask", e))?;

        let mut next = self.monitored;
        next.add(signal);
        self.sfd
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_mask(&next)
            .map_err(|e| KernelError::from_nix("signalfd", e))?;
        self.monitored = next;
        Ok(())
    }

    /// Outcome of the last delivery; false until a signal was handled.
    pub fn can_exit(&self) -> bool {
        self.can_exit.load(Ordering::Acquire)
    }

    /// Shared view of `can_exit()`, readable after the monitor has been
    /// handed to the loop.
    pub fn exit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.can_exit)
    }

    /// Last delivered signal number, if any.
    pub fn last_signal(&self) -> Option<Signal> {
        Signal::try_from(self.last_signal.load(Ordering::Acquire)).ok()
    }

    pub fn monitored(&self) -> &SigSet {
        &self.monitored
    }

    /// Run the handlers for `signal`, stopping at the first veto.
    fn dispatch(&self, signal: Signal) -> bool {
        match self.handlers.get(&signal) {
            Some(handlers) => handlers.iter().all(|handler| handler(signal)),
            None => true,
        }
    }
}

impl EventSource for SignalsMonitor {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn interest(&self) -> Interest {
        Interest::READABLE
    }

    fn native_async(&self) -> bool {
        true
    }

    fn start(&self) {}

    /// A signal record is ready to read.
    fn is_complete(&self) -> bool {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut pfd, 1, 0) };
        ret > 0 && pfd.revents & libc::POLLIN != 0
    }

    fn run_callback(&self) {
        let record = self
            .sfd
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .read_signal();

        let info = match record {
            Ok(Some(info)) => info,
            Ok(None) => {
                kwarn!("signals: readiness without a pending signal");
                return;
            }
            Err(e) => {
                kerror!("signals: {}", KernelError::from_nix("signalfd read", e));
                return;
            }
        };

        let signo = info.ssi_signo as i32;
        self.last_signal.store(signo, Ordering::Release);

        let can_exit = match Signal::try_from(signo) {
            Ok(signal) => {
                let verdict = self.dispatch(signal);
                kdebug!("signals: {} handled, can_exit={}", signal, verdict);
                verdict
            }
            Err(_) => {
                kwarn!("signals: unknown signal number {}", signo);
                true
            }
        };
        self.can_exit.store(can_exit, Ordering::Release);
    }

    fn name(&self) -> &'static str {
        "signals"
    }
}

impl Drop for SignalsMonitor {
    fn drop(&mut self) {
        if let Err(e) = self.initial_mask.thread_set_mask() {
            kerror!("signals: restoring thread mask failed: {}", e);
        }
    }
}
