//! Event source abstraction.
//!
//! An `EventSource` is "a thing that completes, possibly asynchronously,
//! and may need retry". The reactor takes ownership of a source when it is
//! registered and drops it after the final callback.
//!
//! # Dispatch variants
//!
//! - Readiness-bearing (`interest()` non-empty): the descriptor is added to
//!   the readiness multiplexer; the callback fires from `tick()` once the
//!   source reports completion.
//! - Immediate (`interest()` empty): `start()` runs, then `run_callback()`
//!   runs right after it on the same thread. The source never enters the
//!   registry.
//!
//! Orthogonally, `native_async()` decides where `start()` runs: inline on
//! the registering thread, or on the worker pool.
//!
//! # Implementors
//!
//! - `SignalsMonitor`: signalfd-backed, native-async, readable interest.
//! - `WakeSource`: eventfd-backed wake-up for the driving thread.
//! - `BlockingTask`: descriptor-less unit of blocking work.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::os::unix::io::RawFd;

/// Descriptor sentinel for sources with no underlying OS resource.
pub const NO_FD: RawFd = -1;

/// Set of readiness conditions the reactor should wait for.
///
/// The bit values are the epoll flag values, so a mask converts to an
/// `epoll_event.events` field without translation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interest(u32);

impl Interest {
    /// No readiness wait: run and call back immediately.
    pub const NONE: Interest = Interest(0);
    pub const READABLE: Interest = Interest(libc::EPOLLIN as u32);
    pub const WRITABLE: Interest = Interest(libc::EPOLLOUT as u32);
    pub const ERROR: Interest = Interest(libc::EPOLLERR as u32);
    pub const HANGUP: Interest = Interest(libc::EPOLLHUP as u32);

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Interest(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every condition in `other` is also in `self`.
    #[inline]
    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let names = [
            (Interest::READABLE, "READABLE"),
            (Interest::WRITABLE, "WRITABLE"),
            (Interest::ERROR, "ERROR"),
            (Interest::HANGUP, "HANGUP"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// A unit of work the reactor drives to completion.
///
/// **Contract:**
/// - `run_callback()` is invoked exactly once, after completion, and never
///   concurrently with `start()`.
/// - `run_callback()` may run on the driving thread (readiness-bearing
///   sources) or on a worker thread (immediate sources that are not
///   native-async). No implementation may assume a thread identity.
/// - `is_complete()` and `needs_retry()` are queried by the driving thread
///   after each readiness notification. They are source-defined predicates,
///   not reactor state.
/// - State touched by both `start()` and `run_callback()` must tolerate the
///   thread handoff between a worker and the driving thread, hence the
///   `Send + Sync` bound and `&self` receivers.
pub trait EventSource: Send + Sync {
    /// Descriptor of the underlying OS resource, or `NO_FD`.
    fn fd(&self) -> RawFd;

    /// Readiness conditions to wait for. Empty means "no readiness wait".
    fn interest(&self) -> Interest;

    /// True if progress is fully implied by descriptor readiness, so
    /// `start()` never blocks and may run on the registering thread.
    fn native_async(&self) -> bool;

    /// Perform the source's unit of work. May block if not native-async.
    fn start(&self);

    fn is_complete(&self) -> bool;

    /// Whether a completed attempt must be started again (EAGAIN-style).
    fn needs_retry(&self) -> bool {
        false
    }

    fn run_callback(&self);

    /// Short label used in log lines.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
