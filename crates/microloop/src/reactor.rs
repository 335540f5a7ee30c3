//! # Reactor: the event loop
//!
//! Owns the epoll instance, the source registry and the worker pool.
//! One logical thread drives it by calling `tick()` repeatedly; each call
//! performs one bounded readiness wait and dispatches the ready batch
//! sequentially.
//!
//! ## Threading
//!
//! - Callbacks of readiness-bearing sources run on the driving thread,
//!   inside `tick()`, one at a time, in the order epoll reported them.
//! - Callbacks of immediate (empty-interest) sources run on whichever
//!   thread ran `start()`: the registering thread for native-async
//!   sources, a pool worker otherwise.
//! - The registry sits behind a mutex, so `register()` may be called from
//!   any thread, including from inside a callback. The lock is never held
//!   while source code runs.
//! - Workers never touch the registry. A retry is a resubmitted `start()`
//!   whose outcome the driving thread observes on the next readiness round.
//! - Each registration carries a "start running" flag, set before `start()`
//!   is launched and cleared when it returns. While it is set, readiness is
//!   treated as progress only: no callback and no further `start()`.

use crate::config::LoopConfig;
use crate::poller::{Poller, Ready};
use crate::pool::FixedPool;

use microloop_core::error::{LoopError, LoopResult};
use microloop_core::{kdebug, kerror, ktrace, kwarn, EventSource};

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// A live registration: the owned source and whether its `start()` is
/// still running.
struct Registration {
    source: Arc<dyn EventSource>,
    starting: Arc<AtomicBool>,
}

type Registry = HashMap<RawFd, Registration>;

/// Process-wide loop, built on first use.
static MAIN: OnceLock<EventLoop> = OnceLock::new();

/// Reusable wait buffers: raw kernel events and the decoded ready list.
struct WaitBuffers {
    raw: Vec<libc::epoll_event>,
    ready: Vec<Ready>,
}

pub struct EventLoop {
    poller: Poller,
    /// Descriptor → exclusively owned source. At most one entry per fd.
    registry: Mutex<Registry>,
    buffers: Mutex<WaitBuffers>,
    pool: FixedPool,
    config: LoopConfig,
}

impl EventLoop {
    /// Create a loop with its own epoll instance and worker pool.
    pub fn new(config: LoopConfig) -> LoopResult<Self> {
        let config = config.normalized();
        let poller = Poller::new()?;
        let pool = FixedPool::new(config.pool_size, config.park_timeout)?;

        kdebug!(
            "event loop: {} workers, {} events/tick, timeout {:?}",
            pool.size(),
            config.max_events,
            config.wait_timeout
        );

        Ok(Self {
            poller,
            registry: Mutex::new(HashMap::new()),
            buffers: Mutex::new(WaitBuffers {
                raw: Vec::with_capacity(config.max_events),
                ready: Vec::with_capacity(config.max_events),
            }),
            pool,
            config,
        })
    }

    /// The process-wide loop, built from `LoopConfig::from_env()` on first
    /// call. Construction failure is returned, not cached.
    ///
    /// The instance lives until process exit; prefer an explicit
    /// `EventLoop::new()` where deterministic teardown matters.
    pub fn main() -> LoopResult<&'static EventLoop> {
        if let Some(ev) = MAIN.get() {
            return Ok(ev);
        }
        let ev = EventLoop::new(LoopConfig::from_env())?;
        // Losing a construction race drops ours and returns the winner.
        Ok(MAIN.get_or_init(move || ev))
    }

    /// Build the process-wide loop with an explicit config.
    pub fn init_main(config: LoopConfig) -> LoopResult<&'static EventLoop> {
        if MAIN.get().is_some() {
            return Err(LoopError::AlreadyInitialized);
        }
        let ev = EventLoop::new(config)?;
        let mut installed = false;
        let main = MAIN.get_or_init(|| {
            installed = true;
            ev
        });
        if !installed {
            return Err(LoopError::AlreadyInitialized);
        }
        Ok(main)
    }

    /// Take ownership of `source` and start it.
    ///
    /// Non-empty interest: the descriptor joins the epoll set and the
    /// registry; the callback fires later from `tick()`. Empty interest:
    /// `start()` then `run_callback()` run back to back and the source is
    /// dropped without entering the registry.
    ///
    /// `start()` runs inline when the source is native-async, otherwise on
    /// the worker pool.
    ///
    /// Fails with `DescriptorInUse` if the descriptor already has a live
    /// registration, leaving that registration untouched.
    pub fn register<S>(&self, source: S) -> LoopResult<()>
    where
        S: EventSource + 'static,
    {
        self.register_shared(Arc::new(source))
    }

    fn register_shared(&self, source: Arc<dyn EventSource>) -> LoopResult<()> {
        let interest = source.interest();

        if interest.is_empty() {
            ktrace!("immediate source {} (native_async={})", source.name(), source.native_async());
            if source.native_async() {
                source.start();
                source.run_callback();
            } else {
                self.pool.submit(move || {
                    source.start();
                    source.run_callback();
                })?;
            }
            return Ok(());
        }

        let fd = source.fd();
        let starting = Arc::new(AtomicBool::new(true));
        {
            let mut registry = self.lock_registry();
            if registry.contains_key(&fd) {
                kwarn!("fd {} already registered, rejecting {}", fd, source.name());
                return Err(LoopError::DescriptorInUse(fd));
            }
            self.poller.add(fd, interest)?;
            registry.insert(
                fd,
                Registration {
                    source: Arc::clone(&source),
                    starting: Arc::clone(&starting),
                },
            );
        }
        ktrace!("registered fd {} ({}) for {:?}", fd, source.name(), interest);

        if source.native_async() {
            source.start();
            starting.store(false, Ordering::Release);
        } else if let Err(e) = self.start_on_pool(source, starting) {
            self.remove(fd);
            return Err(e);
        }
        Ok(())
    }

    /// Run `start()` on a worker. `starting` must already be set; it is
    /// cleared once `start()` returns, or right away if submission fails.
    fn start_on_pool(&self, source: Arc<dyn EventSource>, starting: Arc<AtomicBool>) -> LoopResult<()> {
        let flag = Arc::clone(&starting);
        let submitted = self.pool.submit(move || {
            source.start();
            flag.store(false, Ordering::Release);
        });
        if submitted.is_err() {
            starting.store(false, Ordering::Release);
        }
        submitted
    }

    /// One dispatch round: wait for readiness (bounded by `max_events` and
    /// the configured timeout) and handle each ready descriptor.
    ///
    /// Returns false only when the wait call itself fails.
    pub fn tick(&self) -> bool {
        let mut ready = {
            let mut guard = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
            let bufs = &mut *guard;
            if let Err(e) = self.poller.wait(&mut bufs.raw, &mut bufs.ready, self.config.wait_timeout_ms()) {
                kerror!("event loop: {}", e);
                return false;
            }
            std::mem::take(&mut bufs.ready)
        };

        for r in &ready {
            self.dispatch(r);
        }

        // Hand the allocation back for the next tick.
        ready.clear();
        let mut guard = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.ready.capacity() < ready.capacity() {
            guard.ready = ready;
        }
        true
    }

    /// Tick until the wait fails or no registered source remains.
    ///
    /// Immediate sources still running on the pool are not waited for.
    pub fn run(&self) {
        while !self.is_empty() && self.tick() {}
    }

    fn dispatch(&self, ready: &Ready) {
        let (source, starting) = match self.lock_registry().get(&ready.fd) {
            Some(r) => (Arc::clone(&r.source), Arc::clone(&r.starting)),
            None => {
                ktrace!("fd {} ready but no longer registered", ready.fd);
                return;
            }
        };

        if starting.load(Ordering::Acquire) {
            ktrace!("fd {} ({}) ready while start() runs", ready.fd, source.name());
            return;
        }

        if !source.is_complete() {
            ktrace!("fd {} ({}) progressed, not complete", ready.fd, source.name());
            return;
        }

        if source.needs_retry() {
            kdebug!("fd {} ({}) needs retry", ready.fd, source.name());
            starting.store(true, Ordering::Release);
            if let Err(e) = self.start_on_pool(source, starting) {
                kerror!("fd {}: retry not submitted: {}", ready.fd, e);
            }
            return;
        }

        source.run_callback();
        self.remove(ready.fd);
    }

    /// Drop the registration for `fd`: epoll first, then the registry
    /// entry. The source itself is dropped outside the registry lock.
    fn remove(&self, fd: RawFd) {
        if let Err(e) = self.poller.delete(fd) {
            kwarn!("fd {}: {}", fd, e);
        }
        let removed = self.lock_registry().remove(&fd);
        if let Some(r) = removed {
            ktrace!("removed fd {} ({})", fd, r.source.name());
        }
    }

    /// Number of sources waiting on readiness.
    pub fn len(&self) -> usize {
        self.lock_registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_registry().is_empty()
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.lock_registry().contains_key(&fd)
    }

    pub fn pool(&self) -> &FixedPool {
        &self.pool
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    #[cfg(test)]
    fn start_running(&self, fd: RawFd) -> bool {
        self.lock_registry()
            .get(&fd)
            .map_or(false, |r| r.starting.load(Ordering::Acquire))
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run one tick of the process-wide loop. Evaluates to false if the loop
/// cannot be built or its wait fails.
#[macro_export]
macro_rules! microloop_tick {
    () => {
        $crate::EventLoop::main().map(|ev| ev.tick()).unwrap_or(false)
    };
}
